use bytes::{Bytes, BytesMut};

use crate::codec::{encode_frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::frame::Frame;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Turns structured frames into encoded byte blocks, one block per frame.
///
/// The length field is always computed from the encoded body.
#[derive(Debug)]
pub struct Serializer {
    buf: BytesMut,
    config: FrameConfig,
}

impl Serializer {
    /// Create a serializer with default configuration.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create a serializer with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode one frame into a byte block.
    pub fn serialize(&mut self, frame: &Frame) -> Result<Bytes> {
        let size = frame.encoded_len();
        if size > self.config.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size,
                max: self.config.max_frame_size,
            });
        }

        encode_frame(frame, &mut self.buf)?;
        Ok(self.buf.split().freeze())
    }

    /// Current serializer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_frame, DecodeOptions};
    use crate::frame::Payload;

    #[test]
    fn serialize_blocks_are_independent() {
        let mut serializer = Serializer::new();
        let one = serializer
            .serialize(&Frame::request_response(1, Payload::new("one")))
            .unwrap();
        let two = serializer
            .serialize(&Frame::request_response(3, Payload::new("two")))
            .unwrap();

        let f1 = decode_frame(one, &DecodeOptions::default()).unwrap();
        let f2 = decode_frame(two, &DecodeOptions::default()).unwrap();
        assert_eq!(f1.stream_id, 1);
        assert_eq!(f2.stream_id, 3);
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut serializer = Serializer::with_config(FrameConfig {
            max_frame_size: 16,
            ..FrameConfig::default()
        });
        let err = serializer
            .serialize(&Frame::response(2, Payload::new("oversized")))
            .unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { size: 21, max: 16 }));
    }
}
