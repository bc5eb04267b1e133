//! `tokio_util::codec` integration for streamed transports.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, split_frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::frame::Frame;

/// Length-prefixed frame codec for use with `tokio_util::codec::Framed`.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec {
    config: FrameConfig,
}

impl FrameCodec {
    /// Create a codec with explicit configuration.
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }

    /// Current codec configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match split_frame(src, self.config.max_frame_size)? {
            Some(raw) => decode_frame(raw, &self.config.decode_options()).map(Some),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        let size = frame.encoded_len();
        if size > self.config.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size,
                max: self.config.max_frame_size,
            });
        }
        encode_frame(&frame, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Payload;

    #[test]
    fn encode_then_decode_through_codec() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        let a = Frame::request_response(1, Payload::new("a"));
        let b = Frame::response(2, Payload::new("b").with_metadata("m"));
        codec.encode(a.clone(), &mut buf).unwrap();
        codec.encode(b.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(a));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(b));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn eof_mid_frame_is_an_error() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(Frame::response(2, Payload::new("cut short")), &mut buf)
            .unwrap();
        buf.truncate(buf.len() - 3);
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(FrameError::ConnectionClosed)
        ));
    }
}
