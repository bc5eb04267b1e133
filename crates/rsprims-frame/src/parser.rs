use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::codec::{decode_frame, split_frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::frame::Frame;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// How the transport delivers frame boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Each inbound block is exactly one frame (message transports).
    Framed,
    /// Inbound bytes are undelimited; boundaries come from the length prefix.
    Streamed,
}

/// Turns inbound byte blocks into structured frames, in arrival order.
///
/// In [`TransportMode::Streamed`] bytes are buffered until a complete
/// length-prefixed frame is available; frames split across chunks and several
/// frames in one chunk are both handled. A decode error behind complete frames
/// in the same chunk is reported on the following call, after those frames.
#[derive(Debug)]
pub struct Parser {
    mode: TransportMode,
    buf: BytesMut,
    config: FrameConfig,
    deferred_error: Option<FrameError>,
}

impl Parser {
    /// Create a parser for a transport mode.
    pub fn new(mode: TransportMode, config: FrameConfig) -> Self {
        Self {
            mode,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            deferred_error: None,
        }
    }

    /// Parser for undelimited byte streams with default configuration.
    pub fn streamed() -> Self {
        Self::new(TransportMode::Streamed, FrameConfig::default())
    }

    /// Parser for pre-delimited blocks with default configuration.
    pub fn framed() -> Self {
        Self::new(TransportMode::Framed, FrameConfig::default())
    }

    /// Transport mode of this parser.
    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// Current parser configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Decode one pre-delimited block.
    pub fn decode_block(&self, block: &[u8]) -> Result<Frame> {
        if block.len() > self.config.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: block.len(),
                max: self.config.max_frame_size,
            });
        }
        decode_frame(Bytes::copy_from_slice(block), &self.config.decode_options())
    }

    /// Buffer streamed bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Decode the next complete buffered frame, if any.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(err) = self.deferred_error.take() {
            return Err(err);
        }
        match split_frame(&mut self.buf, self.config.max_frame_size)? {
            Some(raw) => decode_frame(raw, &self.config.decode_options()).map(Some),
            None => Ok(None),
        }
    }

    /// Feed one inbound chunk and return every frame it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Frame>> {
        match self.mode {
            TransportMode::Framed => Ok(vec![self.decode_block(chunk)?]),
            TransportMode::Streamed => {
                self.push(chunk);
                let mut frames = Vec::new();
                loop {
                    match self.next_frame() {
                        Ok(Some(frame)) => frames.push(frame),
                        Ok(None) => break,
                        Err(err) if frames.is_empty() => return Err(err),
                        Err(err) => {
                            self.deferred_error = Some(err);
                            break;
                        }
                    }
                }
                trace!(
                    frames = frames.len(),
                    buffered = self.buf.len(),
                    "parsed chunk"
                );
                Ok(frames)
            }
        }
    }

    /// Bytes buffered toward an incomplete frame.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Signal that the transport closed.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` if a partial frame is left.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(err) = self.deferred_error.take() {
            self.buf.clear();
            return Err(err);
        }
        if self.buf.is_empty() {
            Ok(())
        } else {
            self.buf.clear();
            Err(FrameError::ConnectionClosed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_to_bytes;
    use crate::constants::ErrorCode;
    use crate::frame::{FrameBody, Payload};

    fn wire(frames: &[Frame]) -> Vec<u8> {
        frames
            .iter()
            .flat_map(|f| encode_to_bytes(f).unwrap().to_vec())
            .collect()
    }

    #[test]
    fn streamed_byte_by_byte() {
        let frame = Frame::request_response(1, Payload::new("slow").with_metadata("md"));
        let bytes = wire(std::slice::from_ref(&frame));

        let mut parser = Parser::streamed();
        let mut out = Vec::new();
        for byte in &bytes {
            out.extend(parser.feed(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(out, vec![frame]);
        assert_eq!(parser.buffered_len(), 0);
        parser.finish().unwrap();
    }

    #[test]
    fn streamed_pipelined_frames_keep_order() {
        let frames = vec![
            Frame::request_response(1, Payload::new("one")),
            Frame::response(2, Payload::new("two")),
            Frame::error(3, ErrorCode::APPLICATION_ERROR, Payload::new("three")),
            Frame::cancel(5, None),
        ];
        let bytes = wire(&frames);

        let mut parser = Parser::streamed();
        assert_eq!(parser.feed(&bytes).unwrap(), frames);
    }

    #[test]
    fn streamed_split_across_chunks() {
        let frames = vec![
            Frame::response(2, Payload::new("first")),
            Frame::response(4, Payload::new("second")),
        ];
        let bytes = wire(&frames);
        let (a, b) = bytes.split_at(20);

        let mut parser = Parser::streamed();
        let first = parser.feed(a).unwrap();
        assert_eq!(first, vec![frames[0].clone()]);
        assert!(parser.buffered_len() > 0);

        let second = parser.feed(b).unwrap();
        assert_eq!(second, vec![frames[1].clone()]);
    }

    #[test]
    fn streamed_decode_error_surfaces() {
        let mut bytes = wire(&[Frame::response(2, Payload::new("x"))]);
        bytes[5] = 0x0E;
        let mut parser = Parser::streamed();
        let err = parser.feed(&bytes).unwrap_err();
        assert!(matches!(err, FrameError::UnimplementedType(_)));
    }

    #[test]
    fn streamed_error_after_good_frame_returns_the_good_frame_first() {
        let good = Frame::response(2, Payload::new("ok"));
        let good_len = encode_to_bytes(&good).unwrap().len();
        let mut bytes = wire(&[good.clone(), Frame::response(4, Payload::new("bad"))]);
        bytes[good_len + 5] = 0x0E;

        let mut parser = Parser::streamed();
        assert_eq!(parser.feed(&bytes).unwrap(), vec![good]);
        assert!(matches!(
            parser.next_frame(),
            Err(FrameError::UnimplementedType(_))
        ));
        assert!(parser.next_frame().unwrap().is_none());
        parser.finish().unwrap();
    }

    #[test]
    fn deferred_error_precedes_later_chunks() {
        let good = Frame::response(2, Payload::new("ok"));
        let good_len = encode_to_bytes(&good).unwrap().len();
        let mut bytes = wire(&[good.clone(), Frame::response(4, Payload::new("bad"))]);
        bytes[good_len + 5] = 0x0E;

        let mut parser = Parser::streamed();
        assert_eq!(parser.feed(&bytes).unwrap(), vec![good.clone()]);
        let next = wire(std::slice::from_ref(&good));
        assert!(parser.feed(&next).is_err());
        assert_eq!(parser.feed(&[]).unwrap(), vec![good]);
    }

    #[test]
    fn finish_with_partial_frame() {
        let bytes = wire(&[Frame::response(2, Payload::new("partial"))]);
        let mut parser = Parser::streamed();
        assert!(parser.feed(&bytes[..10]).unwrap().is_empty());
        assert!(matches!(parser.finish(), Err(FrameError::ConnectionClosed)));
    }

    #[test]
    fn framed_block_per_frame() {
        let frame = Frame::keepalive(true, "pong");
        let bytes = wire(std::slice::from_ref(&frame));
        let mut parser = Parser::framed();
        assert_eq!(parser.feed(&bytes).unwrap(), vec![frame]);
    }

    #[test]
    fn framed_length_optional() {
        let mut bytes = wire(&[Frame::response(2, Payload::new("abc"))]);
        bytes[0..4].copy_from_slice(&0u32.to_be_bytes());

        let strict = Parser::framed();
        assert!(matches!(
            strict.decode_block(&bytes),
            Err(FrameError::LengthMismatch { .. })
        ));

        let lenient = Parser::new(
            TransportMode::Framed,
            FrameConfig {
                length_optional: true,
                ..FrameConfig::default()
            },
        );
        let frame = lenient.decode_block(&bytes).unwrap();
        assert!(matches!(frame.body, FrameBody::Response(p) if p.data.as_ref() == b"abc"));
    }
}
