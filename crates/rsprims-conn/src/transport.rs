//! Adapters for message transports that deliver one frame per message.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use futures_util::Sink;
use rsprims_frame::{Frame, FrameConfig, FrameError, Parser, Serializer, TransportMode};

/// Decodes each inbound message as exactly one frame.
#[derive(Debug)]
pub struct MessageFrames<S> {
    inner: S,
    parser: Parser,
}

impl<S> MessageFrames<S> {
    pub fn new(inner: S, config: FrameConfig) -> Self {
        Self {
            inner,
            parser: Parser::new(TransportMode::Framed, config),
        }
    }
}

impl<S> Stream for MessageFrames<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = Result<Frame, FrameError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let item = match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
            Some(Ok(block)) => Some(this.parser.decode_block(&block)),
            Some(Err(err)) => Some(Err(FrameError::Io(err))),
            None => None,
        };
        Poll::Ready(item)
    }
}

/// Encodes each outbound frame as one message.
#[derive(Debug)]
pub struct MessageSink<K> {
    inner: K,
    serializer: Serializer,
}

impl<K> MessageSink<K> {
    pub fn new(inner: K, config: FrameConfig) -> Self {
        Self {
            inner,
            serializer: Serializer::with_config(config),
        }
    }
}

impl<K> Sink<Frame> for MessageSink<K>
where
    K: Sink<Bytes, Error = io::Error> + Unpin,
{
    type Error = FrameError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), FrameError>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_ready(cx)
            .map_err(FrameError::Io)
    }

    fn start_send(self: Pin<&mut Self>, frame: Frame) -> Result<(), FrameError> {
        let this = self.get_mut();
        let block = this.serializer.serialize(&frame)?;
        Pin::new(&mut this.inner)
            .start_send(block)
            .map_err(FrameError::Io)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), FrameError>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_flush(cx)
            .map_err(FrameError::Io)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), FrameError>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_close(cx)
            .map_err(FrameError::Io)
    }
}
