//! ReactiveSocket frame codec.
//!
//! Every frame starts with a fixed 12-byte big-endian header:
//! - a 4-byte total frame length (header included)
//! - a 2-byte frame type
//! - a 2-byte flag mask
//! - a 4-byte stream id
//!
//! followed by a type-specific body, optional self-inclusive-length metadata and
//! trailing data. [`codec`] converts between [`Frame`] values and bytes;
//! [`Serializer`] and [`Parser`] bridge a transport's chunking model (streamed
//! bytes or pre-delimited messages) to discrete frames.

pub mod codec;
pub mod constants;
pub mod encoding;
pub mod error;
pub mod frame;
pub mod parser;
pub mod serializer;

#[cfg(feature = "async")]
pub mod framed;

pub use codec::{
    decode_frame, decode_header, decode_slice, encode_frame, encode_to_bytes, split_frame,
    DecodeOptions, FrameConfig, FrameHeader, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE,
    METADATA_LENGTH_SIZE,
};
pub use constants::{flags, ErrorCode, FrameType, VERSION};
pub use encoding::Encoding;
pub use error::{FrameError, Result};
pub use frame::{Cancel, ErrorFrame, Frame, FrameBody, Keepalive, Lease, Payload, Setup};
pub use parser::{Parser, TransportMode};
pub use serializer::Serializer;

#[cfg(feature = "async")]
pub use framed::FrameCodec;
