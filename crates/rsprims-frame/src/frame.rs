use bytes::Bytes;

use crate::codec::{FrameHeader, HEADER_SIZE, METADATA_LENGTH_SIZE};
use crate::constants::{flags, ErrorCode, FrameType, VERSION};
use crate::encoding::Encoding;
use crate::error::Result;

/// A structured protocol frame.
///
/// `flags` holds the caller-controlled bits only. Bits derived from the body
/// (METADATA, SETUP's LEASE, KEEPALIVE's response bit) are computed on encode and
/// stripped on decode, so `decode(encode(f)) == f` holds; use
/// [`Frame::wire_flags`] for the full mask as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream_id: u32,
    pub flags: u16,
    pub body: FrameBody,
}

/// Type-specific frame contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    Setup(Setup),
    Lease(Lease),
    Keepalive(Keepalive),
    RequestResponse(Payload),
    Response(Payload),
    Error(ErrorFrame),
    Cancel(Cancel),
}

/// Metadata and data carried by a request, response or error.
///
/// `metadata: None` means the METADATA flag is absent, which is distinct from
/// present-but-empty metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub metadata: Option<Bytes>,
    pub data: Bytes,
}

/// SETUP body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setup {
    pub version: u32,
    /// Keepalive interval in milliseconds.
    pub keepalive: u32,
    /// Max lifetime without a keepalive, in milliseconds.
    pub max_lifetime: u32,
    /// Mirrors the LEASE flag.
    pub lease: bool,
    pub metadata_encoding: String,
    pub data_encoding: String,
    pub payload: Payload,
}

/// LEASE body: permission to send `budget` requests within `ttl` milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub ttl: u32,
    pub budget: u32,
    pub metadata: Option<Bytes>,
}

/// KEEPALIVE body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keepalive {
    /// Mirrors the KEEPALIVE_RESPONSE flag.
    pub response: bool,
    pub data: Bytes,
}

/// ERROR body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorFrame {
    pub code: ErrorCode,
    pub payload: Payload,
}

/// CANCEL body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cancel {
    pub metadata: Option<Bytes>,
}

impl Payload {
    /// A payload with data and no metadata.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            metadata: None,
            data: data.into(),
        }
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: impl Into<Bytes>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// Decode the metadata as text, if present.
    pub fn metadata_text(&self, encoding: &Encoding) -> Result<Option<String>> {
        self.metadata
            .as_ref()
            .map(|md| encoding.decode(md))
            .transpose()
    }

    /// Decode the data as text.
    pub fn data_text(&self, encoding: &Encoding) -> Result<String> {
        encoding.decode(&self.data)
    }

    pub(crate) fn encoded_len(&self) -> usize {
        metadata_len(self.metadata.as_ref()) + self.data.len()
    }
}

impl Setup {
    /// A SETUP body with the current protocol version and no lease.
    pub fn new(
        keepalive: u32,
        max_lifetime: u32,
        metadata_encoding: impl Into<String>,
        data_encoding: impl Into<String>,
    ) -> Self {
        Self {
            version: VERSION,
            keepalive,
            max_lifetime,
            lease: false,
            metadata_encoding: metadata_encoding.into(),
            data_encoding: data_encoding.into(),
            payload: Payload::default(),
        }
    }
}

impl Frame {
    /// SETUP frame on stream 0.
    pub fn setup(setup: Setup) -> Self {
        Self::connection_scoped(FrameBody::Setup(setup))
    }

    /// LEASE frame on stream 0.
    pub fn lease(ttl: u32, budget: u32, metadata: Option<Bytes>) -> Self {
        Self::connection_scoped(FrameBody::Lease(Lease {
            ttl,
            budget,
            metadata,
        }))
    }

    /// KEEPALIVE frame on stream 0.
    pub fn keepalive(response: bool, data: impl Into<Bytes>) -> Self {
        Self::connection_scoped(FrameBody::Keepalive(Keepalive {
            response,
            data: data.into(),
        }))
    }

    /// REQUEST_RESPONSE frame.
    pub fn request_response(stream_id: u32, payload: Payload) -> Self {
        Self {
            stream_id,
            flags: 0,
            body: FrameBody::RequestResponse(payload),
        }
    }

    /// RESPONSE frame.
    pub fn response(stream_id: u32, payload: Payload) -> Self {
        Self {
            stream_id,
            flags: 0,
            body: FrameBody::Response(payload),
        }
    }

    /// ERROR frame.
    pub fn error(stream_id: u32, code: ErrorCode, payload: Payload) -> Self {
        Self {
            stream_id,
            flags: 0,
            body: FrameBody::Error(ErrorFrame { code, payload }),
        }
    }

    /// CANCEL frame.
    pub fn cancel(stream_id: u32, metadata: Option<Bytes>) -> Self {
        Self {
            stream_id,
            flags: 0,
            body: FrameBody::Cancel(Cancel { metadata }),
        }
    }

    fn connection_scoped(body: FrameBody) -> Self {
        Self {
            stream_id: 0,
            flags: 0,
            body,
        }
    }

    /// Add caller-controlled flag bits.
    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags |= flags;
        self
    }

    /// The frame type implied by the body.
    pub fn frame_type(&self) -> FrameType {
        match &self.body {
            FrameBody::Setup(_) => FrameType::Setup,
            FrameBody::Lease(_) => FrameType::Lease,
            FrameBody::Keepalive(_) => FrameType::Keepalive,
            FrameBody::RequestResponse(_) => FrameType::RequestResponse,
            FrameBody::Response(_) => FrameType::Response,
            FrameBody::Error(_) => FrameType::Error,
            FrameBody::Cancel(_) => FrameType::Cancel,
        }
    }

    /// Metadata section, if present.
    pub fn metadata(&self) -> Option<&Bytes> {
        match &self.body {
            FrameBody::Setup(setup) => setup.payload.metadata.as_ref(),
            FrameBody::Lease(lease) => lease.metadata.as_ref(),
            FrameBody::Keepalive(_) => None,
            FrameBody::RequestResponse(payload) | FrameBody::Response(payload) => {
                payload.metadata.as_ref()
            }
            FrameBody::Error(error) => error.payload.metadata.as_ref(),
            FrameBody::Cancel(cancel) => cancel.metadata.as_ref(),
        }
    }

    /// Flag mask as encoded on the wire.
    pub fn wire_flags(&self) -> u16 {
        let ty = self.frame_type();
        let mut wire = self.flags & !ty.derived_flags();
        if ty.carries_metadata() && self.metadata().is_some() {
            wire |= flags::METADATA;
        }
        match &self.body {
            FrameBody::Setup(setup) if setup.lease => wire |= flags::LEASE,
            FrameBody::Keepalive(keepalive) if keepalive.response => {
                wire |= flags::KEEPALIVE_RESPONSE
            }
            _ => {}
        }
        wire
    }

    /// Total encoded size, header included.
    pub fn encoded_len(&self) -> usize {
        let body = match &self.body {
            FrameBody::Setup(setup) => {
                12 + 1
                    + setup.metadata_encoding.len()
                    + 1
                    + setup.data_encoding.len()
                    + setup.payload.encoded_len()
            }
            FrameBody::Lease(lease) => 8 + metadata_len(lease.metadata.as_ref()),
            FrameBody::Keepalive(keepalive) => keepalive.data.len(),
            FrameBody::RequestResponse(payload) | FrameBody::Response(payload) => {
                payload.encoded_len()
            }
            FrameBody::Error(error) => 4 + error.payload.encoded_len(),
            FrameBody::Cancel(cancel) => metadata_len(cancel.metadata.as_ref()),
        };
        HEADER_SIZE + body
    }

    /// The header this frame encodes to.
    ///
    /// `length` saturates at `u32::MAX`; encoding such a frame fails.
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            length: u32::try_from(self.encoded_len()).unwrap_or(u32::MAX),
            frame_type: self.frame_type().code(),
            flags: self.wire_flags(),
            stream_id: self.stream_id,
        }
    }
}

fn metadata_len(metadata: Option<&Bytes>) -> usize {
    metadata.map_or(0, |md| METADATA_LENGTH_SIZE + md.len())
}
