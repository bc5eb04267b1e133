use crate::constants::FrameType;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The header length field disagrees with the actual frame length.
    #[error("header length {header} does not match buffer length {actual}")]
    LengthMismatch { header: u32, actual: usize },

    /// The buffer ended before a field could be read.
    #[error("frame truncated reading {field} (needed {needed} bytes, {available} available)")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    /// A streamed length prefix is below the header size.
    #[error("invalid frame length prefix {0}")]
    InvalidLengthPrefix(u32),

    /// The metadata length field is smaller than its own width.
    #[error("malformed metadata length {0}")]
    MalformedMetadataLength(u32),

    /// The frame type is a known code this codec does not implement.
    #[error("frame type not implemented: {}", .0.name())]
    UnimplementedType(FrameType),

    /// The frame type code is not recognized at all.
    #[error("unknown frame type 0x{0:04x}")]
    UnknownType(u16),

    /// A setup encoding name is not 7-bit ASCII or exceeds 255 bytes.
    #[error("invalid encoding name '{0}'")]
    InvalidEncodingName(String),

    /// Payload bytes are not valid text in the negotiated encoding.
    #[error("payload is not valid {encoding} text")]
    InvalidText { encoding: String },

    /// The frame exceeds the configured maximum size.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
