use std::fmt;

use rsprims_frame::{ErrorCode, FrameError, Payload};

/// Errors that can occur in connection operations.
#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    /// Frame encoding or decoding failed.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Transport I/O failed.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The setup handshake was rejected or malformed.
    #[error("setup failed ({code}): {message}")]
    Setup { code: ErrorCode, message: String },

    /// The operation is not valid in the current connection phase.
    #[error("cannot {operation} while {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: &'static str,
    },

    /// The connection is closed.
    #[error("connection closed: {0}")]
    Closed(CloseReason),

    /// No pending stream has this id; it was already resolved or never existed.
    #[error("no pending stream {0}")]
    UnknownStream(u32),

    /// Every stream id of this role is in use.
    #[error("stream ids exhausted")]
    StreamIdsExhausted,
}

/// Terminal failure of a single request/response stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The peer answered with an ERROR frame.
    #[error("peer returned {code}")]
    Remote { code: ErrorCode, payload: Payload },

    /// The stream was canceled locally.
    #[error("stream canceled")]
    Canceled,

    /// The connection closed before the stream resolved.
    #[error("connection closed: {0}")]
    ConnectionClosed(CloseReason),
}

impl StreamError {
    /// Returns true for business-logic failures (`APPLICATION_ERROR`).
    pub fn is_application_error(&self) -> bool {
        matches!(self, Self::Remote { code, .. } if *code == ErrorCode::APPLICATION_ERROR)
    }

    /// The ERROR payload, if the peer sent one.
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Self::Remote { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed by the local application.
    Local,
    /// The transport reached end of stream.
    TransportClosed,
    /// The transport failed.
    Transport(String),
    /// An inbound frame could not be decoded or violated the protocol.
    Protocol(String),
    /// The peer sent a connection-level ERROR frame.
    PeerError { code: ErrorCode, message: String },
    /// The setup handshake failed.
    SetupFailed { code: ErrorCode, message: String },
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("closed locally"),
            Self::TransportClosed => f.write_str("transport closed"),
            Self::Transport(err) => write!(f, "transport error: {err}"),
            Self::Protocol(err) => write!(f, "protocol error: {err}"),
            Self::PeerError { code, message } => write!(f, "peer error {code}: {message}"),
            Self::SetupFailed { code, message } => write!(f, "setup failed {code}: {message}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConnError>;
