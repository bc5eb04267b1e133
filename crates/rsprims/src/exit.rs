use std::fmt;
use std::io;

use rsprims_conn::{CloseReason, ConnError, StreamError};
use rsprims_frame::FrameError;
use rsprims_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
/// The peer answered with an ERROR frame.
pub const REMOTE_ERROR: i32 = 2;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PROTOCOL_ERROR: i32 = 4;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidEndpoint { .. } | TransportError::UnsupportedScheme(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::FrameTooLarge { .. }
        | FrameError::InvalidEncodingName(_)
        | FrameError::InvalidText { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(PROTOCOL_ERROR, format!("{context}: {other}")),
    }
}

pub fn conn_error(context: &str, err: ConnError) -> CliError {
    match err {
        ConnError::Frame(err) => frame_error(context, err),
        ConnError::Io(err) => io_error(context, err),
        ConnError::Closed(reason) => close_error(context, &reason),
        ConnError::Setup { .. } => CliError::new(PROTOCOL_ERROR, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn stream_error(context: &str, err: StreamError) -> CliError {
    match err {
        StreamError::Remote { .. } => CliError::new(REMOTE_ERROR, format!("{context}: {err}")),
        StreamError::ConnectionClosed(reason) => close_error(context, &reason),
        StreamError::Canceled => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

fn close_error(context: &str, reason: &CloseReason) -> CliError {
    let code = match reason {
        CloseReason::Local => FAILURE,
        CloseReason::TransportClosed | CloseReason::Transport(_) => TRANSPORT_ERROR,
        CloseReason::Protocol(_)
        | CloseReason::PeerError { .. }
        | CloseReason::SetupFailed { .. } => PROTOCOL_ERROR,
    };
    CliError::new(code, format!("{context}: connection closed: {reason}"))
}

#[cfg(test)]
mod tests {
    use rsprims_frame::{ErrorCode, Payload};

    use super::*;

    #[test]
    fn remote_errors_map_to_their_own_code() {
        let err = stream_error(
            "request failed",
            StreamError::Remote {
                code: ErrorCode::APPLICATION_ERROR,
                payload: Payload::new("nope"),
            },
        );
        assert_eq!(err.code, REMOTE_ERROR);
    }

    #[test]
    fn refused_connection_is_a_transport_error() {
        let err = transport_error(
            "connect failed",
            TransportError::Connect {
                endpoint: "tcp://127.0.0.1:1".to_string(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            },
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert!(err.message.starts_with("connect failed: "));
    }

    #[test]
    fn setup_rejection_is_a_protocol_error() {
        let err = conn_error(
            "request failed",
            ConnError::Closed(CloseReason::SetupFailed {
                code: ErrorCode::UNSUPPORTED_SETUP,
                message: "unsupported version 3".to_string(),
            }),
        );
        assert_eq!(err.code, PROTOCOL_ERROR);
    }
}
