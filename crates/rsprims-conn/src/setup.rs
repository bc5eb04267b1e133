//! SETUP negotiation: validating the first frame and exposing what was agreed.

use std::time::Duration;

use rsprims_frame::{flags, Encoding, ErrorCode, Payload, Result as FrameResult, Setup, VERSION};
use tracing::debug;

/// What the server learned from an accepted SETUP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupInfo {
    pub version: u32,
    pub keepalive: Duration,
    pub max_lifetime: Duration,
    /// The client will honor LEASE frames.
    pub lease: bool,
    /// The client requested strict interpretation.
    pub strict: bool,
    pub metadata_encoding: Encoding,
    pub data_encoding: Encoding,
    /// Setup metadata and data sent by the client.
    pub payload: Payload,
}

impl SetupInfo {
    /// Setup metadata decoded with the negotiated metadata encoding.
    pub fn metadata_text(&self) -> FrameResult<Option<String>> {
        self.payload.metadata_text(&self.metadata_encoding)
    }

    /// Setup data decoded with the negotiated data encoding.
    pub fn data_text(&self) -> FrameResult<String> {
        self.payload.data_text(&self.data_encoding)
    }
}

/// A SETUP frame the server refuses, with the code to answer it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SetupRejection {
    pub code: ErrorCode,
    pub message: String,
}

/// Validate an inbound SETUP body.
pub(crate) fn accept_setup(
    setup: Setup,
    frame_flags: u16,
) -> std::result::Result<SetupInfo, SetupRejection> {
    if setup.version != VERSION {
        return Err(SetupRejection {
            code: ErrorCode::UNSUPPORTED_SETUP,
            message: format!(
                "unsupported protocol version {} (expected {VERSION})",
                setup.version
            ),
        });
    }

    let info = SetupInfo {
        version: setup.version,
        keepalive: Duration::from_millis(u64::from(setup.keepalive)),
        max_lifetime: Duration::from_millis(u64::from(setup.max_lifetime)),
        lease: setup.lease,
        strict: frame_flags & flags::STRICT != 0,
        metadata_encoding: Encoding::from_name(&setup.metadata_encoding),
        data_encoding: Encoding::from_name(&setup.data_encoding),
        payload: setup.payload,
    };
    debug!(
        metadata_encoding = %info.metadata_encoding,
        data_encoding = %info.data_encoding,
        keepalive_ms = setup.keepalive,
        lease = info.lease,
        "accepted setup"
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_current_version() {
        let mut setup = Setup::new(1000, 4000, "utf-8", "ascii");
        setup.payload = Payload::new("dark side").with_metadata("of the moon");
        let info = accept_setup(setup, flags::STRICT).unwrap();

        assert_eq!(info.keepalive, Duration::from_secs(1));
        assert!(info.strict);
        assert_eq!(info.data_encoding, Encoding::Ascii);
        assert_eq!(info.metadata_text().unwrap().as_deref(), Some("of the moon"));
        assert_eq!(info.data_text().unwrap(), "dark side");
    }

    #[test]
    fn rejects_other_versions() {
        let setup = Setup {
            version: 7,
            ..Setup::new(0, 0, "utf-8", "utf-8")
        };
        let rejection = accept_setup(setup, 0).unwrap_err();
        assert_eq!(rejection.code, ErrorCode::UNSUPPORTED_SETUP);
    }
}
