//! Canonical wire constants: frame types, flag bits and error codes.
//!
//! These values are shared by both peers and must never be renumbered.

use std::fmt;

/// Protocol version carried in SETUP.
pub const VERSION: u32 = 0;

/// Frame type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FrameType {
    Setup = 0x0001,
    Lease = 0x0002,
    Keepalive = 0x0003,
    RequestResponse = 0x0004,
    RequestFnf = 0x0005,
    RequestStream = 0x0006,
    RequestSubscription = 0x0007,
    RequestChannel = 0x0008,
    RequestN = 0x0009,
    Cancel = 0x000A,
    Response = 0x000B,
    Error = 0x000C,
    MetadataPush = 0x000D,
    Next = 0x000E,
    Complete = 0x000F,
    NextComplete = 0x0010,
    Ext = 0xFFFF,
}

impl FrameType {
    /// Look up a frame type by its wire code.
    ///
    /// `0x0000` (RESERVED) and unassigned codes return `None`.
    pub fn from_code(code: u16) -> Option<Self> {
        let ty = match code {
            0x0001 => Self::Setup,
            0x0002 => Self::Lease,
            0x0003 => Self::Keepalive,
            0x0004 => Self::RequestResponse,
            0x0005 => Self::RequestFnf,
            0x0006 => Self::RequestStream,
            0x0007 => Self::RequestSubscription,
            0x0008 => Self::RequestChannel,
            0x0009 => Self::RequestN,
            0x000A => Self::Cancel,
            0x000B => Self::Response,
            0x000C => Self::Error,
            0x000D => Self::MetadataPush,
            0x000E => Self::Next,
            0x000F => Self::Complete,
            0x0010 => Self::NextComplete,
            0xFFFF => Self::Ext,
            _ => return None,
        };
        Some(ty)
    }

    /// Wire code.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Upper-case protocol name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Setup => "SETUP",
            Self::Lease => "LEASE",
            Self::Keepalive => "KEEPALIVE",
            Self::RequestResponse => "REQUEST_RESPONSE",
            Self::RequestFnf => "REQUEST_FNF",
            Self::RequestStream => "REQUEST_STREAM",
            Self::RequestSubscription => "REQUEST_SUBSCRIPTION",
            Self::RequestChannel => "REQUEST_CHANNEL",
            Self::RequestN => "REQUEST_N",
            Self::Cancel => "CANCEL",
            Self::Response => "RESPONSE",
            Self::Error => "ERROR",
            Self::MetadataPush => "METADATA_PUSH",
            Self::Next => "NEXT",
            Self::Complete => "COMPLETE",
            Self::NextComplete => "NEXT_COMPLETE",
            Self::Ext => "EXT",
        }
    }

    /// Returns true if the codec can encode and decode this type.
    ///
    /// Streaming and channel interaction models are recognized but not
    /// implemented; they fail decoding instead of being skipped.
    pub fn is_implemented(self) -> bool {
        matches!(
            self,
            Self::Setup
                | Self::Lease
                | Self::Keepalive
                | Self::RequestResponse
                | Self::Response
                | Self::Error
                | Self::Cancel
        )
    }

    /// Returns true if frames of this type may carry a metadata section.
    pub fn carries_metadata(self) -> bool {
        self.is_implemented() && self != Self::Keepalive
    }

    /// Flag bits whose value is derived from the frame body on encode.
    pub(crate) fn derived_flags(self) -> u16 {
        match self {
            Self::Setup => flags::METADATA | flags::LEASE,
            Self::Keepalive => flags::KEEPALIVE_RESPONSE,
            ty if ty.carries_metadata() => flags::METADATA,
            _ => 0,
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Header flag bits.
///
/// Bits `0x2000` and `0x1000` are reused with a type-specific meaning.
pub mod flags {
    /// Receiver may ignore the frame if it does not understand it.
    pub const IGNORE: u16 = 0x8000;
    /// A metadata section is present.
    pub const METADATA: u16 = 0x4000;

    /// SETUP: the client will honor LEASE frames.
    pub const LEASE: u16 = 0x2000;
    /// SETUP: strict interpretation requested.
    pub const STRICT: u16 = 0x1000;

    /// KEEPALIVE: this frame answers a keepalive request.
    pub const KEEPALIVE_RESPONSE: u16 = 0x2000;

    /// RESPONSE: more fragments follow.
    pub const FOLLOWS: u16 = 0x2000;
    /// RESPONSE: the stream is complete.
    pub const COMPLETE: u16 = 0x1000;
}

/// ERROR frame code.
///
/// Codes outside the known taxonomy are carried through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const INVALID_SETUP: Self = Self(0x0000_0001);
    pub const UNSUPPORTED_SETUP: Self = Self(0x0000_0002);
    pub const REJECTED_SETUP: Self = Self(0x0000_0003);
    pub const CONNECTION_ERROR: Self = Self(0x0000_0101);
    pub const APPLICATION_ERROR: Self = Self(0x0000_0201);
    pub const REJECTED: Self = Self(0x0000_0202);
    pub const CANCELED: Self = Self(0x0000_0203);
    pub const INVALID: Self = Self(0x0000_0204);
    pub const RESERVED: Self = Self(0xFFFF_FFFF);

    /// Protocol name for known codes.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::INVALID_SETUP => "INVALID_SETUP",
            Self::UNSUPPORTED_SETUP => "UNSUPPORTED_SETUP",
            Self::REJECTED_SETUP => "REJECTED_SETUP",
            Self::CONNECTION_ERROR => "CONNECTION_ERROR",
            Self::APPLICATION_ERROR => "APPLICATION_ERROR",
            Self::REJECTED => "REJECTED",
            Self::CANCELED => "CANCELED",
            Self::INVALID => "INVALID",
            Self::RESERVED => "RESERVED",
            _ => return None,
        };
        Some(name)
    }

    /// Returns true for codes in the known taxonomy.
    pub fn is_known(self) -> bool {
        self.name().is_some()
    }

    /// Returns true for codes that reject the SETUP handshake.
    pub fn is_setup_error(self) -> bool {
        matches!(
            self,
            Self::INVALID_SETUP | Self::UNSUPPORTED_SETUP | Self::REJECTED_SETUP
        )
    }

    /// Returns true for codes that terminate the whole connection.
    pub fn is_connection_fatal(self) -> bool {
        self.is_setup_error() || self == Self::CONNECTION_ERROR
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "UNKNOWN(0x{:08x})", self.0),
        }
    }
}

impl From<u32> for ErrorCode {
    fn from(code: u32) -> Self {
        Self(code)
    }
}
