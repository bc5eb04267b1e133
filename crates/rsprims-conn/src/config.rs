use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use rsprims_frame::{Encoding, FrameConfig, Payload, Setup};

/// Which side of the connection this peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends SETUP and allocates odd stream ids.
    Client,
    /// Expects SETUP first and allocates even stream ids.
    Server,
}

impl Role {
    pub(crate) fn first_stream_id(self) -> u32 {
        match self {
            Self::Client => 1,
            Self::Server => 2,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Server => f.write_str("server"),
        }
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub role: Role,
    /// Metadata encoding advertised in SETUP (client).
    pub metadata_encoding: Encoding,
    /// Data encoding advertised in SETUP (client).
    pub data_encoding: Encoding,
    /// Metadata carried in SETUP (client).
    pub setup_metadata: Option<Bytes>,
    /// Data carried in SETUP (client).
    pub setup_data: Bytes,
    /// Keepalive interval advertised in SETUP; the client pings at this rate.
    /// Zero disables client keepalives.
    pub keepalive: Duration,
    /// Max lifetime without keepalive, advertised in SETUP.
    pub max_lifetime: Duration,
    /// Advertise that LEASE frames will be honored.
    pub lease: bool,
    /// Answer keepalive requests automatically.
    pub ack_keepalives: bool,
    /// Outbound frame queue depth before senders wait.
    pub write_queue: usize,
    /// Event queue depth before the driver waits on the application.
    pub event_queue: usize,
    /// Frame codec configuration.
    pub frame: FrameConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            role: Role::Client,
            metadata_encoding: Encoding::Utf8,
            data_encoding: Encoding::Utf8,
            setup_metadata: None,
            setup_data: Bytes::new(),
            keepalive: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(120),
            lease: false,
            ack_keepalives: true,
            write_queue: 1024,
            event_queue: 256,
            frame: FrameConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Default client configuration.
    pub fn client() -> Self {
        Self::default()
    }

    /// Default server configuration.
    pub fn server() -> Self {
        Self {
            role: Role::Server,
            ..Self::default()
        }
    }

    /// The SETUP body a client sends for this configuration.
    pub(crate) fn setup_body(&self) -> Setup {
        let mut setup = Setup::new(
            duration_ms(self.keepalive),
            duration_ms(self.max_lifetime),
            self.metadata_encoding.name(),
            self.data_encoding.name(),
        );
        setup.lease = self.lease;
        setup.payload = Payload {
            metadata: self.setup_metadata.clone(),
            data: self.setup_data.clone(),
        };
        setup
    }
}

fn duration_ms(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}
