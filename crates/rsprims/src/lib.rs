//! ReactiveSocket-style request/response protocol.
//!
//! rsprims multiplexes request/response exchanges over a single byte stream
//! or message transport, with a compact binary frame format and a SETUP
//! handshake.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP and Unix domain socket byte streams
//! - [`frame`]: wire constants, frame model, codec and transform adapters
//! - [`conn`]: connection state machine and stream handles (behind `conn` feature)

/// Re-export transport types.
pub mod transport {
    pub use rsprims_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use rsprims_frame::*;
}

/// Re-export connection types (requires `conn` feature).
#[cfg(feature = "conn")]
pub mod conn {
    pub use rsprims_conn::*;
}
