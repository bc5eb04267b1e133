//! Byte-stream transports for rsprims.
//!
//! Provides a unified duplex stream over the transports a connection can run on:
//! - TCP (`tcp://host:port`)
//! - Unix domain sockets (`unix:///path/to.sock`, Unix only)
//!
//! This is the lowest layer of rsprims. Everything above it only sees an
//! [`RsStream`], which implements `AsyncRead + AsyncWrite` and delivers an
//! undelimited byte stream. Message-oriented transports (WebSocket adapters and
//! the like) plug in one layer up, in `rsprims-conn`.

pub mod endpoint;
pub mod error;
pub mod listener;
pub mod stream;

pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use listener::RsListener;
pub use stream::{connect, RsStream};
