//! ReactiveSocket connections with multiplexed request/response streams.
//!
//! A [`Connection`] runs the SETUP handshake, allocates stream ids, routes
//! RESPONSE/ERROR/CANCEL frames to the stream they belong to and answers
//! keepalives. Requesters get a [`ResponseStream`] to await; responders
//! receive a [`RequestStream`] through [`ConnectionEvents`].
//!
//! [`ConnectionState`] is the I/O-free state machine underneath, usable on
//! its own for custom drivers.

pub mod config;
mod connection;
mod driver;
pub mod error;
pub mod lease;
pub mod setup;
pub mod state;
pub mod stream;
pub mod transport;

pub use config::{ConnectionConfig, Role};
pub use connection::{Connection, ConnectionEvent, ConnectionEvents};
pub use error::{CloseReason, ConnError, Result, StreamError};
pub use lease::LeaseGrant;
pub use setup::SetupInfo;
pub use state::{ConnectionAction, ConnectionState, Phase, StateEvent, StreamOutcome, StreamSide};
pub use stream::{RequestStream, ResponseStream};
pub use transport::{MessageFrames, MessageSink};
