use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use futures_util::Sink;
use rsprims_frame::{Frame, FrameCodec, FrameError, Payload};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::debug;

use crate::config::{ConnectionConfig, Role};
use crate::driver::{write_frames, Command, Driver};
use crate::error::{CloseReason, ConnError, Result};
use crate::lease::LeaseGrant;
use crate::setup::SetupInfo;
use crate::stream::{RequestStream, ResponseStream};
use crate::transport::{MessageFrames, MessageSink};

/// Connection-level notification.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The session is established.
    Ready,
    /// The server accepted the client's SETUP.
    Setup(SetupInfo),
    /// The setup handshake failed or was repeated.
    SetupError(ConnError),
    /// The peer issued a request; answer it through the handle.
    Request(RequestStream),
    /// The peer granted a lease.
    Lease(LeaseGrant),
    /// The connection closed. Always the last event.
    Closed(CloseReason),
}

/// Receiver for [`ConnectionEvent`]s.
///
/// Events are queued with a bound; a receiver that stops reading eventually
/// stops inbound frame processing. Answers to requests already delivered still
/// go out while the queue is full.
#[derive(Debug)]
pub struct ConnectionEvents {
    rx: mpsc::Receiver<ConnectionEvent>,
    // Keeps the connection open while events are still being consumed.
    _commands: mpsc::Sender<Command>,
}

impl ConnectionEvents {
    /// Next event, or `None` after [`ConnectionEvent::Closed`] was delivered.
    pub async fn next(&mut self) -> Option<ConnectionEvent> {
        self.rx.recv().await
    }
}

impl Stream for ConnectionEvents {
    type Item = ConnectionEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ConnectionEvent>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Handle to a multiplexed request/response connection.
///
/// Cheap to clone; all clones drive the same connection task. Constructors
/// spawn onto the current tokio runtime.
#[derive(Debug, Clone)]
pub struct Connection {
    commands: mpsc::Sender<Command>,
    control: mpsc::UnboundedSender<Command>,
    closed: watch::Receiver<Option<CloseReason>>,
    role: Role,
}

impl Connection {
    /// Client over an undelimited byte stream.
    pub fn client<T>(io: T, config: ConnectionConfig) -> (Self, ConnectionEvents)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::streamed(io, with_role(config, Role::Client))
    }

    /// Server over an undelimited byte stream.
    pub fn server<T>(io: T, config: ConnectionConfig) -> (Self, ConnectionEvents)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::streamed(io, with_role(config, Role::Server))
    }

    /// Client over a message transport where each message is one frame.
    pub fn client_messages<S, K>(
        incoming: S,
        outgoing: K,
        config: ConnectionConfig,
    ) -> (Self, ConnectionEvents)
    where
        S: Stream<Item = io::Result<Bytes>> + Send + Unpin + 'static,
        K: Sink<Bytes, Error = io::Error> + Send + Unpin + 'static,
    {
        Self::messages(incoming, outgoing, with_role(config, Role::Client))
    }

    /// Server over a message transport where each message is one frame.
    pub fn server_messages<S, K>(
        incoming: S,
        outgoing: K,
        config: ConnectionConfig,
    ) -> (Self, ConnectionEvents)
    where
        S: Stream<Item = io::Result<Bytes>> + Send + Unpin + 'static,
        K: Sink<Bytes, Error = io::Error> + Send + Unpin + 'static,
    {
        Self::messages(incoming, outgoing, with_role(config, Role::Server))
    }

    /// Connection over already-decoded frame halves, with the role from `config`.
    pub fn with_transport<R, W>(
        inbound: R,
        outbound: W,
        config: ConnectionConfig,
    ) -> (Self, ConnectionEvents)
    where
        R: Stream<Item = std::result::Result<Frame, FrameError>> + Send + Unpin + 'static,
        W: Sink<Frame, Error = FrameError> + Send + Unpin + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::channel(config.write_queue.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(config.event_queue.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(config.write_queue.max(1));
        let (failed_tx, failed_rx) = oneshot::channel();
        let (closed_tx, closed_rx) = watch::channel(None);

        debug!(role = %config.role, "starting connection");
        let writer = tokio::spawn(write_frames(outbound, outbound_rx, failed_tx));
        let driver = Driver::new(
            &config,
            commands_rx,
            control_rx,
            control_tx.clone(),
            events_tx,
            outbound_tx,
            closed_tx,
        );
        tokio::spawn(driver.run(inbound, writer, failed_rx));

        let connection = Self {
            commands: commands_tx.clone(),
            control: control_tx,
            closed: closed_rx,
            role: config.role,
        };
        let events = ConnectionEvents {
            rx: events_rx,
            _commands: commands_tx,
        };
        (connection, events)
    }

    fn streamed<T>(io: T, config: ConnectionConfig) -> (Self, ConnectionEvents)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(io);
        let codec = FrameCodec::new(config.frame.clone());
        Self::with_transport(
            FramedRead::new(read, codec.clone()),
            FramedWrite::new(write, codec),
            config,
        )
    }

    fn messages<S, K>(incoming: S, outgoing: K, config: ConnectionConfig) -> (Self, ConnectionEvents)
    where
        S: Stream<Item = io::Result<Bytes>> + Send + Unpin + 'static,
        K: Sink<Bytes, Error = io::Error> + Send + Unpin + 'static,
    {
        let inbound = MessageFrames::new(incoming, config.frame.clone());
        let outbound = MessageSink::new(outgoing, config.frame.clone());
        Self::with_transport(inbound, outbound, config)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Send a request on a fresh stream and return its handle.
    pub async fn request(&self, payload: Payload) -> Result<ResponseStream> {
        let (outcome, outcome_rx) = oneshot::channel();
        let (reply, reply_rx) = oneshot::channel();
        self.command(Command::Request {
            payload: payload.clone(),
            outcome,
            reply,
        })
        .await?;
        let stream_id = reply_rx.await.map_err(|_| self.closed_error())??;
        Ok(ResponseStream::new(
            stream_id,
            payload,
            outcome_rx,
            self.control.clone(),
        ))
    }

    /// Grant the peer `budget` requests within `ttl` milliseconds.
    pub async fn grant_lease(&self, ttl: u32, budget: u32, metadata: Option<Bytes>) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.command(Command::GrantLease {
            ttl,
            budget,
            metadata,
            reply,
        })
        .await?;
        reply_rx.await.map_err(|_| self.closed_error())?
    }

    /// The most recent lease granted by the peer.
    pub async fn lease(&self) -> Option<LeaseGrant> {
        let (reply, reply_rx) = oneshot::channel();
        self.command(Command::Lease { reply }).await.ok()?;
        reply_rx.await.ok().flatten()
    }

    /// Close the connection and wait until it is closed.
    pub async fn close(&self) -> CloseReason {
        let _ = self.command(Command::Close).await;
        self.closed().await
    }

    /// Wait until the connection closes.
    pub async fn closed(&self) -> CloseReason {
        let mut closed = self.closed.clone();
        let reason = match closed.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or(CloseReason::Local),
            Err(_) => CloseReason::Local,
        };
        reason
    }

    pub fn is_closed(&self) -> bool {
        self.closed.borrow().is_some() || self.commands.is_closed()
    }

    async fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| self.closed_error())
    }

    fn closed_error(&self) -> ConnError {
        ConnError::Closed(self.closed.borrow().clone().unwrap_or(CloseReason::Local))
    }
}

fn with_role(config: ConnectionConfig, role: Role) -> ConnectionConfig {
    ConnectionConfig { role, ..config }
}
