//! Connection state machine.
//!
//! `ConnectionState` owns the phase, the stream routing table and the lease
//! record. It performs no I/O: every method returns the [`ConnectionAction`]s
//! the driver must carry out, in order.
//!
//! ```text
//!   client:  Connecting ──start()/SETUP sent──────────────────────> Ready
//!   server:  Connecting ──start()──> SetupPending ──SETUP──────────> Ready
//!                                         │                           │
//!                     non-SETUP / decode  │                           │ fatal ERROR / decode
//!                     failure / bad SETUP ↓                           ↓ failure / close()
//!                                       Closed <──────────────────── Closed
//! ```

use std::collections::HashMap;

use bytes::Bytes;
use rsprims_frame::{Encoding, ErrorCode, Frame, FrameBody, FrameError, Payload};
use tracing::{debug, info, trace, warn};

use crate::config::{ConnectionConfig, Role};
use crate::error::{CloseReason, ConnError, Result, StreamError};
use crate::lease::LeaseGrant;
use crate::setup::{accept_setup, SetupInfo, SetupRejection};

/// Terminal result delivered to a requester stream.
pub type StreamOutcome = std::result::Result<Payload, StreamError>;

/// Connection lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    /// Server waiting for SETUP.
    SetupPending,
    Ready,
    Closed,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::SetupPending => "setup-pending",
            Self::Ready => "ready",
            Self::Closed => "closed",
        }
    }
}

/// Which end of a stream this peer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSide {
    /// Sent the REQUEST_RESPONSE and awaits the answer.
    Requester,
    /// Received the REQUEST_RESPONSE and owes the answer.
    Responder,
}

/// Notification for the application.
#[derive(Debug)]
pub enum StateEvent {
    Ready,
    Setup(SetupInfo),
    SetupError(ConnError),
    Request { stream_id: u32, payload: Payload },
    Lease(LeaseGrant),
}

/// Work the driver must carry out.
#[derive(Debug)]
pub enum ConnectionAction {
    /// Write this frame to the transport.
    Send(Frame),
    /// Notify the application.
    Emit(StateEvent),
    /// Deliver the terminal result of a requester stream.
    Resolve { stream_id: u32, outcome: StreamOutcome },
    /// Signal cancellation to the handler of a responder stream.
    CancelResponder(u32),
    /// Shut the transport down.
    Close(CloseReason),
}

/// Pure connection state machine.
#[derive(Debug)]
pub struct ConnectionState {
    role: Role,
    phase: Phase,
    streams: HashMap<u32, StreamSide>,
    next_stream_id: u32,
    metadata_encoding: Encoding,
    data_encoding: Encoding,
    lease: Option<LeaseGrant>,
    ack_keepalives: bool,
    max_frame_size: usize,
    setup: Option<rsprims_frame::Setup>,
    close_reason: Option<CloseReason>,
}

impl ConnectionState {
    /// Create a state machine in [`Phase::Connecting`].
    pub fn new(config: &ConnectionConfig) -> Self {
        let setup = (config.role == Role::Client).then(|| config.setup_body());
        Self {
            role: config.role,
            phase: Phase::Connecting,
            streams: HashMap::new(),
            next_stream_id: config.role.first_stream_id(),
            metadata_encoding: config.metadata_encoding.clone(),
            data_encoding: config.data_encoding.clone(),
            lease: None,
            ack_keepalives: config.ack_keepalives,
            max_frame_size: config.frame.max_frame_size,
            setup,
            close_reason: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Negotiated metadata encoding.
    pub fn metadata_encoding(&self) -> &Encoding {
        &self.metadata_encoding
    }

    /// Negotiated data encoding.
    pub fn data_encoding(&self) -> &Encoding {
        &self.data_encoding
    }

    /// The most recent lease received from the peer.
    pub fn lease(&self) -> Option<&LeaseGrant> {
        self.lease.as_ref()
    }

    /// Number of streams awaiting a terminal state.
    pub fn pending_streams(&self) -> usize {
        self.streams.len()
    }

    /// Side of a pending stream.
    pub fn stream_side(&self, stream_id: u32) -> Option<StreamSide> {
        self.streams.get(&stream_id).copied()
    }

    /// Why the connection closed, once closed.
    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    /// Begin the session once the transport is connected.
    ///
    /// The client sends SETUP and is ready immediately; the server waits for SETUP.
    pub fn start(&mut self) -> Result<Vec<ConnectionAction>> {
        if self.phase != Phase::Connecting {
            return Err(self.invalid_phase("start"));
        }

        match self.role {
            Role::Client => {
                let setup = self.setup.take().unwrap_or_else(|| {
                    rsprims_frame::Setup::new(
                        0,
                        0,
                        self.metadata_encoding.name(),
                        self.data_encoding.name(),
                    )
                });
                self.phase = Phase::Ready;
                debug!(role = %self.role, "setup sent, connection ready");
                Ok(vec![
                    ConnectionAction::Send(Frame::setup(setup)),
                    ConnectionAction::Emit(StateEvent::Ready),
                ])
            }
            Role::Server => {
                self.phase = Phase::SetupPending;
                debug!(role = %self.role, "awaiting setup");
                Ok(Vec::new())
            }
        }
    }

    /// Issue a request on a fresh stream id.
    pub fn send_request(&mut self, payload: Payload) -> Result<(u32, Vec<ConnectionAction>)> {
        self.ensure_ready("send request")?;
        // Encoded size does not depend on the stream id.
        let mut frame = Frame::request_response(0, payload);
        self.check_size(&frame)?;
        let stream_id = self.allocate_stream_id()?;
        frame.stream_id = stream_id;
        self.streams.insert(stream_id, StreamSide::Requester);
        if let Some(lease) = self.lease.as_mut() {
            lease.record_request();
        }
        trace!(stream_id, "request sent");
        Ok((stream_id, vec![ConnectionAction::Send(frame)]))
    }

    /// Answer a responder stream with a RESPONSE.
    pub fn respond(&mut self, stream_id: u32, payload: Payload) -> Result<Vec<ConnectionAction>> {
        let frame = Frame::response(stream_id, payload);
        self.check_size(&frame)?;
        self.take_responder(stream_id, "respond")?;
        trace!(stream_id, "response sent");
        Ok(vec![ConnectionAction::Send(frame)])
    }

    /// Answer a responder stream with an ERROR.
    pub fn respond_error(
        &mut self,
        stream_id: u32,
        code: ErrorCode,
        payload: Payload,
    ) -> Result<Vec<ConnectionAction>> {
        let frame = Frame::error(stream_id, code, payload);
        self.check_size(&frame)?;
        self.take_responder(stream_id, "respond with error")?;
        trace!(stream_id, %code, "error sent");
        Ok(vec![ConnectionAction::Send(frame)])
    }

    /// Cancel a pending requester stream.
    ///
    /// Canceling a stream that already resolved is a no-op.
    pub fn cancel(&mut self, stream_id: u32) -> Vec<ConnectionAction> {
        if self.stream_side(stream_id) != Some(StreamSide::Requester) {
            debug!(stream_id, "cancel for stream that is not pending; ignoring");
            return Vec::new();
        }
        self.streams.remove(&stream_id);
        trace!(stream_id, "request canceled");
        vec![
            ConnectionAction::Send(Frame::cancel(stream_id, None)),
            ConnectionAction::Resolve {
                stream_id,
                outcome: Err(StreamError::Canceled),
            },
        ]
    }

    /// Send a LEASE granting `budget` requests within `ttl` milliseconds.
    pub fn grant_lease(
        &mut self,
        ttl: u32,
        budget: u32,
        metadata: Option<Bytes>,
    ) -> Result<Vec<ConnectionAction>> {
        self.ensure_ready("grant lease")?;
        debug!(ttl, budget, "granting lease");
        Ok(vec![ConnectionAction::Send(Frame::lease(
            ttl, budget, metadata,
        ))])
    }

    /// Periodic keepalive request (client only).
    pub fn keepalive_tick(&mut self) -> Vec<ConnectionAction> {
        if self.role != Role::Client || self.phase != Phase::Ready {
            return Vec::new();
        }
        trace!("sending keepalive");
        vec![ConnectionAction::Send(Frame::keepalive(false, Bytes::new()))]
    }

    /// Process one inbound frame.
    pub fn handle_frame(&mut self, frame: Frame) -> Vec<ConnectionAction> {
        trace!(
            stream_id = frame.stream_id,
            frame_type = %frame.frame_type(),
            phase = self.phase.name(),
            "inbound frame"
        );
        match self.phase {
            Phase::SetupPending => self.handle_setup_frame(frame),
            Phase::Ready => self.dispatch(frame),
            Phase::Connecting | Phase::Closed => {
                debug!(
                    stream_id = frame.stream_id,
                    frame_type = %frame.frame_type(),
                    phase = self.phase.name(),
                    "dropping frame outside an active session"
                );
                Vec::new()
            }
        }
    }

    /// Process an inbound frame that failed to decode.
    pub fn handle_decode_error(&mut self, err: FrameError) -> Vec<ConnectionAction> {
        let message = err.to_string();
        match self.phase {
            Phase::SetupPending => {
                warn!(error = %message, "undecodable frame during setup");
                self.setup_failed(
                    ConnError::Frame(err),
                    ErrorCode::INVALID_SETUP,
                    message,
                    true,
                )
            }
            Phase::Ready => {
                warn!(error = %message, "undecodable frame; closing connection");
                self.protocol_error(message)
            }
            Phase::Connecting | Phase::Closed => Vec::new(),
        }
    }

    /// The transport ended or failed.
    pub fn handle_transport_closed(&mut self, reason: CloseReason) -> Vec<ConnectionAction> {
        self.close(reason)
    }

    /// Close the connection, resolving every pending stream.
    ///
    /// Pending requesters receive [`StreamError::ConnectionClosed`] and pending
    /// responders are canceled. Closing twice is a no-op.
    pub fn close(&mut self, reason: CloseReason) -> Vec<ConnectionAction> {
        if self.phase == Phase::Closed {
            return Vec::new();
        }
        info!(role = %self.role, %reason, pending = self.streams.len(), "connection closing");
        self.phase = Phase::Closed;
        self.close_reason = Some(reason.clone());

        let mut ids: Vec<(u32, StreamSide)> = self.streams.drain().collect();
        ids.sort_unstable_by_key(|(id, _)| *id);

        let mut actions: Vec<ConnectionAction> = ids
            .into_iter()
            .map(|(stream_id, side)| match side {
                StreamSide::Requester => ConnectionAction::Resolve {
                    stream_id,
                    outcome: Err(StreamError::ConnectionClosed(reason.clone())),
                },
                StreamSide::Responder => ConnectionAction::CancelResponder(stream_id),
            })
            .collect();
        actions.push(ConnectionAction::Close(reason));
        actions
    }

    fn handle_setup_frame(&mut self, frame: Frame) -> Vec<ConnectionAction> {
        let flags = frame.flags;
        let frame_type = frame.frame_type();
        let FrameBody::Setup(setup) = frame.body else {
            let message = format!("first frame must be SETUP, got {frame_type}");
            warn!(stream_id = frame.stream_id, "{message}");
            let err = ConnError::Setup {
                code: ErrorCode::INVALID_SETUP,
                message: message.clone(),
            };
            return self.setup_failed(err, ErrorCode::INVALID_SETUP, message, true);
        };

        match accept_setup(setup, flags) {
            Ok(info) => {
                self.metadata_encoding = info.metadata_encoding.clone();
                self.data_encoding = info.data_encoding.clone();
                self.phase = Phase::Ready;
                info!(role = %self.role, "setup accepted, connection ready");
                vec![
                    ConnectionAction::Emit(StateEvent::Setup(info)),
                    ConnectionAction::Emit(StateEvent::Ready),
                ]
            }
            Err(SetupRejection { code, message }) => {
                warn!(%code, "{message}");
                let err = ConnError::Setup {
                    code,
                    message: message.clone(),
                };
                self.setup_failed(err, code, message, true)
            }
        }
    }

    fn dispatch(&mut self, frame: Frame) -> Vec<ConnectionAction> {
        let stream_id = frame.stream_id;
        match frame.body {
            FrameBody::Setup(_) => self.handle_extra_setup(),
            FrameBody::Lease(lease) => {
                let grant = LeaseGrant::new(lease.ttl, lease.budget, lease.metadata);
                debug!(ttl = grant.ttl, budget = grant.budget, "lease received");
                self.lease = Some(grant.clone());
                vec![ConnectionAction::Emit(StateEvent::Lease(grant))]
            }
            FrameBody::Keepalive(keepalive) => {
                if keepalive.response || !self.ack_keepalives {
                    return Vec::new();
                }
                trace!("acknowledging keepalive");
                vec![ConnectionAction::Send(Frame::keepalive(true, keepalive.data))]
            }
            FrameBody::RequestResponse(payload) => self.handle_request(stream_id, payload),
            FrameBody::Response(payload) => match self.stream_side(stream_id) {
                Some(StreamSide::Requester) => {
                    self.streams.remove(&stream_id);
                    trace!(stream_id, "response received");
                    vec![ConnectionAction::Resolve {
                        stream_id,
                        outcome: Ok(payload),
                    }]
                }
                _ => {
                    debug!(stream_id, "dropping response for unknown stream");
                    Vec::new()
                }
            },
            FrameBody::Error(error) => self.handle_error(stream_id, error.code, error.payload),
            FrameBody::Cancel(_) => match self.stream_side(stream_id) {
                Some(StreamSide::Responder) => {
                    self.streams.remove(&stream_id);
                    debug!(stream_id, "request canceled by peer");
                    vec![ConnectionAction::CancelResponder(stream_id)]
                }
                _ => {
                    trace!(stream_id, "cancel for unknown stream; ignoring");
                    Vec::new()
                }
            },
        }
    }

    fn handle_extra_setup(&mut self) -> Vec<ConnectionAction> {
        match self.role {
            Role::Server => {
                let message = "duplicate SETUP on an established connection".to_string();
                warn!("{message}");
                vec![
                    ConnectionAction::Emit(StateEvent::SetupError(ConnError::Setup {
                        code: ErrorCode::INVALID_SETUP,
                        message: message.clone(),
                    })),
                    ConnectionAction::Send(Frame::error(
                        0,
                        ErrorCode::INVALID_SETUP,
                        Payload::new(message),
                    )),
                ]
            }
            Role::Client => self.protocol_error("client received SETUP".to_string()),
        }
    }

    fn handle_request(&mut self, stream_id: u32, payload: Payload) -> Vec<ConnectionAction> {
        if stream_id == 0 {
            return self.protocol_error("REQUEST_RESPONSE on stream 0".to_string());
        }
        if self.streams.contains_key(&stream_id) {
            debug!(stream_id, "request reuses a pending stream id");
            return vec![ConnectionAction::Send(Frame::error(
                stream_id,
                ErrorCode::INVALID,
                Payload::new("stream id in use"),
            ))];
        }
        self.streams.insert(stream_id, StreamSide::Responder);
        trace!(stream_id, "request received");
        vec![ConnectionAction::Emit(StateEvent::Request {
            stream_id,
            payload,
        })]
    }

    fn handle_error(
        &mut self,
        stream_id: u32,
        code: ErrorCode,
        payload: Payload,
    ) -> Vec<ConnectionAction> {
        if stream_id == 0 || code.is_connection_fatal() {
            let message = String::from_utf8_lossy(&payload.data).into_owned();
            warn!(stream_id, %code, %message, "connection error from peer");
            if self.role == Role::Client && code.is_setup_error() {
                let err = ConnError::Setup {
                    code,
                    message: message.clone(),
                };
                return self.setup_failed(err, code, message, false);
            }
            return self.close(CloseReason::PeerError { code, message });
        }

        match self.stream_side(stream_id) {
            Some(StreamSide::Requester) => {
                self.streams.remove(&stream_id);
                debug!(stream_id, %code, "request failed");
                vec![ConnectionAction::Resolve {
                    stream_id,
                    outcome: Err(StreamError::Remote { code, payload }),
                }]
            }
            _ => {
                debug!(stream_id, %code, "dropping error for unknown stream");
                Vec::new()
            }
        }
    }

    /// Report a setup failure and close; optionally answer the peer with ERROR.
    fn setup_failed(
        &mut self,
        err: ConnError,
        code: ErrorCode,
        message: String,
        notify_peer: bool,
    ) -> Vec<ConnectionAction> {
        let mut actions = vec![ConnectionAction::Emit(StateEvent::SetupError(err))];
        if notify_peer {
            actions.push(ConnectionAction::Send(Frame::error(
                0,
                code,
                Payload::new(message.clone()),
            )));
        }
        actions.extend(self.close(CloseReason::SetupFailed { code, message }));
        actions
    }

    fn protocol_error(&mut self, message: String) -> Vec<ConnectionAction> {
        let mut actions = vec![ConnectionAction::Send(Frame::error(
            0,
            ErrorCode::CONNECTION_ERROR,
            Payload::new(message.clone()),
        ))];
        actions.extend(self.close(CloseReason::Protocol(message)));
        actions
    }

    fn take_responder(&mut self, stream_id: u32, operation: &'static str) -> Result<()> {
        if let Some(reason) = &self.close_reason {
            return Err(ConnError::Closed(reason.clone()));
        }
        if self.stream_side(stream_id) != Some(StreamSide::Responder) {
            warn!(stream_id, operation, "stream already resolved or unknown");
            return Err(ConnError::UnknownStream(stream_id));
        }
        self.streams.remove(&stream_id);
        Ok(())
    }

    /// Oversized frames would fail in the writer and take the connection down.
    fn check_size(&self, frame: &Frame) -> Result<()> {
        let size = frame.encoded_len();
        if size > self.max_frame_size {
            return Err(ConnError::Frame(FrameError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            }));
        }
        Ok(())
    }

    fn ensure_ready(&self, operation: &'static str) -> Result<()> {
        match (self.phase, &self.close_reason) {
            (Phase::Ready, _) => Ok(()),
            (Phase::Closed, Some(reason)) => Err(ConnError::Closed(reason.clone())),
            _ => Err(self.invalid_phase(operation)),
        }
    }

    fn invalid_phase(&self, operation: &'static str) -> ConnError {
        ConnError::InvalidPhase {
            operation,
            phase: self.phase.name(),
        }
    }

    /// Next free id of this role's parity, skipping ids still pending.
    fn allocate_stream_id(&mut self) -> Result<u32> {
        let first = self.next_stream_id;
        loop {
            let id = self.next_stream_id;
            self.next_stream_id = match id.wrapping_add(2) {
                0 | 1 => self.role.first_stream_id(),
                next => next,
            };
            if !self.streams.contains_key(&id) {
                return Ok(id);
            }
            if self.next_stream_id == first {
                return Err(ConnError::StreamIdsExhausted);
            }
        }
    }
}
