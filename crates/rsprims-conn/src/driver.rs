//! Per-connection driver task.
//!
//! One task owns the [`ConnectionState`] and processes inbound frames and
//! application commands strictly one at a time. Outbound frames go through a
//! bounded queue to a dedicated writer task, so a slow transport suspends the
//! queue producers rather than corrupting ordering. Stream answers, cancels and
//! drop notices travel on an unbounded control queue that the driver keeps
//! serving even while it waits for room in the event queue.
//!
//! ```text
//!  transport ──frames──┐                          ┌──> events (Ready, Request, ...)
//!                      ├──> Driver (state machine)┤
//!  Connection ─commands┘          │               └──> requester oneshots / responder tokens
//!                                 └──frames──> writer task ──> transport
//! ```

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use futures_core::Stream;
use futures_util::{Sink, SinkExt, StreamExt};
use rsprims_frame::{ErrorCode, Frame, FrameError, Payload};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::{ConnectionConfig, Role};
use crate::connection::ConnectionEvent;
use crate::error::{CloseReason, Result};
use crate::lease::LeaseGrant;
use crate::state::{ConnectionAction, ConnectionState, Phase, StateEvent, StreamOutcome};
use crate::stream::RequestStream;

/// Maximum frames written before a flush.
const MAX_BATCH_SIZE: usize = 64;

/// Requests from application handles to the driver.
///
/// `Respond`, `RespondError`, `Cancel` and `Abandon` arrive on the control
/// queue; the rest on the bounded command queue.
#[derive(Debug)]
pub(crate) enum Command {
    Request {
        payload: Payload,
        outcome: oneshot::Sender<StreamOutcome>,
        reply: oneshot::Sender<Result<u32>>,
    },
    Respond {
        stream_id: u32,
        payload: Payload,
        reply: oneshot::Sender<Result<()>>,
    },
    RespondError {
        stream_id: u32,
        code: ErrorCode,
        payload: Payload,
        reply: oneshot::Sender<Result<()>>,
    },
    Cancel {
        stream_id: u32,
    },
    /// A responder handle was dropped without answering.
    Abandon {
        stream_id: u32,
    },
    GrantLease {
        ttl: u32,
        budget: u32,
        metadata: Option<Bytes>,
        reply: oneshot::Sender<Result<()>>,
    },
    Lease {
        reply: oneshot::Sender<Option<LeaseGrant>>,
    },
    Close,
}

pub(crate) struct Driver {
    state: ConnectionState,
    commands: mpsc::Receiver<Command>,
    control: mpsc::UnboundedReceiver<Command>,
    /// Handed to each [`RequestStream`]; held here so responders can always answer.
    control_handle: mpsc::UnboundedSender<Command>,
    events: mpsc::Sender<ConnectionEvent>,
    outbound: Option<mpsc::Sender<Frame>>,
    requesters: HashMap<u32, oneshot::Sender<StreamOutcome>>,
    responders: HashMap<u32, CancellationToken>,
    closed: watch::Sender<Option<CloseReason>>,
    keepalive: Option<Interval>,
}

impl Driver {
    pub(crate) fn new(
        config: &ConnectionConfig,
        commands: mpsc::Receiver<Command>,
        control: mpsc::UnboundedReceiver<Command>,
        control_handle: mpsc::UnboundedSender<Command>,
        events: mpsc::Sender<ConnectionEvent>,
        outbound: mpsc::Sender<Frame>,
        closed: watch::Sender<Option<CloseReason>>,
    ) -> Self {
        let keepalive = (config.role == Role::Client && !config.keepalive.is_zero()).then(|| {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + config.keepalive, config.keepalive);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        Self {
            state: ConnectionState::new(config),
            commands,
            control,
            control_handle,
            events,
            outbound: Some(outbound),
            requesters: HashMap::new(),
            responders: HashMap::new(),
            closed,
            keepalive,
        }
    }

    /// Run until the connection closes.
    pub(crate) async fn run<R>(
        mut self,
        mut inbound: R,
        writer: JoinHandle<()>,
        mut writer_failed: oneshot::Receiver<CloseReason>,
    ) where
        R: Stream<Item = std::result::Result<Frame, FrameError>> + Unpin,
    {
        match self.state.start() {
            Ok(actions) => self.apply(actions).await,
            Err(err) => warn!(error = %err, "connection failed to start"),
        }

        while self.state.phase() != Phase::Closed {
            tokio::select! {
                frame = inbound.next() => {
                    let actions = match frame {
                        Some(Ok(frame)) => self.state.handle_frame(frame),
                        Some(Err(FrameError::Io(err))) => self
                            .state
                            .handle_transport_closed(CloseReason::Transport(err.to_string())),
                        Some(Err(FrameError::ConnectionClosed)) => self.state.handle_transport_closed(
                            CloseReason::Transport("transport closed mid-frame".to_string()),
                        ),
                        Some(Err(err)) => self.state.handle_decode_error(err),
                        None => self.state.handle_transport_closed(CloseReason::TransportClosed),
                    };
                    self.apply(actions).await;
                }
                Some(command) = self.control.recv() => {
                    let actions = self.handle_command(command);
                    self.apply(actions).await;
                }
                command = self.commands.recv() => match command {
                    Some(command) => {
                        let actions = self.handle_command(command);
                        self.apply(actions).await;
                    }
                    None => {
                        debug!("all connection handles dropped");
                        let actions = self.state.close(CloseReason::Local);
                        self.apply(actions).await;
                    }
                },
                failure = &mut writer_failed => {
                    let reason = failure
                        .unwrap_or_else(|_| CloseReason::Transport("writer stopped".to_string()));
                    let actions = self.state.handle_transport_closed(reason);
                    self.apply(actions).await;
                }
                () = next_tick(&mut self.keepalive) => {
                    let actions = self.state.keepalive_tick();
                    self.apply(actions).await;
                }
            }
        }

        // Dropping the queue lets the writer flush what is left and close the sink.
        self.outbound = None;
        if let Err(err) = writer.await {
            debug!(error = %err, "writer task ended abnormally");
        }

        let reason = self
            .state
            .close_reason()
            .cloned()
            .unwrap_or(CloseReason::Local);
        self.closed.send_replace(Some(reason.clone()));
        // Commands served from here on only see the closed state.
        let _ = self.emit(ConnectionEvent::Closed(reason)).await;
    }

    fn handle_command(&mut self, command: Command) -> Vec<ConnectionAction> {
        match command {
            Command::Request {
                payload,
                outcome,
                reply,
            } => match self.state.send_request(payload) {
                Ok((stream_id, actions)) => {
                    self.requesters.insert(stream_id, outcome);
                    let _ = reply.send(Ok(stream_id));
                    actions
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                    Vec::new()
                }
            },
            Command::Respond {
                stream_id,
                payload,
                reply,
            } => {
                let result = self.state.respond(stream_id, payload);
                self.finish_responder(stream_id, result, reply)
            }
            Command::RespondError {
                stream_id,
                code,
                payload,
                reply,
            } => {
                let result = self.state.respond_error(stream_id, code, payload);
                self.finish_responder(stream_id, result, reply)
            }
            Command::Cancel { stream_id } => self.state.cancel(stream_id),
            Command::Abandon { stream_id } => {
                let result = self.state.respond_error(
                    stream_id,
                    ErrorCode::REJECTED,
                    Payload::new("request dropped by responder"),
                );
                match result {
                    Ok(actions) => {
                        debug!(stream_id, "responder dropped request; rejecting");
                        self.responders.remove(&stream_id);
                        actions
                    }
                    Err(_) => Vec::new(),
                }
            }
            Command::GrantLease {
                ttl,
                budget,
                metadata,
                reply,
            } => match self.state.grant_lease(ttl, budget, metadata) {
                Ok(actions) => {
                    let _ = reply.send(Ok(()));
                    actions
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                    Vec::new()
                }
            },
            Command::Lease { reply } => {
                let _ = reply.send(self.state.lease().cloned());
                Vec::new()
            }
            Command::Close => self.state.close(CloseReason::Local),
        }
    }

    fn finish_responder(
        &mut self,
        stream_id: u32,
        result: Result<Vec<ConnectionAction>>,
        reply: oneshot::Sender<Result<()>>,
    ) -> Vec<ConnectionAction> {
        match result {
            Ok(actions) => {
                self.responders.remove(&stream_id);
                let _ = reply.send(Ok(()));
                actions
            }
            Err(err) => {
                let _ = reply.send(Err(err));
                Vec::new()
            }
        }
    }

    async fn apply(&mut self, actions: Vec<ConnectionAction>) {
        let mut pending = VecDeque::from(actions);
        while let Some(action) = pending.pop_front() {
            match action {
                ConnectionAction::Send(frame) => self.send(frame).await,
                ConnectionAction::Emit(event) => {
                    let event = self.to_connection_event(event);
                    pending.extend(self.emit(event).await);
                }
                ConnectionAction::Resolve { stream_id, outcome } => {
                    match self.requesters.remove(&stream_id) {
                        Some(waiter) => {
                            if waiter.send(outcome).is_err() {
                                trace!(stream_id, "requester no longer waiting");
                            }
                        }
                        None => warn!(stream_id, "stream resolved twice"),
                    }
                }
                ConnectionAction::CancelResponder(stream_id) => {
                    if let Some(token) = self.responders.remove(&stream_id) {
                        token.cancel();
                    }
                }
                ConnectionAction::Close(reason) => {
                    debug!(%reason, "connection closed");
                    self.keepalive = None;
                }
            }
        }
    }

    fn to_connection_event(&mut self, event: StateEvent) -> ConnectionEvent {
        match event {
            StateEvent::Ready => ConnectionEvent::Ready,
            StateEvent::Setup(info) => ConnectionEvent::Setup(info),
            StateEvent::SetupError(err) => ConnectionEvent::SetupError(err),
            StateEvent::Lease(grant) => ConnectionEvent::Lease(grant),
            StateEvent::Request { stream_id, payload } => {
                let token = CancellationToken::new();
                self.responders.insert(stream_id, token.clone());
                ConnectionEvent::Request(RequestStream::new(
                    stream_id,
                    payload,
                    self.control_handle.clone(),
                    token,
                ))
            }
        }
    }

    async fn send(&mut self, frame: Frame) {
        let Some(outbound) = &self.outbound else {
            return;
        };
        if outbound.send(frame).await.is_err() {
            debug!("writer queue closed; dropping frame");
        }
    }

    /// Queue an event for the application.
    ///
    /// While the event queue is full, commands keep being served so handles
    /// awaiting the driver can make progress. Their actions are returned to be
    /// applied once the event is queued.
    async fn emit(&mut self, event: ConnectionEvent) -> Vec<ConnectionAction> {
        let mut deferred = Vec::new();
        loop {
            tokio::select! {
                biased;
                permit = self.events.clone().reserve_owned() => {
                    match permit {
                        Ok(permit) => {
                            let _ = permit.send(event);
                        }
                        Err(_) => trace!("event receiver dropped"),
                    }
                    return deferred;
                }
                Some(command) = self.control.recv() => {
                    deferred.extend(self.handle_command(command));
                }
                Some(command) = self.commands.recv() => {
                    deferred.extend(self.handle_command(command));
                }
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Drain the outbound queue into the transport sink, flushing per batch.
pub(crate) async fn write_frames<W>(
    mut sink: W,
    mut outbound: mpsc::Receiver<Frame>,
    failed: oneshot::Sender<CloseReason>,
) where
    W: Sink<Frame, Error = FrameError> + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        if let Err(err) = write_batch(&mut sink, frame, &mut outbound).await {
            warn!(error = %err, "frame write failed");
            let _ = failed.send(CloseReason::Transport(err.to_string()));
            return;
        }
    }

    if let Err(err) = sink.close().await {
        debug!(error = %err, "failed to close transport sink");
    }
}

async fn write_batch<W>(
    sink: &mut W,
    first: Frame,
    outbound: &mut mpsc::Receiver<Frame>,
) -> std::result::Result<(), FrameError>
where
    W: Sink<Frame, Error = FrameError> + Unpin,
{
    sink.feed(first).await?;
    for _ in 1..MAX_BATCH_SIZE {
        match outbound.try_recv() {
            Ok(frame) => sink.feed(frame).await?,
            Err(_) => break,
        }
    }
    sink.flush().await
}
