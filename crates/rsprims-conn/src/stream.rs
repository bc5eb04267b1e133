//! Application handles for one request/response exchange.

use rsprims_frame::{ErrorCode, Payload};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::driver::Command;
use crate::error::{CloseReason, ConnError, Result, StreamError};
use crate::state::StreamOutcome;

/// Requester side of a stream: resolves once with the peer's answer.
///
/// Dropping the handle before it resolves cancels the request.
#[derive(Debug)]
pub struct ResponseStream {
    stream_id: u32,
    request: Payload,
    outcome: oneshot::Receiver<StreamOutcome>,
    control: mpsc::UnboundedSender<Command>,
    resolved: bool,
}

impl ResponseStream {
    pub(crate) fn new(
        stream_id: u32,
        request: Payload,
        outcome: oneshot::Receiver<StreamOutcome>,
        control: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            stream_id,
            request,
            outcome,
            control,
            resolved: false,
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// The payload that was sent.
    pub fn request(&self) -> &Payload {
        &self.request
    }

    /// Wait for the response.
    ///
    /// ERROR frames, cancellation and connection close all surface as
    /// [`StreamError`]; APPLICATION_ERROR leaves the connection usable.
    pub async fn response(mut self) -> std::result::Result<Payload, StreamError> {
        let outcome = (&mut self.outcome).await;
        self.resolved = true;
        // The driver only drops the sender after the connection is gone.
        outcome.unwrap_or(Err(StreamError::ConnectionClosed(CloseReason::Local)))
    }

    /// Cancel the request. A CANCEL frame is sent if it is still pending.
    pub fn cancel(mut self) {
        self.resolved = true;
        let _ = self.control.send(Command::Cancel {
            stream_id: self.stream_id,
        });
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        if self
            .control
            .send(Command::Cancel {
                stream_id: self.stream_id,
            })
            .is_err()
        {
            debug!(stream_id = self.stream_id, "could not cancel dropped request");
        }
    }
}

/// Responder side of a stream: the application owes exactly one answer.
///
/// Dropping the handle without answering rejects the request.
#[derive(Debug)]
pub struct RequestStream {
    stream_id: u32,
    request: Payload,
    control: mpsc::UnboundedSender<Command>,
    canceled: CancellationToken,
    resolved: bool,
}

impl RequestStream {
    pub(crate) fn new(
        stream_id: u32,
        request: Payload,
        control: mpsc::UnboundedSender<Command>,
        canceled: CancellationToken,
    ) -> Self {
        Self {
            stream_id,
            request,
            control,
            canceled,
            resolved: false,
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// The request payload.
    pub fn request(&self) -> &Payload {
        &self.request
    }

    /// Answer with a RESPONSE.
    pub async fn respond(mut self, payload: Payload) -> Result<()> {
        self.resolved = true;
        let (reply, rx) = oneshot::channel();
        self.submit(
            Command::Respond {
                stream_id: self.stream_id,
                payload,
                reply,
            },
            rx,
        )
        .await
    }

    /// Answer with an ERROR.
    pub async fn error(mut self, code: ErrorCode, payload: Payload) -> Result<()> {
        self.resolved = true;
        let (reply, rx) = oneshot::channel();
        self.submit(
            Command::RespondError {
                stream_id: self.stream_id,
                code,
                payload,
                reply,
            },
            rx,
        )
        .await
    }

    /// Wait until the requester cancels or the connection closes.
    pub async fn canceled(&self) {
        self.canceled.cancelled().await;
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.is_cancelled()
    }

    async fn submit(&self, command: Command, rx: oneshot::Receiver<Result<()>>) -> Result<()> {
        if self.control.send(command).is_err() {
            return Err(ConnError::Closed(CloseReason::Local));
        }
        rx.await
            .unwrap_or(Err(ConnError::Closed(CloseReason::Local)))
    }
}

impl Drop for RequestStream {
    fn drop(&mut self) {
        if self.resolved || self.canceled.is_cancelled() {
            return;
        }
        if self
            .control
            .send(Command::Abandon {
                stream_id: self.stream_id,
            })
            .is_err()
        {
            debug!(stream_id = self.stream_id, "could not reject dropped request");
        }
    }
}
