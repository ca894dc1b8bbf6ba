//! Communication loop
//!
//! A single task owns every outbound call. Callers enqueue an [`Envelope`]
//! and await its oneshot reply; the loop takes envelopes in order, resolves
//! the agent record, dispatches the call and sends the result back. One
//! slow agent therefore delays every other call, in exchange for a strict
//! total order of outbound traffic.
//!
//! # Failure handling
//!
//! A failed call triggers exactly one reconnect and one retry. Counting the
//! failure is left to the forwarding operations.
//!
//! # Cancellation
//!
//! A caller that stops waiting drops its reply receiver. The call already
//! in flight is not aborted; its result is discarded when the send fails.

use std::sync::Arc;

use heron_common::metrics::{RpcOutcome, RpcTimer};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::{dispatch, AgentRequest, AgentResponse};
use crate::error::AgentCommError;
use crate::registry::ConnectionRegistry;

/// Result delivered to the submitter of an envelope
pub type Reply = Result<AgentResponse, AgentCommError>;

/// One request and the channel its reply goes to
#[derive(Debug)]
pub struct Envelope {
    /// Agent address (`host:port`)
    pub address: String,
    /// Request payload
    pub request: AgentRequest,
    /// Where the result goes
    pub reply: oneshot::Sender<Reply>,
}

impl Envelope {
    /// Create an envelope and the receiver for its reply
    pub fn new(address: impl Into<String>, request: AgentRequest) -> (Self, oneshot::Receiver<Reply>) {
        let (reply, rx) = oneshot::channel();
        (
            Self {
                address: address.into(),
                request,
                reply,
            },
            rx,
        )
    }
}

/// The worker draining the request queue
pub struct CommLoop {
    registry: Arc<ConnectionRegistry>,
    rx: mpsc::Receiver<Envelope>,
    cancel: CancellationToken,
}

impl CommLoop {
    /// Create a loop reading from `rx` until `cancel` fires or every sender
    /// is gone
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        rx: mpsc::Receiver<Envelope>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            rx,
            cancel,
        }
    }

    /// Run until shutdown
    pub async fn run(mut self) {
        debug!("agent communication loop started");
        loop {
            tokio::select! {
                // Shutdown wins over queued work
                biased;
                _ = self.cancel.cancelled() => break,
                envelope = self.rx.recv() => match envelope {
                    Some(envelope) => self.handle(envelope).await,
                    None => break,
                },
            }
        }

        self.rx.close();
        let mut rejected = 0usize;
        while let Ok(envelope) = self.rx.try_recv() {
            let _ = envelope.reply.send(Err(AgentCommError::ShuttingDown));
            rejected += 1;
        }
        info!(rejected, "agent communication loop stopped");
    }

    async fn handle(&self, envelope: Envelope) {
        let Envelope {
            address,
            request,
            reply,
        } = envelope;

        let result = self.call(&address, &request).await;
        if reply.send(result).is_err() {
            debug!(agent = %address, operation = request.operation(), "caller stopped waiting, reply discarded");
        }
    }

    /// Issue the call, reconnecting and retrying once on failure
    async fn call(&self, address: &str, request: &AgentRequest) -> Reply {
        let timer = RpcTimer::start(request.operation());

        let record = match self.registry.get_or_create(address) {
            Ok(record) => record,
            Err(e) => {
                timer.complete(RpcOutcome::Error);
                return Err(e);
            }
        };

        let first = match record.connection().await {
            Some(connection) => dispatch(connection.as_ref(), request).await,
            None => Err(tonic::Status::unavailable("connection closed")),
        };
        let status = match first {
            Ok(response) => {
                timer.complete(RpcOutcome::Success);
                return Ok(response);
            }
            Err(status) => status,
        };

        // The cached connection may be broken; rebuild it and try once more
        warn!(agent = %address, operation = request.operation(), error = %status, "call to agent failed, reconnecting");
        if let Err(e) = self.registry.reconnect(&record).await {
            timer.complete(RpcOutcome::Error);
            return Err(AgentCommError::ReconnectFailed {
                address: address.to_string(),
                source: Box::new(e),
            });
        }

        let retry = match record.connection().await {
            Some(connection) => dispatch(connection.as_ref(), request).await,
            None => Err(tonic::Status::unavailable("connection closed")),
        };
        match retry {
            Ok(response) => {
                timer.complete(RpcOutcome::Retried);
                Ok(response)
            }
            Err(status) => {
                warn!(agent = %address, operation = request.operation(), error = %status, "retry after reconnect failed");
                timer.complete(RpcOutcome::Error);
                Err(AgentCommError::Transport {
                    address: address.to_string(),
                    status,
                })
            }
        }
    }
}
