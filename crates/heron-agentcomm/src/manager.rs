//! Agent communication manager
//!
//! [`AgentManager`] is the entry point the rest of the server uses. It owns
//! the connection registry, the communication loop task and the event sink.
//! The forwarding operations are implemented on it in [`crate::forward`].
//!
//! # Lifecycle
//!
//! ```text
//! new() ──► loop task running ──► shutdown()
//!                                   1. stop accepting requests
//!                                   2. cancel the loop
//!                                   3. loop rejects queued requests
//!                                   4. join the loop task
//!                                   5. drop every connection
//! ```
//!
//! After shutdown every operation fails with `ShuttingDown`.

use std::sync::Arc;

use heron_common::events::{Event, EventSink};
use heron_infra::ClientMtlsConfig;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{AgentRecord, AgentStats};
use crate::app::join_host_port;
use crate::comm_loop::{CommLoop, Envelope, Reply};
use crate::config::AgentCommConfig;
use crate::dispatch::AgentRequest;
use crate::error::AgentCommError;
use crate::registry::ConnectionRegistry;
use crate::rpc::{AgentConnector, GrpcConnector};

/// Shared handle to the manager
pub type SharedAgentManager = Arc<AgentManager>;

/// Owns agent connections and serializes every call to agents
pub struct AgentManager {
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) events: Arc<dyn EventSink>,
    sender: Mutex<Option<mpsc::Sender<Envelope>>>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AgentManager {
    /// Create a manager and start its communication loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: &AgentCommConfig,
        connector: Arc<dyn AgentConnector>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(connector));
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(CommLoop::new(Arc::clone(&registry), rx, cancel.clone()).run());

        Self {
            registry,
            events,
            sender: Mutex::new(Some(tx)),
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Create a manager dialing agents over mutual TLS
    pub fn with_mtls(
        config: AgentCommConfig,
        mtls: ClientMtlsConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let connector = Arc::new(GrpcConnector::new(mtls, config.clone()));
        Self::new(&config, connector, events)
    }

    /// Stop the communication loop and drop every connection.
    ///
    /// Requests still queued fail with `ShuttingDown`. Calling this more
    /// than once is harmless.
    pub async fn shutdown(&self) {
        let Some(sender) = self.sender.lock().await.take() else {
            return;
        };
        info!("stopping communication with agents");
        drop(sender);
        self.cancel.cancel();

        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(e) = worker.await {
                warn!(error = %e, "agent communication loop ended abnormally");
            }
        }

        self.registry.close_all().await;
        info!("stopped communication with agents");
    }

    /// Record for `address` (`host:port`), created with its connection if
    /// unseen
    pub fn get_connected_agent(&self, address: &str) -> Result<Arc<AgentRecord>, AgentCommError> {
        self.registry.get_or_create(address)
    }

    /// Snapshot of an agent's communication statistics.
    ///
    /// With `port == 0`, `address` is taken to be `host:port` already.
    pub async fn agent_stats(&self, address: &str, port: u16) -> Option<AgentStats> {
        let address = if port != 0 {
            join_host_port(address, port)
        } else {
            address.to_string()
        };
        let record = self.registry.get(&address)?;
        Some(record.stats_snapshot().await)
    }

    /// Enqueue a request and wait for its reply
    pub(crate) async fn submit(&self, address: &str, request: AgentRequest) -> Reply {
        let sender = self
            .sender
            .lock()
            .await
            .clone()
            .ok_or(AgentCommError::ShuttingDown)?;

        let (envelope, reply) = Envelope::new(address, request);
        sender
            .send(envelope)
            .await
            .map_err(|_| AgentCommError::ShuttingDown)?;
        drop(sender);

        // A dropped reply sender means the loop went away without answering
        reply.await.map_err(|_| AgentCommError::ShuttingDown)?
    }

    /// Publish events in order
    pub(crate) async fn publish(&self, events: Vec<Event>) {
        for event in events {
            self.events.publish(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{MockAgentConnector, MockAgentRpc};
    use heron_common::events::NoopEventSink;
    use heron_proto::{GetStateReq, GetStateRsp};

    fn manager_with_working_agent() -> AgentManager {
        let mut connector = MockAgentConnector::new();
        connector.expect_connect().returning(|_| {
            let mut rpc = MockAgentRpc::new();
            rpc.expect_get_state()
                .returning(|_| Ok(GetStateRsp::default()));
            Ok(Arc::new(rpc))
        });
        AgentManager::new(
            &AgentCommConfig::default(),
            Arc::new(connector),
            Arc::new(NoopEventSink),
        )
    }

    #[test]
    fn manager_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AgentManager>();
    }

    #[tokio::test]
    async fn submit_round_trips_through_the_loop() {
        let manager = manager_with_working_agent();
        let rsp = manager
            .submit("127.0.0.1:8080", AgentRequest::GetState(GetStateReq {}))
            .await
            .expect("call succeeds");
        assert_eq!(rsp.kind(), "GetState");
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn operations_fail_fast_after_shutdown() {
        let manager = manager_with_working_agent();
        manager.shutdown().await;
        manager.shutdown().await;

        let err = manager
            .submit("127.0.0.1:8080", AgentRequest::GetState(GetStateReq {}))
            .await
            .expect_err("manager is shut down");
        assert!(matches!(err, AgentCommError::ShuttingDown));
    }

    #[tokio::test]
    async fn shutdown_closes_connections() {
        let manager = manager_with_working_agent();
        let record = manager
            .get_connected_agent("127.0.0.1:8080")
            .expect("record is created");
        assert!(record.connection().await.is_some());

        manager.shutdown().await;
        assert!(record.connection().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_with_queued_requests_answers_everyone() {
        let manager = Arc::new(manager_with_working_agent());

        let callers: Vec<_> = (0..32)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    manager
                        .submit("127.0.0.1:8080", AgentRequest::GetState(GetStateReq {}))
                        .await
                })
            })
            .collect();
        tokio::task::yield_now().await;
        manager.shutdown().await;

        for caller in callers {
            match caller.await.expect("caller does not panic") {
                Ok(rsp) => assert_eq!(rsp.kind(), "GetState"),
                Err(e) => assert!(matches!(e, AgentCommError::ShuttingDown)),
            }
        }
    }

    #[tokio::test]
    async fn agent_stats_accepts_split_or_joined_address() {
        let manager = manager_with_working_agent();
        manager
            .get_connected_agent("127.0.0.1:8080")
            .expect("record is created");

        assert!(manager.agent_stats("127.0.0.1", 8080).await.is_some());
        assert!(manager.agent_stats("127.0.0.1:8080", 0).await.is_some());
        assert!(manager.agent_stats("127.0.0.1", 9090).await.is_none());
        manager.shutdown().await;
    }
}
