//! Connection registry
//!
//! Keeps one [`AgentRecord`] per agent address. Records are created lazily
//! on first reference; creation goes through the map's entry API so two
//! callers racing on an unseen address end up with the same record and a
//! single connection.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use heron_common::metrics;
use tracing::{debug, info};

use crate::agent::AgentRecord;
use crate::error::AgentCommError;
use crate::rpc::AgentConnector;

/// Registry of agent records keyed by `host:port`
pub struct ConnectionRegistry {
    agents: DashMap<String, Arc<AgentRecord>>,
    connector: Arc<dyn AgentConnector>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new(connector: Arc<dyn AgentConnector>) -> Self {
        Self {
            agents: DashMap::new(),
            connector,
        }
    }

    /// Return the record for `address`, creating it and its connection if
    /// the address has not been seen yet.
    ///
    /// When the connection cannot be created nothing is stored, so the next
    /// call tries again.
    pub fn get_or_create(&self, address: &str) -> Result<Arc<AgentRecord>, AgentCommError> {
        if let Some(record) = self.agents.get(address) {
            debug!(agent = %address, "using existing agent connection");
            return Ok(Arc::clone(record.value()));
        }

        let record = match self.agents.entry(address.to_string()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let connection = self.connector.connect(address)?;
                let record = Arc::new(AgentRecord::new(address, connection));
                entry.insert(Arc::clone(&record));
                info!(agent = %address, "connecting to new agent");
                record
            }
        };
        metrics::set_agent_connections(self.agents.len() as i64);
        Ok(record)
    }

    /// Return the record for `address` without creating one
    pub fn get(&self, address: &str) -> Option<Arc<AgentRecord>> {
        self.agents
            .get(address)
            .map(|record| Arc::clone(record.value()))
    }

    /// Drop the record's connection and open a new one with the same
    /// credentials.
    ///
    /// The old connection is dropped first; if opening the new one fails
    /// the record is left without a connection and the next call retries.
    pub async fn reconnect(&self, record: &AgentRecord) -> Result<(), AgentCommError> {
        record.close_connection().await;
        let result = self.connector.connect(record.address());
        metrics::record_reconnect(result.is_ok());
        record.set_connection(result?).await;
        info!(agent = %record.address(), "re-established connection to agent");
        Ok(())
    }

    /// Drop every cached connection
    pub async fn close_all(&self) {
        // Collect first so no map guard is held across an await
        let records: Vec<Arc<AgentRecord>> = self
            .agents
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for record in &records {
            record.close_connection().await;
        }
        metrics::set_agent_connections(0);
        debug!(count = records.len(), "closed agent connections");
    }

    /// Number of known agents
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agent is known
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{MockAgentConnector, MockAgentRpc};

    fn counting_connector(expected_calls: usize) -> MockAgentConnector {
        let mut connector = MockAgentConnector::new();
        connector
            .expect_connect()
            .times(expected_calls)
            .returning(|_| Ok(Arc::new(MockAgentRpc::new())));
        connector
    }

    #[test]
    fn get_or_create_returns_same_record() {
        let registry = ConnectionRegistry::new(Arc::new(counting_connector(1)));

        let first = registry
            .get_or_create("127.0.0.1:8080")
            .expect("record is created");
        let second = registry
            .get_or_create("127.0.0.1:8080")
            .expect("record is reused");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn concurrent_get_or_create_connects_once() {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(counting_connector(1))));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.get_or_create("10.0.0.1:8080").is_ok())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().expect("thread does not panic"));
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn failed_connect_stores_nothing() {
        let mut connector = MockAgentConnector::new();
        connector
            .expect_connect()
            .times(2)
            .returning(|address| Err(AgentCommError::invalid_address(address, "expected host:port")));
        let registry = ConnectionRegistry::new(Arc::new(connector));

        assert!(registry.get_or_create("bogus").is_err());
        assert!(registry.get("bogus").is_none());
        assert!(registry.get_or_create("bogus").is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn reconnect_replaces_connection() {
        let registry = ConnectionRegistry::new(Arc::new(counting_connector(2)));
        let record = registry
            .get_or_create("127.0.0.1:8080")
            .expect("record is created");
        let before = record.connection().await.expect("connected");

        registry.reconnect(&record).await.expect("reconnect succeeds");

        let after = record.connection().await.expect("connected again");
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn failed_reconnect_leaves_record_disconnected() {
        let mut connector = MockAgentConnector::new();
        let mut calls = 0;
        connector.expect_connect().times(2).returning(move |address| {
            calls += 1;
            if calls == 1 {
                Ok(Arc::new(MockAgentRpc::new()))
            } else {
                Err(AgentCommError::invalid_address(address, "gone"))
            }
        });
        let registry = ConnectionRegistry::new(Arc::new(connector));
        let record = registry
            .get_or_create("127.0.0.1:8080")
            .expect("record is created");

        assert!(registry.reconnect(&record).await.is_err());
        assert!(record.connection().await.is_none());
    }

    #[tokio::test]
    async fn close_all_drops_connections_but_keeps_records() {
        let registry = ConnectionRegistry::new(Arc::new(counting_connector(2)));
        let a = registry.get_or_create("10.0.0.1:8080").expect("created");
        let b = registry.get_or_create("10.0.0.2:8080").expect("created");

        registry.close_all().await;

        assert!(a.connection().await.is_none());
        assert!(b.connection().await.is_none());
        assert_eq!(registry.len(), 2);
    }
}
