//! Agent records and their communication statistics
//!
//! One [`AgentRecord`] exists per agent address. It owns the connection to
//! the agent and the error counters that drive failure and recovery events.
//!
//! Counters follow one rule: a failed call through a channel increments its
//! counter, a successful call resets it to zero. Events fire only on the
//! zero to nonzero and nonzero to zero transitions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::rpc::AgentRpc;

/// Key of per-app statistics: the daemon's access point as seen by the agent
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppCommStatsKey {
    /// Host or IP of the daemon
    pub address: String,
    /// Port of the daemon
    pub port: u16,
}

impl AppCommStatsKey {
    /// Create a key
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

/// Error counters for a Kea Control Agent and the daemons behind it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeaCommStats {
    /// Consecutive failures talking to or through the Control Agent
    pub current_errors_ca: u64,
    /// Consecutive failures reported by each daemon
    pub current_errors_daemons: HashMap<String, u64>,
}

/// Error counters for a BIND9 daemon
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bind9CommStats {
    /// Consecutive RNDC failures
    pub current_errors_rndc: u64,
    /// Consecutive statistics-channel failures
    pub current_errors_stats: u64,
}

/// Per-app error counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommStats {
    /// Kea app
    Kea(KeaCommStats),
    /// BIND9 app
    Bind9(Bind9CommStats),
}

/// Communication statistics of one agent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentStats {
    /// Consecutive transport failures talking to the agent
    pub current_errors: u64,
    /// Counters of the apps behind the agent
    pub app_comm_stats: HashMap<AppCommStatsKey, AppCommStats>,
}

impl AgentStats {
    /// Kea counters for the key, created (or replaced if the key held BIND9
    /// counters) on first use
    pub fn kea_mut(&mut self, key: AppCommStatsKey) -> &mut KeaCommStats {
        let entry = self
            .app_comm_stats
            .entry(key)
            .or_insert_with(|| AppCommStats::Kea(KeaCommStats::default()));
        if !matches!(entry, AppCommStats::Kea(_)) {
            *entry = AppCommStats::Kea(KeaCommStats::default());
        }
        match entry {
            AppCommStats::Kea(stats) => stats,
            AppCommStats::Bind9(_) => unreachable!("entry was just set to Kea"),
        }
    }

    /// BIND9 counters for the key, created (or replaced if the key held Kea
    /// counters) on first use
    pub fn bind9_mut(&mut self, key: AppCommStatsKey) -> &mut Bind9CommStats {
        let entry = self
            .app_comm_stats
            .entry(key)
            .or_insert_with(|| AppCommStats::Bind9(Bind9CommStats::default()));
        if !matches!(entry, AppCommStats::Bind9(_)) {
            *entry = AppCommStats::Bind9(Bind9CommStats::default());
        }
        match entry {
            AppCommStats::Bind9(stats) => stats,
            AppCommStats::Kea(_) => unreachable!("entry was just set to Bind9"),
        }
    }

    /// Kea counters for the key, if any
    pub fn kea(&self, key: &AppCommStatsKey) -> Option<&KeaCommStats> {
        match self.app_comm_stats.get(key) {
            Some(AppCommStats::Kea(stats)) => Some(stats),
            _ => None,
        }
    }

    /// BIND9 counters for the key, if any
    pub fn bind9(&self, key: &AppCommStatsKey) -> Option<&Bind9CommStats> {
        match self.app_comm_stats.get(key) {
            Some(AppCommStats::Bind9(stats)) => Some(stats),
            _ => None,
        }
    }
}

/// Runtime state of one agent: its connection and its statistics
///
/// Records are created by the connection registry on first reference and
/// live until the manager shuts down. Only the communication loop touches
/// the connection; forwarding operations touch the statistics.
pub struct AgentRecord {
    address: String,
    connection: RwLock<Option<Arc<dyn AgentRpc>>>,
    stats: Mutex<AgentStats>,
}

impl AgentRecord {
    /// Create a record with empty statistics
    pub fn new(address: impl Into<String>, connection: Arc<dyn AgentRpc>) -> Self {
        Self {
            address: address.into(),
            connection: RwLock::new(Some(connection)),
            stats: Mutex::new(AgentStats::default()),
        }
    }

    /// Agent address (`host:port`)
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current connection, `None` once closed
    pub async fn connection(&self) -> Option<Arc<dyn AgentRpc>> {
        self.connection.read().await.clone()
    }

    /// Replace the connection
    pub async fn set_connection(&self, connection: Arc<dyn AgentRpc>) {
        *self.connection.write().await = Some(connection);
    }

    /// Drop the connection; the channel closes once the last in-flight call
    /// holding it finishes
    pub async fn close_connection(&self) {
        self.connection.write().await.take();
    }

    /// Lock the statistics for a read/modify/write
    pub async fn stats(&self) -> MutexGuard<'_, AgentStats> {
        self.stats.lock().await
    }

    /// Copy of the statistics
    pub async fn stats_snapshot(&self) -> AgentStats {
        self.stats.lock().await.clone()
    }
}

impl std::fmt::Debug for AgentRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRecord")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::MockAgentRpc;

    #[test]
    fn kea_and_bind9_counters_are_created_on_first_use() {
        let mut stats = AgentStats::default();
        let key = AppCommStatsKey::new("localhost", 8000);

        stats.kea_mut(key.clone()).current_errors_ca = 2;
        assert_eq!(stats.kea(&key).map(|k| k.current_errors_ca), Some(2));
        assert!(stats.bind9(&key).is_none());
    }

    #[test]
    fn switching_app_kind_replaces_counters() {
        let mut stats = AgentStats::default();
        let key = AppCommStatsKey::new("localhost", 953);

        stats.kea_mut(key.clone()).current_errors_ca = 5;
        let bind9 = stats.bind9_mut(key.clone());
        assert_eq!(bind9, &Bind9CommStats::default());
        bind9.current_errors_rndc = 1;

        assert!(stats.kea(&key).is_none());
        assert_eq!(stats.kea_mut(key).current_errors_ca, 0);
    }

    #[tokio::test]
    async fn connection_can_be_closed_and_replaced() {
        let record = AgentRecord::new("127.0.0.1:8080", Arc::new(MockAgentRpc::new()));
        assert!(record.connection().await.is_some());

        record.close_connection().await;
        assert!(record.connection().await.is_none());

        record.set_connection(Arc::new(MockAgentRpc::new())).await;
        assert!(record.connection().await.is_some());
    }

    #[tokio::test]
    async fn snapshot_is_detached_from_record() {
        let record = AgentRecord::new("127.0.0.1:8080", Arc::new(MockAgentRpc::new()));
        record.stats().await.current_errors = 3;

        let mut snapshot = record.stats_snapshot().await;
        snapshot.current_errors = 0;
        assert_eq!(record.stats().await.current_errors, 3);
    }
}
