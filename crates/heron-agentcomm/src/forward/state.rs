//! Host state of an agent's machine

use chrono::{DateTime, Utc};
use heron_proto::{GetStateReq, GetStateRsp};
use serde::Serialize;
use tracing::warn;

use crate::app::{AccessPoint, AccessPointKind, MachineRef};
use crate::dispatch::AgentRequest;
use crate::error::AgentCommError;
use crate::manager::AgentManager;

/// App found by the agent on its machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredApp {
    /// App type as reported by the agent (e.g. "kea", "bind9")
    pub kind: String,
    /// Access points of the app
    pub access_points: Vec<AccessPoint>,
}

/// Host and runtime state of a machine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct State {
    /// Address the agent was contacted on
    pub address: String,
    /// Agent version
    pub agent_version: String,
    /// Number of CPUs
    pub cpus: i64,
    /// Load averages as reported by the agent
    pub cpus_load: String,
    /// Total memory in GiB
    pub memory: i64,
    /// Host name
    pub hostname: String,
    /// Uptime in seconds
    pub uptime: i64,
    /// Used memory in percent
    pub used_memory: i64,
    /// Operating system
    pub os: String,
    /// Platform (e.g. "ubuntu")
    pub platform: String,
    /// Platform family (e.g. "debian")
    pub platform_family: String,
    /// Platform version
    pub platform_version: String,
    /// Kernel version
    pub kernel_version: String,
    /// Kernel architecture
    pub kernel_arch: String,
    /// Virtualization system, empty on bare metal
    pub virtualization_system: String,
    /// Virtualization role ("host" or "guest")
    pub virtualization_role: String,
    /// Host identifier
    pub host_id: String,
    /// When the reply was decoded
    pub last_visited_at: DateTime<Utc>,
    /// Error the agent hit while collecting its state, empty when none
    pub error: String,
    /// Apps the agent detected
    pub apps: Vec<DiscoveredApp>,
}

impl State {
    fn from_proto(address: &str, rsp: GetStateRsp) -> Self {
        let apps = rsp.apps.into_iter().map(discovered_app).collect();
        Self {
            address: address.to_string(),
            agent_version: rsp.agent_version,
            cpus: rsp.cpus,
            cpus_load: rsp.cpus_load,
            memory: rsp.memory,
            hostname: rsp.hostname,
            uptime: rsp.uptime,
            used_memory: rsp.used_memory,
            os: rsp.os,
            platform: rsp.platform,
            platform_family: rsp.platform_family,
            platform_version: rsp.platform_version,
            kernel_version: rsp.kernel_version,
            kernel_arch: rsp.kernel_arch,
            virtualization_system: rsp.virtualization_system,
            virtualization_role: rsp.virtualization_role,
            host_id: rsp.host_id,
            last_visited_at: Utc::now(),
            error: rsp.error,
            apps,
        }
    }
}

fn discovered_app(app: heron_proto::App) -> DiscoveredApp {
    let access_points = app
        .access_points
        .into_iter()
        .filter_map(|point| {
            let kind = match point.r#type.parse::<AccessPointKind>() {
                Ok(kind) => kind,
                Err(e) => {
                    warn!(app = %app.r#type, error = %e, "skipping access point");
                    return None;
                }
            };
            let Ok(port) = u16::try_from(point.port) else {
                warn!(app = %app.r#type, port = point.port, "skipping access point with invalid port");
                return None;
            };
            let mut access_point = AccessPoint::new(kind, point.address, port);
            if !point.key.is_empty() {
                access_point = access_point.with_key(point.key);
            }
            Some(access_point)
        })
        .collect();

    DiscoveredApp {
        kind: app.r#type,
        access_points,
    }
}

impl AgentManager {
    /// Fetch the host state from the agent at `address:agent_port`
    pub async fn get_state(&self, address: &str, agent_port: u16) -> Result<State, AgentCommError> {
        let machine = MachineRef::new(address, agent_port);
        let rsp = self
            .round_trip(&machine, "get state", AgentRequest::GetState(GetStateReq {}))
            .await?
            .into_get_state()?;
        Ok(State::from_proto(address, rsp))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::rpc::MockAgentRpc;

    fn state_reply() -> GetStateRsp {
        GetStateRsp {
            agent_version: "1.4.0".to_string(),
            hostname: "dhcp-1".to_string(),
            cpus: 4,
            memory: 16,
            os: "linux".to_string(),
            apps: vec![heron_proto::App {
                r#type: "kea".to_string(),
                access_points: vec![
                    heron_proto::AccessPoint {
                        r#type: "control".to_string(),
                        address: "localhost".to_string(),
                        port: 8000,
                        key: String::new(),
                    },
                    heron_proto::AccessPoint {
                        r#type: "bogus".to_string(),
                        address: "localhost".to_string(),
                        port: 1,
                        key: String::new(),
                    },
                    heron_proto::AccessPoint {
                        r#type: "statistics".to_string(),
                        address: "localhost".to_string(),
                        port: 70000,
                        key: String::new(),
                    },
                ],
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn state_is_converted() {
        let mut rpc = MockAgentRpc::new();
        rpc.expect_get_state().returning(|_| Ok(state_reply()));
        let (manager, _events) = manager(rpc);

        let before = Utc::now();
        let state = manager.get_state("127.0.0.1", 8080).await.expect("state is fetched");

        assert_eq!(state.address, "127.0.0.1");
        assert_eq!(state.agent_version, "1.4.0");
        assert_eq!(state.hostname, "dhcp-1");
        assert_eq!(state.cpus, 4);
        assert!(state.last_visited_at >= before);

        assert_eq!(state.apps.len(), 1);
        assert_eq!(state.apps[0].kind, "kea");
        // Unknown kinds and out-of-range ports are dropped
        assert_eq!(
            state.apps[0].access_points,
            vec![AccessPoint::new(AccessPointKind::Control, "localhost", 8000)]
        );
        manager.shutdown().await;
    }

    #[test]
    fn key_is_kept_when_present() {
        let app = discovered_app(heron_proto::App {
            r#type: "bind9".to_string(),
            access_points: vec![heron_proto::AccessPoint {
                r#type: "control".to_string(),
                address: "127.0.0.1".to_string(),
                port: 953,
                key: "hmac-sha256:abc".to_string(),
            }],
        });
        assert_eq!(app.access_points[0].key.as_deref(), Some("hmac-sha256:abc"));
    }
}
