//! Heron agent communication
//!
//! The monitoring server talks to an agent on every monitored machine. This
//! crate owns that side of the conversation:
//!
//! - **Connection Registry**: one connection per agent, created on first use
//!   and rebuilt after a failed call
//! - **Communication Loop**: a single task that issues every outbound call in
//!   enqueue order, retrying once after a reconnect
//! - **Forwarding Operations**: host state, RNDC commands, BIND9 statistics,
//!   Kea Control Agent commands and file tails
//! - **Health Tracking**: per-agent and per-daemon error counters that raise
//!   failure and recovery events on transitions
//!
//! ```text
//! caller ──► AgentManager ──► mpsc ──► CommLoop ──► AgentRpc (gRPC/mTLS) ──► agent
//!   ▲                                     │
//!   └──────────── oneshot reply ──────────┘
//! ```

#![deny(missing_docs)]

pub mod agent;
pub mod app;
pub mod comm_loop;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod forward;
pub mod kea;
pub mod manager;
pub mod registry;
pub mod rpc;

pub use agent::{AgentRecord, AgentStats, AppCommStats, AppCommStatsKey, Bind9CommStats, KeaCommStats};
pub use app::{AccessPoint, AccessPointKind, App, AppKind, DaemonRef, MachineRef};
pub use config::AgentCommConfig;
pub use dispatch::{AgentRequest, AgentResponse};
pub use error::AgentCommError;
pub use forward::{DiscoveredApp, RndcOutput, State};
pub use kea::{
    KeaCmdsResult, KeaCommand, KeaResponse, KeaResponseHeader, KeaResponseTarget,
    KEA_RESPONSE_ERROR, KEA_RESPONSE_SUCCESS,
};
pub use manager::{AgentManager, SharedAgentManager};
pub use rpc::{AgentConnector, AgentRpc, GrpcAgentRpc, GrpcConnector};
