//! Protocol buffer definitions for server-to-agent communication.
//!
//! This crate provides the gRPC service and message definitions used by the
//! monitoring server to talk to the agents running on monitored machines.
//!
//! # Architecture
//!
//! Connections are initiated by the **server**: each agent listens on its
//! own `address:port` and the server dials it over mutual TLS. Every call is
//! a unary request/response.
//!
//! ```text
//! ┌─────────────────────────┐
//! │   Monitoring Server     │
//! │                         │
//! │  ┌─────────────────┐    │
//! │  │  gRPC client    │────┼──── dials agent (mTLS)
//! │  └─────────────────┘    │
//! └─────────────────────────┘
//!            │
//!            │ unary RPCs
//!            ▼
//! ┌─────────────────────────┐
//! │   Monitored machine     │
//! │  ┌─────────────────┐    │
//! │  │  Agent server   │────┼──── relays to Kea CA / BIND9 / files
//! │  └─────────────────┘    │
//! └─────────────────────────┘
//! ```
//!
//! # RPCs
//!
//! - [`GetStateReq`] / [`GetStateRsp`]: host and runtime state, discovered apps
//! - [`ForwardRndcCommandReq`]: relay an RNDC command to BIND9
//! - [`ForwardToNamedStatsReq`]: relay a statistics-channel query to BIND9
//! - [`ForwardToKeaOverHttpReq`]: relay Kea commands to a Control Agent
//! - [`TailTextFileReq`]: tail a text file on the agent's host
//!
//! Every response carries a [`Status`]; multi-part responses also carry a
//! status per part.

// Generated protobuf code doesn't have docs
#![allow(missing_docs)]

pub mod tracing;

/// Generated protobuf types from agent.proto
pub mod agent {
    /// Version 1 of the agent protocol
    pub mod v1 {
        tonic::include_proto!("heron.agent.v1");
    }
}

pub use agent::v1::*;

impl Status {
    /// Build an OK status
    pub fn ok() -> Self {
        Self {
            code: status::StatusCode::Ok as i32,
            message: String::new(),
        }
    }

    /// Build an error status with the given message
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: status::StatusCode::Error as i32,
            message: message.into(),
        }
    }

    /// Whether the remote reported success
    pub fn is_ok(&self) -> bool {
        self.code == status::StatusCode::Ok as i32
    }
}

/// Whether an optional status reports success.
///
/// A missing status is treated as a failure: agents always set it.
pub fn status_ok(status: Option<&Status>) -> bool {
    status.is_some_and(Status::is_ok)
}

/// Message of an optional status, or a placeholder when the agent omitted it.
pub fn status_message(status: Option<&Status>) -> String {
    match status {
        Some(s) if !s.message.is_empty() => s.message.clone(),
        Some(_) => "remote reported an error without a message".to_string(),
        None => "missing status in response".to_string(),
    }
}
