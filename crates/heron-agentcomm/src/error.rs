//! Error types for agent communication
//!
//! Errors fall into five groups:
//! - setup: credentials or address unusable before any traffic
//! - transport: the agent could not be reached (counted per agent)
//! - remote status: the agent or the daemon behind it reported a failure
//! - decode: a payload did not have the expected shape
//! - programming errors: a reply that cannot belong to the request

use heron_infra::MtlsError;
use thiserror::Error;

use crate::app::AccessPointKind;

/// Errors returned by the agent communication manager
#[derive(Debug, Error)]
pub enum AgentCommError {
    /// TLS material could not be turned into a client configuration
    #[error("problem with preparing TLS credentials for agent {address}: {source}")]
    Credentials {
        /// Agent address (host:port)
        address: String,
        /// Underlying mTLS error
        #[source]
        source: MtlsError,
    },

    /// Agent address cannot be dialed
    #[error("invalid agent address {address}: {message}")]
    InvalidAddress {
        /// Offending address
        address: String,
        /// What is wrong with it
        message: String,
    },

    /// The remote call failed after the retry
    #[error("call to agent {address} failed: {status}")]
    Transport {
        /// Agent address (host:port)
        address: String,
        /// gRPC status of the failed call
        status: tonic::Status,
    },

    /// The connection could not be rebuilt after a failed call
    #[error("unable to re-establish connection with the agent {address}")]
    ReconnectFailed {
        /// Agent address (host:port)
        address: String,
        /// Why the connection could not be rebuilt
        #[source]
        source: Box<AgentCommError>,
    },

    /// First failure to reach an agent; carries the whole cause
    #[error("failed to {operation} via the agent {address}")]
    Unreachable {
        /// Agent address (host:port)
        address: String,
        /// Human-readable operation (e.g. "send Kea commands")
        operation: &'static str,
        /// Cause reported by the communication loop
        #[source]
        source: Box<AgentCommError>,
    },

    /// Repeated failure to reach an agent
    #[error("failed to {operation} via the agent {address}, the agent is still not responding")]
    StillUnreachable {
        /// Agent address (host:port)
        address: String,
        /// Human-readable operation
        operation: &'static str,
    },

    /// Repeated failure of the daemon behind a reachable agent
    #[error("failed to {operation} via the agent {address}, {backend} is still not responding")]
    BackendStillFailing {
        /// Agent address (host:port)
        address: String,
        /// Human-readable operation
        operation: &'static str,
        /// Daemon family (e.g. "BIND9")
        backend: &'static str,
    },

    /// The agent or a daemon reported a non-OK status
    #[error("{endpoint}: {message}")]
    Status {
        /// Endpoint that reported the failure (agent or daemon URL)
        endpoint: String,
        /// Message attached to the status
        message: String,
    },

    /// A payload could not be decoded
    #[error("failed to parse response from {endpoint}: {message}")]
    Decode {
        /// Endpoint the payload came from
        endpoint: String,
        /// Decoder error
        message: String,
    },

    /// The reply variant does not belong to the request
    #[error("unexpected response from agent: expected {expected}, got {actual}")]
    UnexpectedResponse {
        /// Response variant the request calls for
        expected: &'static str,
        /// Response variant that arrived
        actual: &'static str,
    },

    /// The app has no access point of the requested kind
    #[error("app {app} has no {kind} access point")]
    MissingAccessPoint {
        /// App name
        app: String,
        /// Requested kind
        kind: AccessPointKind,
    },

    /// The manager is shutting down or has shut down
    #[error("agent communication is shutting down")]
    ShuttingDown,
}

impl AgentCommError {
    /// Create a status error
    pub fn status(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Status {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create an invalid address error
    pub fn invalid_address(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Whether the error means the agent itself could not be reached
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::ReconnectFailed { .. }
                | Self::Unreachable { .. }
                | Self::StillUnreachable { .. }
        )
    }

    /// Whether a failed round trip should count against the agent's
    /// transport error counter.
    ///
    /// Everything the communication loop reports counts, except shutdown and
    /// replies that cannot belong to the request.
    pub fn counts_against_agent(&self) -> bool {
        !matches!(
            self,
            Self::ShuttingDown | Self::UnexpectedResponse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heron_common::error::format_chain;

    #[test]
    fn transport_classification() {
        let transport = AgentCommError::Transport {
            address: "10.0.0.1:8080".to_string(),
            status: tonic::Status::unavailable("connection refused"),
        };
        assert!(transport.is_transport());
        assert!(transport.counts_against_agent());

        let status = AgentCommError::status("http://10.0.0.1:8000/", "daemon down");
        assert!(!status.is_transport());

        assert!(!AgentCommError::ShuttingDown.counts_against_agent());
        assert!(!AgentCommError::UnexpectedResponse {
            expected: "GetState",
            actual: "TailTextFile",
        }
        .counts_against_agent());
    }

    #[test]
    fn unreachable_carries_full_chain() {
        let err = AgentCommError::Unreachable {
            address: "10.0.0.1:8080".to_string(),
            operation: "get state",
            source: Box::new(AgentCommError::ReconnectFailed {
                address: "10.0.0.1:8080".to_string(),
                source: Box::new(AgentCommError::invalid_address("10.0.0.1:8080", "bad uri")),
            }),
        };
        let chain = format_chain(&err);
        assert!(chain.starts_with("failed to get state via the agent 10.0.0.1:8080"));
        assert!(chain.contains("unable to re-establish connection with the agent 10.0.0.1:8080"));
        assert!(chain.ends_with("invalid agent address 10.0.0.1:8080: bad uri"));
    }

    #[test]
    fn brief_messages() {
        let err = AgentCommError::StillUnreachable {
            address: "10.0.0.1:8080".to_string(),
            operation: "send Kea commands",
        };
        assert_eq!(
            err.to_string(),
            "failed to send Kea commands via the agent 10.0.0.1:8080, the agent is still not responding"
        );

        let err = AgentCommError::BackendStillFailing {
            address: "10.0.0.1:8080".to_string(),
            operation: "send rndc command",
            backend: "BIND9",
        };
        assert_eq!(
            err.to_string(),
            "failed to send rndc command via the agent 10.0.0.1:8080, BIND9 is still not responding"
        );
    }
}
