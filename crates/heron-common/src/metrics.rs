//! Metrics registry for agent communication
//!
//! Provides OpenTelemetry metrics for:
//! - Agent RPCs (call counts by operation and outcome, latency)
//! - Reconnect attempts after failed calls
//! - Number of cached agent connections

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};

/// Global meter for Heron metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("heron"));

/// Counter of RPCs issued to agents
///
/// Labels:
/// - `operation`: get_state, forward_rndc_command, forward_to_named_stats, ...
/// - `result`: success, retried, error
pub static AGENT_RPC_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("heron_agent_rpc_total")
        .with_description("Total number of RPCs issued to agents")
        .with_unit("{calls}")
        .build()
});

/// Histogram of agent RPC duration, including the retry when one happens
///
/// Labels:
/// - `operation`: RPC name
pub static AGENT_RPC_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("heron_agent_rpc_duration_seconds")
        .with_description("Duration of agent RPCs in seconds")
        .with_unit("s")
        .build()
});

/// Counter of reconnect attempts triggered by failed calls
///
/// Labels:
/// - `result`: success, error
pub static AGENT_RECONNECTS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("heron_agent_reconnects_total")
        .with_description("Total number of agent reconnect attempts")
        .with_unit("{reconnects}")
        .build()
});

/// Gauge of agent records held by the connection registry
pub static AGENT_CONNECTIONS: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge("heron_agent_connections")
        .with_description("Number of agents with a cached connection")
        .with_unit("{agents}")
        .build()
});

/// Outcome label for an agent RPC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcOutcome {
    /// First attempt succeeded
    Success,
    /// First attempt failed, the retry after reconnecting succeeded
    Retried,
    /// The call failed for good
    Error,
}

impl RpcOutcome {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Retried => "retried",
            Self::Error => "error",
        }
    }
}

/// Record an agent RPC with timing
pub struct RpcTimer {
    operation: &'static str,
    start: std::time::Instant,
}

impl RpcTimer {
    /// Start timing an RPC
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            start: std::time::Instant::now(),
        }
    }

    /// Complete with outcome
    pub fn complete(self, outcome: RpcOutcome) {
        let duration = self.start.elapsed().as_secs_f64();

        AGENT_RPC_TOTAL.add(
            1,
            &[
                opentelemetry::KeyValue::new("operation", self.operation),
                opentelemetry::KeyValue::new("result", outcome.as_str()),
            ],
        );

        AGENT_RPC_DURATION.record(
            duration,
            &[opentelemetry::KeyValue::new("operation", self.operation)],
        );
    }
}

/// Record a reconnect attempt
pub fn record_reconnect(success: bool) {
    let result = if success { "success" } else { "error" };
    AGENT_RECONNECTS.add(1, &[opentelemetry::KeyValue::new("result", result)]);
}

/// Update the cached connection gauge
pub fn set_agent_connections(count: i64) {
    AGENT_CONNECTIONS.record(count, &[]);
}
