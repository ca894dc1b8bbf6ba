//! Configuration of agent communication
//!
//! Values come from `HERON_AGENT_*` environment variables through the
//! [`EnvSource`] trait so tests never touch process-global state.

use std::time::Duration;

use tracing::warn;

/// Queue capacity variable
pub const ENV_QUEUE_CAPACITY: &str = "HERON_AGENT_QUEUE_CAPACITY";
/// Connect timeout variable (seconds)
pub const ENV_CONNECT_TIMEOUT: &str = "HERON_AGENT_CONNECT_TIMEOUT_SECS";
/// Per-call timeout variable (seconds)
pub const ENV_REQUEST_TIMEOUT: &str = "HERON_AGENT_REQUEST_TIMEOUT_SECS";
/// HTTP/2 keep-alive interval variable (seconds)
pub const ENV_KEEP_ALIVE_INTERVAL: &str = "HERON_AGENT_KEEPALIVE_INTERVAL_SECS";
/// HTTP/2 keep-alive timeout variable (seconds)
pub const ENV_KEEP_ALIVE_TIMEOUT: &str = "HERON_AGENT_KEEPALIVE_TIMEOUT_SECS";

/// Trait for reading configuration variables
#[cfg_attr(test, mockall::automock)]
pub trait EnvSource: Send + Sync {
    /// Value of the variable, `None` when unset
    fn var(&self, name: &str) -> Option<String>;
}

/// Default implementation that reads from environment variables
#[derive(Clone, Default)]
pub struct OsEnv;

impl EnvSource for OsEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Settings of the communication loop and of agent connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommConfig {
    /// Requests that may wait in the queue before submitters wait for room
    pub queue_capacity: usize,
    /// Timeout for establishing a connection
    pub connect_timeout: Duration,
    /// Timeout for one remote call
    pub request_timeout: Duration,
    /// Interval between HTTP/2 keep-alive pings
    pub keep_alive_interval: Duration,
    /// Time to wait for a keep-alive acknowledgement
    pub keep_alive_timeout: Duration,
}

impl Default for AgentCommConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            keep_alive_interval: Duration::from_secs(30),
            keep_alive_timeout: Duration::from_secs(20),
        }
    }
}

impl AgentCommConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_source(&OsEnv)
    }

    /// Read the configuration from a variable source
    ///
    /// Unset variables keep their defaults; invalid ones are logged and
    /// keep their defaults too.
    pub fn from_source(env: &dyn EnvSource) -> Self {
        let defaults = Self::default();
        Self {
            queue_capacity: parse_var(env, ENV_QUEUE_CAPACITY)
                .filter(|c| *c > 0)
                .unwrap_or(defaults.queue_capacity),
            connect_timeout: parse_secs(env, ENV_CONNECT_TIMEOUT)
                .unwrap_or(defaults.connect_timeout),
            request_timeout: parse_secs(env, ENV_REQUEST_TIMEOUT)
                .unwrap_or(defaults.request_timeout),
            keep_alive_interval: parse_secs(env, ENV_KEEP_ALIVE_INTERVAL)
                .unwrap_or(defaults.keep_alive_interval),
            keep_alive_timeout: parse_secs(env, ENV_KEEP_ALIVE_TIMEOUT)
                .unwrap_or(defaults.keep_alive_timeout),
        }
    }
}

fn parse_var<T: std::str::FromStr>(env: &dyn EnvSource, name: &str) -> Option<T> {
    let raw = env.var(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "invalid value, using default");
            None
        }
    }
}

fn parse_secs(env: &dyn EnvSource, name: &str) -> Option<Duration> {
    parse_var::<u64>(env, name)
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}
