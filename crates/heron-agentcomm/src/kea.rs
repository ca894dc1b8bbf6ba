//! Kea Control Agent command and response types
//!
//! Commands are relayed to the Kea Control Agent as JSON documents; the CA
//! answers every command with a JSON list holding one element per daemon
//! the command was sent to.
//!
//! ```text
//! request:  {"command": "config-get", "service": ["dhcp4", "dhcp6"]}
//! response: [{"result": 0, "arguments": {...}}, {"result": 1, "text": "..."}]
//! ```
//!
//! The list elements do not name the daemon that produced them. Decoding
//! assigns the daemon from the command's `service` list by position so that
//! errors can be attributed per daemon.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AgentCommError;

/// Command completed successfully
pub const KEA_RESPONSE_SUCCESS: i64 = 0;
/// Command failed
pub const KEA_RESPONSE_ERROR: i64 = 1;
/// Command is not supported
pub const KEA_RESPONSE_COMMAND_UNSUPPORTED: i64 = 2;
/// Command completed but there was nothing to return
pub const KEA_RESPONSE_EMPTY: i64 = 3;

/// A command for the Kea Control Agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeaCommand {
    /// Command name (e.g. "config-get")
    pub command: String,
    /// Daemons the command is forwarded to; empty means the CA itself
    #[serde(rename = "service", default, skip_serializing_if = "Vec::is_empty")]
    pub daemons: Vec<String>,
    /// Command arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl KeaCommand {
    /// Create a command for the given daemons
    pub fn new(
        command: impl Into<String>,
        daemons: impl IntoIterator<Item = impl Into<String>>,
        arguments: Option<Value>,
    ) -> Self {
        Self {
            command: command.into(),
            daemons: daemons.into_iter().map(Into::into).collect(),
            arguments,
        }
    }

    /// JSON document sent over the wire
    pub fn marshal(&self) -> String {
        // A struct of strings and a JSON value always serializes
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Common part of every element of a Kea response list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeaResponseHeader {
    /// Result code, see `KEA_RESPONSE_*`
    pub result: i64,
    /// Optional human-readable text
    #[serde(default)]
    pub text: String,
    /// Daemon that produced the element; filled in while decoding
    #[serde(skip)]
    pub daemon: String,
}

/// A Kea response element with untyped arguments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeaResponse {
    /// Result code, see `KEA_RESPONSE_*`
    pub result: i64,
    /// Optional human-readable text
    #[serde(default)]
    pub text: String,
    /// Daemon that produced the element; filled in while decoding
    #[serde(skip)]
    pub daemon: String,
    /// Command-specific arguments
    #[serde(default)]
    pub arguments: Option<Map<String, Value>>,
}

/// Outcome of forwarding a batch of commands
#[derive(Debug, Default)]
pub struct KeaCmdsResult {
    /// Failure reported for the batch as a whole
    pub error: Option<AgentCommError>,
    /// Failure per command, in command order; `None` means success
    pub cmds_errors: Vec<Option<AgentCommError>>,
}

impl KeaCmdsResult {
    /// Whether the batch and every command succeeded
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.cmds_errors.iter().all(Option::is_none)
    }
}

/// An element of a Kea response list that names its daemon and result.
///
/// Untyped elements (`serde_json::Value`) that are not objects or carry no
/// result are skipped when errors are attributed.
pub trait KeaDaemonResult {
    /// Daemon name, empty when the element does not name one and `None`
    /// when the element cannot carry a name at all
    fn daemon(&self) -> Option<&str>;
    /// Result code, `None` when the element has no result field
    fn result(&self) -> Option<i64>;
    /// Fill in the daemon name
    fn set_daemon(&mut self, daemon: &str);
}

impl KeaDaemonResult for KeaResponseHeader {
    fn daemon(&self) -> Option<&str> {
        Some(&self.daemon)
    }

    fn result(&self) -> Option<i64> {
        Some(self.result)
    }

    fn set_daemon(&mut self, daemon: &str) {
        self.daemon = daemon.to_string();
    }
}

impl KeaDaemonResult for KeaResponse {
    fn daemon(&self) -> Option<&str> {
        Some(&self.daemon)
    }

    fn result(&self) -> Option<i64> {
        Some(self.result)
    }

    fn set_daemon(&mut self, daemon: &str) {
        self.daemon = daemon.to_string();
    }
}

impl KeaDaemonResult for Value {
    fn daemon(&self) -> Option<&str> {
        match self.as_object()?.get("daemon") {
            None => Some(""),
            Some(daemon) => daemon.as_str(),
        }
    }

    fn result(&self) -> Option<i64> {
        self.get("result").and_then(Value::as_i64)
    }

    fn set_daemon(&mut self, daemon: &str) {
        if let Some(obj) = self.as_object_mut() {
            obj.insert("daemon".to_string(), Value::String(daemon.to_string()));
        }
    }
}

/// `(daemon, result)` of one response element, either may be missing
pub type DaemonResult = (Option<String>, Option<i64>);

/// Typed output slot for the response to one command
pub trait KeaResponseTarget: Send {
    /// Decode the raw payload returned for `command`
    fn decode(&mut self, command: &KeaCommand, payload: &str) -> Result<(), serde_json::Error>;

    /// `(daemon, result)` of every decoded element
    fn daemon_results(&self) -> Vec<DaemonResult>;
}

impl<T> KeaResponseTarget for Vec<T>
where
    T: DeserializeOwned + KeaDaemonResult + Send,
{
    fn decode(&mut self, command: &KeaCommand, payload: &str) -> Result<(), serde_json::Error> {
        let mut list: Vec<T> = serde_json::from_str(payload)?;
        for (element, daemon) in list.iter_mut().zip(command.daemons.iter()) {
            if element.daemon().map_or(true, str::is_empty) {
                element.set_daemon(daemon);
            }
        }
        *self = list;
        Ok(())
    }

    fn daemon_results(&self) -> Vec<DaemonResult> {
        self.iter()
            .map(|e| (e.daemon().map(str::to_string), e.result()))
            .collect()
    }
}
