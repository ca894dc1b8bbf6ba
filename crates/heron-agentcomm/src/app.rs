//! Directory records supplied by the rest of the server
//!
//! Machines, apps, access points and daemons come from the database layer;
//! the communication manager only reads them to know where to send what.

use std::fmt;
use std::str::FromStr;

use heron_common::events::EventSubject;
use serde::{Deserialize, Serialize};

use crate::error::AgentCommError;

/// Kind of an access point exposed by an app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessPointKind {
    /// Control channel (Kea Control Agent, RNDC)
    Control,
    /// Statistics channel (BIND9 statistics-channel)
    Statistics,
}

impl AccessPointKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Statistics => "statistics",
        }
    }
}

impl fmt::Display for AccessPointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessPointKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "control" => Ok(Self::Control),
            "statistics" => Ok(Self::Statistics),
            other => Err(format!("unknown access point type {other}")),
        }
    }
}

/// Where an app can be reached for control or statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPoint {
    /// Kind of the access point
    pub kind: AccessPointKind,
    /// Host or IP of the daemon, as seen from the agent
    pub address: String,
    /// Port of the daemon
    pub port: u16,
    /// Optional secret (e.g. RNDC key)
    pub key: Option<String>,
}

impl AccessPoint {
    /// Create an access point without a key
    pub fn new(kind: AccessPointKind, address: impl Into<String>, port: u16) -> Self {
        Self {
            kind,
            address: address.into(),
            port,
            key: None,
        }
    }

    /// Attach a key
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// `host:port` of the access point
    pub fn endpoint(&self) -> String {
        join_host_port(&self.address, self.port)
    }

    /// `http://host:port/` of the access point
    pub fn url(&self) -> String {
        host_with_port_url(&self.address, self.port)
    }
}

/// Kind of an app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppKind {
    /// ISC Kea DHCP with its Control Agent
    Kea,
    /// ISC BIND9
    Bind9,
}

impl AppKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kea => "kea",
            Self::Bind9 => "bind9",
        }
    }
}

/// Machine an agent runs on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRef {
    /// Database id, 0 when not stored yet
    pub id: i64,
    /// Host or IP of the agent
    pub address: String,
    /// Port the agent listens on
    pub agent_port: u16,
}

impl MachineRef {
    /// Create a machine reference without a database id
    pub fn new(address: impl Into<String>, agent_port: u16) -> Self {
        Self {
            id: 0,
            address: address.into(),
            agent_port,
        }
    }

    /// `host:port` of the agent, the key of its connection
    pub fn agent_address(&self) -> String {
        join_host_port(&self.address, self.agent_port)
    }

    /// Event subject for this machine
    pub fn subject(&self) -> EventSubject {
        EventSubject::new(self.id, self.agent_address())
    }
}

/// Daemon belonging to an app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonRef {
    /// Database id, 0 when not stored yet
    pub id: i64,
    /// Daemon name (e.g. "dhcp4", "ca", "named")
    pub name: String,
}

impl DaemonRef {
    /// Create a daemon reference without a database id
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
        }
    }

    /// Event subject for this daemon
    pub fn subject(&self) -> EventSubject {
        EventSubject::new(self.id, self.name.clone())
    }
}

/// App running next to an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    /// Database id, 0 when not stored yet
    pub id: i64,
    /// Display name
    pub name: String,
    /// App kind
    pub kind: AppKind,
    /// Machine the app runs on
    pub machine: MachineRef,
    /// Access points of the app
    pub access_points: Vec<AccessPoint>,
    /// Daemons of the app
    pub daemons: Vec<DaemonRef>,
}

impl App {
    /// First access point of the given kind
    pub fn access_point(&self, kind: AccessPointKind) -> Result<&AccessPoint, AgentCommError> {
        self.access_points
            .iter()
            .find(|ap| ap.kind == kind)
            .ok_or_else(|| AgentCommError::MissingAccessPoint {
                app: self.name.clone(),
                kind,
            })
    }

    /// Daemon with the given name
    pub fn daemon(&self, name: &str) -> Option<&DaemonRef> {
        self.daemons.iter().find(|d| d.name == name)
    }

    /// Event subject for this app
    pub fn subject(&self) -> EventSubject {
        EventSubject::new(self.id, self.name.clone())
    }
}

/// Join host and port, bracketing IPv6 literals
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// `http://host:port/` with IPv6 literals bracketed
pub fn host_with_port_url(host: &str, port: u16) -> String {
    format!("http://{}/", join_host_port(host, port))
}

/// Host part of a `host:port` address, without IPv6 brackets
pub fn split_host(address: &str) -> Result<&str, AgentCommError> {
    if let Some(rest) = address.strip_prefix('[') {
        return rest
            .split_once("]:")
            .map(|(host, _)| host)
            .ok_or_else(|| AgentCommError::invalid_address(address, "missing port"));
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.contains(':') => port
            .parse::<u16>()
            .map(|_| host)
            .map_err(|_| AgentCommError::invalid_address(address, "invalid port")),
        _ => Err(AgentCommError::invalid_address(
            address,
            "expected host:port",
        )),
    }
}
