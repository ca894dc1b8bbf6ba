//! Lifecycle event recording for agent communication.
//!
//! Provides a trait-based abstraction over the server's event center so
//! that communication code can emit human-readable notifications such as
//! "cannot connect to agent on {machine}" or "communication with {daemon}
//! resumed".
//!
//! Events are **fire-and-forget**: sinks log failures and never propagate
//! errors. A failed event must never break an agent call.

use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

/// Severity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    /// Informational
    Info,
    /// Something degraded or recovered
    Warning,
    /// Something failed
    Error,
}

impl EventLevel {
    /// Label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// An entity an event refers to (machine, app or daemon).
///
/// The event text references entities through `{machine}`, `{app}` and
/// `{daemon}` placeholders which sinks may turn into links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSubject {
    /// Database identifier, 0 when unknown
    pub id: i64,
    /// Display label (e.g. "10.0.0.1:8080", "dhcp4")
    pub label: String,
}

impl EventSubject {
    /// Create a subject with an id and a label
    pub fn new(id: i64, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }
}

/// A lifecycle notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Severity
    pub level: EventLevel,
    /// Text template with `{machine}`/`{app}`/`{daemon}` placeholders
    pub text: String,
    /// Optional longer description (e.g. the error chain)
    pub details: Option<String>,
    /// Machine the event refers to
    pub machine: Option<EventSubject>,
    /// App the event refers to
    pub app: Option<EventSubject>,
    /// Daemon the event refers to
    pub daemon: Option<EventSubject>,
}

impl Event {
    /// Create an event with the given level and text template
    pub fn new(level: EventLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
            details: None,
            machine: None,
            app: None,
            daemon: None,
        }
    }

    /// Error-level event
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(EventLevel::Error, text)
    }

    /// Warning-level event
    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(EventLevel::Warning, text)
    }

    /// Attach details
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Attach the machine subject
    pub fn with_machine(mut self, machine: EventSubject) -> Self {
        self.machine = Some(machine);
        self
    }

    /// Attach the app subject
    pub fn with_app(mut self, app: EventSubject) -> Self {
        self.app = Some(app);
        self
    }

    /// Attach the daemon subject
    pub fn with_daemon(mut self, daemon: EventSubject) -> Self {
        self.daemon = Some(daemon);
        self
    }

    /// Text with placeholders replaced by subject labels
    pub fn render(&self) -> String {
        let mut text = self.text.clone();
        for (placeholder, subject) in [
            ("{machine}", &self.machine),
            ("{app}", &self.app),
            ("{daemon}", &self.daemon),
        ] {
            if let Some(subject) = subject {
                text = text.replace(placeholder, &subject.label);
            }
        }
        text
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Trait for publishing lifecycle events.
///
/// Implementations are expected to be fire-and-forget: `publish()` logs a
/// warning on failure but never returns an error.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish an event
    async fn publish(&self, event: Event);
}

/// Sink that writes events to the tracing log.
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn publish(&self, event: Event) {
        let text = event.render();
        let details = event.details.as_deref().unwrap_or("");
        match event.level {
            EventLevel::Info => info!(details, "{}", text),
            EventLevel::Warning => warn!(details, "{}", text),
            EventLevel::Error => error!(details, "{}", text),
        }
    }
}

/// No-op sink.
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn publish(&self, _event: Event) {
        // intentionally empty
    }
}

/// Sink that keeps every event in memory, in publication order.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all events published so far
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events whose text template equals `text`
    pub fn with_text(&self, text: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.text == text)
            .collect()
    }

    /// Forget all recorded events
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn publish(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Well-known event texts.
pub mod texts {
    /// Transport failure towards an agent (onset)
    pub const AGENT_UNREACHABLE: &str = "cannot connect to agent on {machine}";
    /// Transport towards an agent works again
    pub const AGENT_RESUMED: &str = "communication with agent on {machine} resumed";
    /// A daemon behind an agent started failing
    pub const DAEMON_FAILED: &str = "communication with {daemon} failed";
    /// A daemon behind an agent works again
    pub const DAEMON_RESUMED: &str = "communication with {daemon} resumed";
    /// An app behind an agent started failing
    pub const APP_FAILED: &str = "communication with {app} failed";
    /// An app behind an agent works again
    pub const APP_RESUMED: &str = "communication with {app} resumed";
}
