//! Forwarding operations
//!
//! Each operation builds a request, sends it through the communication loop
//! and then updates the error counters of the agent and of the daemon it
//! talked to:
//!
//! | counter                 | incremented on                      | events                       |
//! |-------------------------|-------------------------------------|------------------------------|
//! | agent `current_errors`  | any transport failure               | agent unreachable / resumed  |
//! | Kea `current_errors_ca` | batch, command or decode failure    | daemon "ca" failed / resumed |
//! | Kea per daemon          | element with result 1               | daemon failed / resumed      |
//! | BIND9 RNDC              | RNDC status failure                 | app failed / resumed         |
//! | BIND9 statistics        | status or decode failure            | app failed / resumed         |
//!
//! Events fire only when a counter leaves or returns to zero. The first
//! failure is returned with its whole cause; later ones get a short message
//! until a success resets the counter.

mod kea;
mod named_stats;
mod rndc;
mod state;
mod tail;

pub use rndc::RndcOutput;
pub use state::{DiscoveredApp, State};

use heron_common::error::format_chain;
use heron_common::events::{texts, Event};
use tracing::warn;

use crate::agent::{AppCommStatsKey, Bind9CommStats};
use crate::app::{App, MachineRef};
use crate::dispatch::{AgentRequest, AgentResponse};
use crate::error::AgentCommError;
use crate::manager::AgentManager;

/// Counter of a BIND9 channel
#[derive(Debug, Clone, Copy)]
pub(crate) enum Bind9Channel {
    Rndc,
    Stats,
}

impl Bind9Channel {
    fn counter(self, stats: &mut Bind9CommStats) -> &mut u64 {
        match self {
            Self::Rndc => &mut stats.current_errors_rndc,
            Self::Stats => &mut stats.current_errors_stats,
        }
    }
}

impl AgentManager {
    /// Send a request to the machine's agent and account for transport
    /// failures and recoveries
    pub(crate) async fn round_trip(
        &self,
        machine: &MachineRef,
        operation: &'static str,
        request: AgentRequest,
    ) -> Result<AgentResponse, AgentCommError> {
        let address = machine.agent_address();
        let outcome = match self.submit(&address, request).await {
            Err(e) if !e.counts_against_agent() => return Err(e),
            other => other,
        };
        // Without a record the connection was never created; nothing to count
        let Some(record) = self.registry.get(&address) else {
            return outcome;
        };

        let mut events = Vec::new();
        let result = {
            let mut stats = record.stats().await;
            let previous = stats.current_errors;
            match outcome {
                Ok(response) => {
                    stats.current_errors = 0;
                    if previous > 0 {
                        events.push(
                            Event::warning(texts::AGENT_RESUMED).with_machine(machine.subject()),
                        );
                    }
                    Ok(response)
                }
                Err(e) => {
                    stats.current_errors += 1;
                    warn!(
                        agent = %address,
                        operation,
                        errors = stats.current_errors,
                        transport = e.is_transport(),
                        error = %e,
                        "failed to reach agent"
                    );
                    if previous == 0 {
                        events.push(
                            Event::error(texts::AGENT_UNREACHABLE)
                                .with_details(format_chain(&e))
                                .with_machine(machine.subject()),
                        );
                        Err(AgentCommError::Unreachable {
                            address: address.clone(),
                            operation,
                            source: Box::new(e),
                        })
                    } else {
                        Err(AgentCommError::StillUnreachable {
                            address: address.clone(),
                            operation,
                        })
                    }
                }
            }
        };

        self.publish(events).await;
        result
    }

    /// Account a BIND9 call outcome against the app's channel counter
    pub(crate) async fn track_bind9<T>(
        &self,
        app: &App,
        key: AppCommStatsKey,
        channel: Bind9Channel,
        operation: &'static str,
        outcome: Result<T, AgentCommError>,
    ) -> Result<T, AgentCommError> {
        let address = app.machine.agent_address();
        let Some(record) = self.registry.get(&address) else {
            return outcome;
        };

        let mut events = Vec::new();
        let result = {
            let mut stats = record.stats().await;
            let counter = channel.counter(stats.bind9_mut(key.clone()));
            let previous = *counter;
            match outcome {
                Ok(value) => {
                    *counter = 0;
                    if previous > 0 {
                        events.push(
                            Event::warning(texts::APP_RESUMED)
                                .with_app(app.subject())
                                .with_machine(app.machine.subject()),
                        );
                    }
                    Ok(value)
                }
                Err(e) => {
                    *counter += 1;
                    warn!(
                        agent = %address,
                        bind9 = %format!("{}:{}", key.address, key.port),
                        operation,
                        errors = *counter,
                        error = %e,
                        "BIND9 call failed"
                    );
                    if previous == 0 {
                        events.push(
                            Event::error(texts::APP_FAILED)
                                .with_details(format_chain(&e))
                                .with_app(app.subject())
                                .with_machine(app.machine.subject()),
                        );
                        Err(e)
                    } else {
                        Err(AgentCommError::BackendStillFailing {
                            address: address.clone(),
                            operation,
                            backend: "BIND9",
                        })
                    }
                }
            }
        };

        self.publish(events).await;
        result
    }
}
