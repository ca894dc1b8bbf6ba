//! RNDC commands relayed to BIND9

use heron_proto::{status_message, status_ok, ForwardRndcCommandReq, RndcRequest};
use tracing::debug;

use super::Bind9Channel;
use crate::agent::AppCommStatsKey;
use crate::app::{AccessPointKind, App};
use crate::dispatch::AgentRequest;
use crate::error::AgentCommError;
use crate::manager::AgentManager;

const OPERATION: &str = "send rndc command";

/// Output of a successful RNDC command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RndcOutput {
    /// Text printed by the daemon
    pub output: String,
}

impl AgentManager {
    /// Run an RNDC command against the app's control access point
    pub async fn forward_rndc_command(
        &self,
        app: &App,
        command: &str,
    ) -> Result<RndcOutput, AgentCommError> {
        let ctrl = app.access_point(AccessPointKind::Control)?;
        let request = ForwardRndcCommandReq {
            address: ctrl.address.clone(),
            port: i64::from(ctrl.port),
            key: ctrl.key.clone().unwrap_or_default(),
            rndc_request: Some(RndcRequest {
                request: command.to_string(),
            }),
        };

        let rsp = self
            .round_trip(&app.machine, OPERATION, AgentRequest::ForwardRndcCommand(request))
            .await?
            .into_forward_rndc_command()?;
        debug!(app = %app.name, command, "rndc command answered");

        let outcome = if !status_ok(rsp.status.as_ref()) {
            Err(AgentCommError::status(
                app.machine.agent_address(),
                status_message(rsp.status.as_ref()),
            ))
        } else {
            match rsp.rndc_response {
                Some(inner) if status_ok(inner.status.as_ref()) => Ok(RndcOutput {
                    output: inner.response,
                }),
                Some(inner) => Err(AgentCommError::status(
                    ctrl.endpoint(),
                    status_message(inner.status.as_ref()),
                )),
                None => Err(AgentCommError::status(ctrl.endpoint(), "missing rndc response")),
            }
        };

        let key = AppCommStatsKey::new(ctrl.address.clone(), ctrl.port);
        self.track_bind9(app, key, Bind9Channel::Rndc, OPERATION, outcome)
            .await
    }
}
