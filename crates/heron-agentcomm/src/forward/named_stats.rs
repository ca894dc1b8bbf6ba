//! Queries to the BIND9 statistics channel

use heron_proto::{status_message, status_ok, ForwardToNamedStatsReq, NamedStatsRequest};
use serde::de::DeserializeOwned;

use super::Bind9Channel;
use crate::agent::AppCommStatsKey;
use crate::app::{AccessPointKind, App};
use crate::dispatch::AgentRequest;
use crate::error::AgentCommError;
use crate::manager::AgentManager;

const OPERATION: &str = "send named statistics command";

impl AgentManager {
    /// Query `path` on the app's statistics channel and decode the JSON
    /// reply into `T`.
    ///
    /// Status and decode failures count against the app's statistics
    /// channel.
    pub async fn forward_to_named_stats<T: DeserializeOwned>(
        &self,
        app: &App,
        path: &str,
    ) -> Result<T, AgentCommError> {
        let stats_point = app.access_point(AccessPointKind::Statistics)?;
        let url = format!("{}{}", stats_point.url(), path.trim_start_matches('/'));
        let request = ForwardToNamedStatsReq {
            url: url.clone(),
            named_stats_request: Some(NamedStatsRequest {
                request: String::new(),
            }),
        };

        let rsp = self
            .round_trip(&app.machine, OPERATION, AgentRequest::ForwardToNamedStats(request))
            .await?
            .into_forward_to_named_stats()?;

        let outcome = if !status_ok(rsp.status.as_ref()) {
            Err(AgentCommError::status(
                app.machine.agent_address(),
                status_message(rsp.status.as_ref()),
            ))
        } else {
            match rsp.named_stats_response {
                Some(inner) if status_ok(inner.status.as_ref()) => {
                    serde_json::from_str::<T>(&inner.response)
                        .map_err(|e| AgentCommError::decode(&url, e.to_string()))
                }
                Some(inner) => Err(AgentCommError::status(
                    &url,
                    status_message(inner.status.as_ref()),
                )),
                None => Err(AgentCommError::status(&url, "missing statistics response")),
            }
        };

        let key = AppCommStatsKey::new(stats_point.address.clone(), stats_point.port);
        self.track_bind9(app, key, Bind9Channel::Stats, OPERATION, outcome)
            .await
    }
}
