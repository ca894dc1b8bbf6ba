//! Commands relayed to a Kea Control Agent

use std::collections::BTreeMap;

use heron_common::events::{texts, Event, EventSubject};
use heron_common::KEA_CONTROL_AGENT_DAEMON;
use heron_proto::{status_message, status_ok, ForwardToKeaOverHttpReq, KeaRequest};
use tracing::{debug, warn};

use crate::agent::{AppCommStatsKey, KeaCommStats};
use crate::app::{AccessPointKind, App};
use crate::dispatch::AgentRequest;
use crate::error::AgentCommError;
use crate::kea::{KeaCmdsResult, KeaCommand, KeaResponseTarget, KEA_RESPONSE_ERROR};
use crate::manager::AgentManager;

const OPERATION: &str = "send Kea commands";

/// Failures observed in one reply from the Control Agent
#[derive(Debug, Default)]
struct ReplyTally {
    ca_errors: u64,
    ca_details: Vec<String>,
    daemon_errors: BTreeMap<String, u64>,
}

impl ReplyTally {
    fn ca_failure(&mut self, error: &AgentCommError) {
        self.ca_errors += 1;
        self.ca_details.push(error.to_string());
    }

    fn record_daemons(&mut self, target: &dyn KeaResponseTarget) {
        for (daemon, result) in target.daemon_results() {
            let (Some(daemon), Some(result)) = (daemon, result) else {
                warn!("missing daemon or result in response from Kea CA");
                continue;
            };
            let daemon = if daemon.is_empty() {
                KEA_CONTROL_AGENT_DAEMON.to_string()
            } else {
                daemon
            };
            // The last element seen for a daemon decides whether it is failing
            if result == KEA_RESPONSE_ERROR {
                *self.daemon_errors.entry(daemon).or_insert(0) += 1;
            } else {
                self.daemon_errors.insert(daemon, 0);
            }
        }
    }
}

impl AgentManager {
    /// Send `commands` to the app's Kea Control Agent in one request.
    ///
    /// The reply to `commands[i]` is decoded into `outputs[i]`. Failures of
    /// individual commands are reported in [`KeaCmdsResult::cmds_errors`];
    /// `Err` is returned only when nothing could be sent.
    pub async fn forward_to_kea_over_http(
        &self,
        app: &App,
        commands: &[KeaCommand],
        outputs: &mut [&mut dyn KeaResponseTarget],
    ) -> Result<KeaCmdsResult, AgentCommError> {
        let ctrl = app.access_point(AccessPointKind::Control)?;
        let ca_url = ctrl.url();
        let request = ForwardToKeaOverHttpReq {
            url: ca_url.clone(),
            kea_requests: commands
                .iter()
                .map(|c| KeaRequest { request: c.marshal() })
                .collect(),
        };

        let rsp = self
            .round_trip(&app.machine, OPERATION, AgentRequest::ForwardToKeaOverHttp(request))
            .await?
            .into_forward_to_kea_over_http()?;

        let mut result = KeaCmdsResult::default();
        let mut tally = ReplyTally::default();

        if !status_ok(rsp.status.as_ref()) {
            let error = AgentCommError::status(&ca_url, status_message(rsp.status.as_ref()));
            tally.ca_failure(&error);
            result.error = Some(error);
        }

        for (idx, kea_rsp) in rsp.kea_responses.iter().enumerate() {
            if !status_ok(kea_rsp.status.as_ref()) {
                let error = AgentCommError::status(&ca_url, status_message(kea_rsp.status.as_ref()));
                tally.ca_failure(&error);
                result.cmds_errors.push(Some(error));
                continue;
            }

            let (Some(command), Some(output)) = (commands.get(idx), outputs.get_mut(idx)) else {
                let error = AgentCommError::decode(&ca_url, format!("unexpected response #{idx}"));
                tally.ca_failure(&error);
                result.cmds_errors.push(Some(error));
                continue;
            };

            // Malformed payloads count as communication failures with the CA
            if let Err(e) = output.decode(command, &kea_rsp.response) {
                let error = AgentCommError::decode(&ca_url, e.to_string());
                tally.ca_failure(&error);
                result.cmds_errors.push(Some(error));
                continue;
            }

            tally.record_daemons(&**output);
            result.cmds_errors.push(None);
        }

        let events = match self.registry.get(&app.machine.agent_address()) {
            Some(record) => {
                let mut stats = record.stats().await;
                let key = AppCommStatsKey::new(ctrl.address.clone(), ctrl.port);
                apply_tally(app, stats.kea_mut(key), tally)
            }
            None => Vec::new(),
        };
        self.publish(events).await;

        debug!(app = %app.name, url = %ca_url, commands = commands.len(), "Kea commands answered");
        Ok(result)
    }
}

/// Fold one reply's tally into the running counters, returning the events
/// for counters that left or returned to zero
fn apply_tally(app: &App, stats: &mut KeaCommStats, tally: ReplyTally) -> Vec<Event> {
    let mut events = Vec::new();
    let daemon_event = |event: Event, subject: EventSubject| {
        event
            .with_daemon(subject)
            .with_app(app.subject())
            .with_machine(app.machine.subject())
    };

    let ca_subject = app
        .daemon(KEA_CONTROL_AGENT_DAEMON)
        .map(|d| d.subject())
        .unwrap_or_else(|| EventSubject::new(0, KEA_CONTROL_AGENT_DAEMON));
    let previous = stats.current_errors_ca;
    if tally.ca_errors > 0 {
        stats.current_errors_ca += tally.ca_errors;
        if previous == 0 {
            warn!(app = %app.name, errors = tally.ca_errors, "communication with Kea CA failed");
            events.push(daemon_event(
                Event::error(texts::DAEMON_FAILED).with_details(tally.ca_details.join("\n")),
                ca_subject,
            ));
        }
    } else {
        stats.current_errors_ca = 0;
        if previous > 0 {
            events.push(daemon_event(Event::warning(texts::DAEMON_RESUMED), ca_subject));
        }
    }

    for (name, count) in tally.daemon_errors {
        let previous = stats.current_errors_daemons.get(&name).copied();
        let current = match previous {
            Some(previous) if count > 0 => previous + count,
            _ => count,
        };
        stats.current_errors_daemons.insert(name.clone(), current);

        let previous = previous.unwrap_or(0);
        if (previous == 0) == (current == 0) {
            continue;
        }
        // Only daemons the app knows about get events
        let Some(daemon) = app.daemon(&name) else {
            continue;
        };
        let event = if current == 0 {
            Event::warning(texts::DAEMON_RESUMED)
        } else {
            Event::error(texts::DAEMON_FAILED)
        };
        events.push(daemon_event(event, daemon.subject()));
    }

    events
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::kea::{KeaResponse, KeaResponseHeader};
    use crate::rpc::MockAgentRpc;
    use heron_common::events::EventLevel;
    use heron_proto::{ForwardToKeaOverHttpRsp, KeaResponse as KeaReply, Status};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn ok_reply(payloads: &[&str]) -> ForwardToKeaOverHttpRsp {
        ForwardToKeaOverHttpRsp {
            status: Some(Status::ok()),
            kea_responses: payloads
                .iter()
                .map(|p| KeaReply {
                    status: Some(Status::ok()),
                    response: p.to_string(),
                })
                .collect(),
        }
    }

    fn scripted_agent(replies: Vec<ForwardToKeaOverHttpRsp>) -> MockAgentRpc {
        let replies = Mutex::new(VecDeque::from(replies));
        let mut rpc = MockAgentRpc::new();
        rpc.expect_forward_to_kea_over_http().returning(move |_| {
            Ok(replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or_default())
        });
        rpc
    }

    fn kea_key() -> AppCommStatsKey {
        AppCommStatsKey::new("localhost", 8000)
    }

    async fn kea_stats(manager: &AgentManager) -> KeaCommStats {
        manager
            .agent_stats(AGENT, 0)
            .await
            .and_then(|s| s.kea(&kea_key()).cloned())
            .expect("kea stats exist")
    }

    const DHCP4_FAILS: &str = r#"[
        {"result": 1, "text": "operation failed"},
        {"result": 0, "text": "operation succeeded", "arguments": {"success": true}}
    ]"#;

    #[tokio::test]
    async fn daemon_errors_accumulate_per_daemon() {
        let (manager, events) = manager(scripted_agent(vec![
            ok_reply(&[DHCP4_FAILS]),
            ok_reply(&[DHCP4_FAILS]),
        ]));
        let app = kea_app();
        let command = KeaCommand::new("test-command", ["dhcp4", "dhcp6"], None);

        let mut out: Vec<KeaResponse> = Vec::new();
        let result = manager
            .forward_to_kea_over_http(&app, std::slice::from_ref(&command), &mut [&mut out])
            .await
            .expect("commands are sent");
        assert!(result.is_ok());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].daemon, "dhcp4");
        assert_eq!(out[1].daemon, "dhcp6");

        let stats = kea_stats(&manager).await;
        assert_eq!(stats.current_errors_ca, 0);
        assert_eq!(stats.current_errors_daemons.get("dhcp4"), Some(&1));
        assert_eq!(stats.current_errors_daemons.get("dhcp6"), Some(&0));

        let mut out: Vec<KeaResponse> = Vec::new();
        manager
            .forward_to_kea_over_http(&app, std::slice::from_ref(&command), &mut [&mut out])
            .await
            .expect("commands are sent");
        let stats = kea_stats(&manager).await;
        assert_eq!(stats.current_errors_daemons.get("dhcp4"), Some(&2));
        assert_eq!(stats.current_errors_daemons.get("dhcp6"), Some(&0));

        // Only the onset is reported
        let failed = events.with_text(texts::DAEMON_FAILED);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].render(), "communication with dhcp4 failed");
        assert_eq!(failed[0].daemon.as_ref().map(|d| d.id), Some(11));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn flapping_daemon_reports_each_transition() {
        let failing = r#"[{"result": 1, "text": "failed"}]"#;
        let working = r#"[{"result": 0}]"#;
        let (manager, events) = manager(scripted_agent(vec![
            ok_reply(&[failing]),
            ok_reply(&[working]),
            ok_reply(&[failing]),
        ]));
        let app = kea_app();
        let command = KeaCommand::new("config-get", ["dhcp4"], None);

        for _ in 0..3 {
            let mut out: Vec<KeaResponseHeader> = Vec::new();
            manager
                .forward_to_kea_over_http(&app, std::slice::from_ref(&command), &mut [&mut out])
                .await
                .expect("commands are sent");
        }

        assert_eq!(events.with_text(texts::DAEMON_FAILED).len(), 2);
        assert_eq!(events.with_text(texts::DAEMON_RESUMED).len(), 1);
        assert_eq!(
            kea_stats(&manager).await.current_errors_daemons.get("dhcp4"),
            Some(&1)
        );
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn failed_command_is_reported_in_its_slot() {
        let mut reply = ok_reply(&[r#"[{"result": 0}]"#, "", r#"[{"result": 0}]"#]);
        reply.kea_responses[1].status = Some(Status::error("unable to forward command"));
        let (manager, events) = manager(scripted_agent(vec![reply]));

        let commands = vec![
            KeaCommand::new("version-get", ["dhcp4"], None),
            KeaCommand::new("version-get", ["dhcp6"], None),
            KeaCommand::new("version-get", ["d2"], None),
        ];
        let mut a: Vec<KeaResponseHeader> = Vec::new();
        let mut b: Vec<KeaResponseHeader> = Vec::new();
        let mut c: Vec<KeaResponseHeader> = Vec::new();
        let result = manager
            .forward_to_kea_over_http(&kea_app(), &commands, &mut [&mut a, &mut b, &mut c])
            .await
            .expect("commands are sent");

        assert!(result.error.is_none());
        assert_eq!(result.cmds_errors.len(), 3);
        assert!(result.cmds_errors[0].is_none());
        assert!(matches!(
            result.cmds_errors[1],
            Some(AgentCommError::Status { ref message, .. }) if message == "unable to forward command"
        ));
        assert!(result.cmds_errors[2].is_none());
        assert_eq!(a[0].daemon, "dhcp4");
        assert_eq!(c[0].daemon, "d2");

        assert_eq!(kea_stats(&manager).await.current_errors_ca, 1);
        let failed = events.with_text(texts::DAEMON_FAILED);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].render(), "communication with ca failed");
        assert_eq!(failed[0].level, EventLevel::Error);
        assert!(failed[0]
            .details
            .as_deref()
            .unwrap_or("")
            .contains("unable to forward command"));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn undecodable_payload_counts_against_the_control_agent() {
        let (manager, _events) = manager(scripted_agent(vec![ok_reply(&["{ not json"])]));
        let command = KeaCommand::new("config-get", ["dhcp4"], None);

        let mut out: Vec<KeaResponse> = Vec::new();
        let result = manager
            .forward_to_kea_over_http(&kea_app(), std::slice::from_ref(&command), &mut [&mut out])
            .await
            .expect("commands are sent");

        assert!(!result.is_ok());
        assert!(matches!(result.cmds_errors[0], Some(AgentCommError::Decode { .. })));

        let stats = manager.agent_stats(AGENT, 0).await.expect("agent is known");
        assert_eq!(stats.current_errors, 0);
        assert_eq!(
            stats.kea(&kea_key()).map(|k| k.current_errors_ca),
            Some(1)
        );
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn control_agent_failure_and_recovery() {
        let failing = ForwardToKeaOverHttpRsp {
            status: Some(Status::error("connection refused")),
            kea_responses: Vec::new(),
        };
        let (manager, events) = manager(scripted_agent(vec![
            failing.clone(),
            failing,
            ok_reply(&[r#"[{"result": 0}]"#]),
        ]));
        let app = kea_app();
        let command = KeaCommand::new("version-get", Vec::<String>::new(), None);

        for _ in 0..2 {
            let mut out: Vec<KeaResponseHeader> = Vec::new();
            let result = manager
                .forward_to_kea_over_http(&app, std::slice::from_ref(&command), &mut [&mut out])
                .await
                .expect("request reaches the agent");
            assert!(result.error.is_some());
        }
        assert_eq!(kea_stats(&manager).await.current_errors_ca, 2);

        let mut out: Vec<KeaResponseHeader> = Vec::new();
        let result = manager
            .forward_to_kea_over_http(&app, std::slice::from_ref(&command), &mut [&mut out])
            .await
            .expect("request reaches the agent");
        assert!(result.is_ok());

        let stats = kea_stats(&manager).await;
        assert_eq!(stats.current_errors_ca, 0);
        // A reply from the CA itself is tallied under its name
        assert_eq!(stats.current_errors_daemons.get("ca"), Some(&0));

        let recorded = events.events();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].text, texts::DAEMON_FAILED);
        assert_eq!(recorded[1].text, texts::DAEMON_RESUMED);
        assert_eq!(recorded[1].daemon.as_ref().map(|d| d.id), Some(13));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn untyped_reply_without_daemon_is_tallied_as_control_agent() {
        let (manager, events) = manager(scripted_agent(vec![ok_reply(&[
            r#"[{"result": 1, "text": "ca failed"}]"#,
        ])]));
        let command = KeaCommand::new("version-get", Vec::<String>::new(), None);

        let mut out: Vec<serde_json::Value> = Vec::new();
        let result = manager
            .forward_to_kea_over_http(&kea_app(), std::slice::from_ref(&command), &mut [&mut out])
            .await
            .expect("commands are sent");
        assert!(result.is_ok());

        let stats = kea_stats(&manager).await;
        assert_eq!(stats.current_errors_daemons.get("ca"), Some(&1));
        let failed = events.with_text(texts::DAEMON_FAILED);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].daemon.as_ref().map(|d| d.id), Some(13));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_daemons_are_counted_without_events() {
        let (manager, events) = manager(scripted_agent(vec![ok_reply(&[r#"[{"result": 1}]"#])]));
        let command = KeaCommand::new("config-get", ["netconf"], None);

        let mut out: Vec<KeaResponseHeader> = Vec::new();
        manager
            .forward_to_kea_over_http(&kea_app(), std::slice::from_ref(&command), &mut [&mut out])
            .await
            .expect("commands are sent");

        assert_eq!(
            kea_stats(&manager).await.current_errors_daemons.get("netconf"),
            Some(&1)
        );
        assert!(events.events().is_empty());
        manager.shutdown().await;
    }
}
