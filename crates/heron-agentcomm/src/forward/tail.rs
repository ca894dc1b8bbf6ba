//! Text file tails fetched through an agent

use heron_proto::{status_message, status_ok, TailTextFileReq};

use crate::app::MachineRef;
use crate::dispatch::AgentRequest;
use crate::error::AgentCommError;
use crate::manager::AgentManager;

impl AgentManager {
    /// Lines of the file at `path` on the machine, starting `offset` bytes
    /// from its end
    pub async fn tail_text_file(
        &self,
        machine: &MachineRef,
        path: &str,
        offset: i64,
    ) -> Result<Vec<String>, AgentCommError> {
        let request = TailTextFileReq {
            path: path.to_string(),
            offset,
        };
        let rsp = self
            .round_trip(machine, "tail text file", AgentRequest::TailTextFile(request))
            .await?
            .into_tail_text_file()?;

        if !status_ok(rsp.status.as_ref()) {
            return Err(AgentCommError::status(
                machine.agent_address(),
                status_message(rsp.status.as_ref()),
            ));
        }
        Ok(rsp.lines)
    }
}
