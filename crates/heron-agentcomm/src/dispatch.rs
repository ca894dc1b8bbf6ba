//! Mapping of typed requests to remote calls
//!
//! Every request the communication loop carries is one of five variants;
//! [`dispatch`] matches on them exhaustively, so adding a variant without a
//! remote call does not compile.

use heron_proto::{
    ForwardRndcCommandReq, ForwardRndcCommandRsp, ForwardToKeaOverHttpReq,
    ForwardToKeaOverHttpRsp, ForwardToNamedStatsReq, ForwardToNamedStatsRsp, GetStateReq,
    GetStateRsp, TailTextFileReq, TailTextFileRsp,
};
use tonic::Status;
use tracing::error;

use crate::error::AgentCommError;
use crate::rpc::AgentRpc;

/// A request to an agent
#[derive(Debug, Clone, PartialEq)]
pub enum AgentRequest {
    /// Host and runtime state
    GetState(GetStateReq),
    /// RNDC command for BIND9
    ForwardRndcCommand(ForwardRndcCommandReq),
    /// Statistics-channel query for BIND9
    ForwardToNamedStats(ForwardToNamedStatsReq),
    /// Commands for a Kea Control Agent
    ForwardToKeaOverHttp(ForwardToKeaOverHttpReq),
    /// Tail of a text file
    TailTextFile(TailTextFileReq),
}

impl AgentRequest {
    /// Operation name used in logs and metrics
    pub fn operation(&self) -> &'static str {
        match self {
            Self::GetState(_) => "get_state",
            Self::ForwardRndcCommand(_) => "forward_rndc_command",
            Self::ForwardToNamedStats(_) => "forward_to_named_stats",
            Self::ForwardToKeaOverHttp(_) => "forward_to_kea_over_http",
            Self::TailTextFile(_) => "tail_text_file",
        }
    }
}

/// A reply from an agent
#[derive(Debug, Clone, PartialEq)]
pub enum AgentResponse {
    /// Host and runtime state
    GetState(GetStateRsp),
    /// RNDC command result
    ForwardRndcCommand(ForwardRndcCommandRsp),
    /// Statistics-channel result
    ForwardToNamedStats(ForwardToNamedStatsRsp),
    /// Kea Control Agent results
    ForwardToKeaOverHttp(ForwardToKeaOverHttpRsp),
    /// File lines
    TailTextFile(TailTextFileRsp),
}

impl AgentResponse {
    /// Variant name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GetState(_) => "GetState",
            Self::ForwardRndcCommand(_) => "ForwardRndcCommand",
            Self::ForwardToNamedStats(_) => "ForwardToNamedStats",
            Self::ForwardToKeaOverHttp(_) => "ForwardToKeaOverHttp",
            Self::TailTextFile(_) => "TailTextFile",
        }
    }

    fn unexpected(self, expected: &'static str) -> AgentCommError {
        error!(expected, actual = self.kind(), "agent reply does not match its request");
        AgentCommError::UnexpectedResponse {
            expected,
            actual: self.kind(),
        }
    }

    /// Host state reply
    pub fn into_get_state(self) -> Result<GetStateRsp, AgentCommError> {
        match self {
            Self::GetState(rsp) => Ok(rsp),
            other => Err(other.unexpected("GetState")),
        }
    }

    /// RNDC reply
    pub fn into_forward_rndc_command(self) -> Result<ForwardRndcCommandRsp, AgentCommError> {
        match self {
            Self::ForwardRndcCommand(rsp) => Ok(rsp),
            other => Err(other.unexpected("ForwardRndcCommand")),
        }
    }

    /// Statistics-channel reply
    pub fn into_forward_to_named_stats(self) -> Result<ForwardToNamedStatsRsp, AgentCommError> {
        match self {
            Self::ForwardToNamedStats(rsp) => Ok(rsp),
            other => Err(other.unexpected("ForwardToNamedStats")),
        }
    }

    /// Kea reply
    pub fn into_forward_to_kea_over_http(
        self,
    ) -> Result<ForwardToKeaOverHttpRsp, AgentCommError> {
        match self {
            Self::ForwardToKeaOverHttp(rsp) => Ok(rsp),
            other => Err(other.unexpected("ForwardToKeaOverHttp")),
        }
    }

    /// File tail reply
    pub fn into_tail_text_file(self) -> Result<TailTextFileRsp, AgentCommError> {
        match self {
            Self::TailTextFile(rsp) => Ok(rsp),
            other => Err(other.unexpected("TailTextFile")),
        }
    }
}

/// Issue the remote call matching the request
pub async fn dispatch(rpc: &dyn AgentRpc, request: &AgentRequest) -> Result<AgentResponse, Status> {
    match request {
        AgentRequest::GetState(req) => rpc
            .get_state(req.clone())
            .await
            .map(AgentResponse::GetState),
        AgentRequest::ForwardRndcCommand(req) => rpc
            .forward_rndc_command(req.clone())
            .await
            .map(AgentResponse::ForwardRndcCommand),
        AgentRequest::ForwardToNamedStats(req) => rpc
            .forward_to_named_stats(req.clone())
            .await
            .map(AgentResponse::ForwardToNamedStats),
        AgentRequest::ForwardToKeaOverHttp(req) => rpc
            .forward_to_kea_over_http(req.clone())
            .await
            .map(AgentResponse::ForwardToKeaOverHttp),
        AgentRequest::TailTextFile(req) => rpc
            .tail_text_file(req.clone())
            .await
            .map(AgentResponse::TailTextFile),
    }
}
