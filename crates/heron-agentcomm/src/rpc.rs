//! gRPC transport to agents
//!
//! [`AgentRpc`] is the seam between the communication loop and the wire:
//! production code uses [`GrpcAgentRpc`] over a mutual-TLS tonic channel,
//! tests use the generated `MockAgentRpc`. [`AgentConnector`] builds a
//! connection for an address and is what the registry calls on first use
//! and on reconnect.

use std::sync::Arc;

use async_trait::async_trait;
use heron_infra::{ClientMtlsConfig, MtlsError};
use heron_proto::agent_client::AgentClient;
use heron_proto::tracing::inject_context;
use heron_proto::{
    ForwardRndcCommandReq, ForwardRndcCommandRsp, ForwardToKeaOverHttpReq,
    ForwardToKeaOverHttpRsp, ForwardToNamedStatsReq, ForwardToNamedStatsRsp, GetStateReq,
    GetStateRsp, TailTextFileReq, TailTextFileRsp,
};
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};
use tracing::debug;

use crate::app::split_host;
use crate::config::AgentCommConfig;
use crate::error::AgentCommError;

/// Remote calls an agent serves
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentRpc: Send + Sync {
    /// Host and runtime state
    async fn get_state(&self, request: GetStateReq) -> Result<GetStateRsp, Status>;

    /// Relay an RNDC command to BIND9
    async fn forward_rndc_command(
        &self,
        request: ForwardRndcCommandReq,
    ) -> Result<ForwardRndcCommandRsp, Status>;

    /// Relay a statistics-channel query to BIND9
    async fn forward_to_named_stats(
        &self,
        request: ForwardToNamedStatsReq,
    ) -> Result<ForwardToNamedStatsRsp, Status>;

    /// Relay commands to a Kea Control Agent
    async fn forward_to_kea_over_http(
        &self,
        request: ForwardToKeaOverHttpReq,
    ) -> Result<ForwardToKeaOverHttpRsp, Status>;

    /// Tail a text file on the agent's host
    async fn tail_text_file(&self, request: TailTextFileReq) -> Result<TailTextFileRsp, Status>;
}

/// Builds connections to agents
#[cfg_attr(test, mockall::automock)]
pub trait AgentConnector: Send + Sync {
    /// Open a connection to the agent at `address` (`host:port`).
    ///
    /// Must not block: the channel is dialed on first use.
    fn connect(&self, address: &str) -> Result<Arc<dyn AgentRpc>, AgentCommError>;
}

/// [`AgentRpc`] over a tonic channel
#[derive(Clone)]
pub struct GrpcAgentRpc {
    client: AgentClient<Channel>,
}

impl GrpcAgentRpc {
    /// Wrap a channel
    pub fn new(channel: Channel) -> Self {
        Self {
            client: AgentClient::new(channel),
        }
    }
}

/// Wrap a message in a request carrying the current trace context
fn traced<T>(message: T) -> Request<T> {
    let mut request = Request::new(message);
    inject_context(request.metadata_mut());
    request
}

#[async_trait]
impl AgentRpc for GrpcAgentRpc {
    async fn get_state(&self, request: GetStateReq) -> Result<GetStateRsp, Status> {
        let mut client = self.client.clone();
        Ok(client.get_state(traced(request)).await?.into_inner())
    }

    async fn forward_rndc_command(
        &self,
        request: ForwardRndcCommandReq,
    ) -> Result<ForwardRndcCommandRsp, Status> {
        let mut client = self.client.clone();
        Ok(client
            .forward_rndc_command(traced(request))
            .await?
            .into_inner())
    }

    async fn forward_to_named_stats(
        &self,
        request: ForwardToNamedStatsReq,
    ) -> Result<ForwardToNamedStatsRsp, Status> {
        let mut client = self.client.clone();
        Ok(client
            .forward_to_named_stats(traced(request))
            .await?
            .into_inner())
    }

    async fn forward_to_kea_over_http(
        &self,
        request: ForwardToKeaOverHttpReq,
    ) -> Result<ForwardToKeaOverHttpRsp, Status> {
        let mut client = self.client.clone();
        Ok(client
            .forward_to_kea_over_http(traced(request))
            .await?
            .into_inner())
    }

    async fn tail_text_file(&self, request: TailTextFileReq) -> Result<TailTextFileRsp, Status> {
        let mut client = self.client.clone();
        Ok(client.tail_text_file(traced(request)).await?.into_inner())
    }
}

/// Production connector: mutual TLS with lazily dialed channels
pub struct GrpcConnector {
    mtls: ClientMtlsConfig,
    config: AgentCommConfig,
}

impl GrpcConnector {
    /// Create a connector using the given credentials and settings
    pub fn new(mtls: ClientMtlsConfig, config: AgentCommConfig) -> Self {
        Self { mtls, config }
    }
}

impl AgentConnector for GrpcConnector {
    fn connect(&self, address: &str) -> Result<Arc<dyn AgentRpc>, AgentCommError> {
        // The agent certificate is issued for the host or IP it is dialed at
        let domain = split_host(address)?;
        let tls = self
            .mtls
            .to_tonic_config(domain)
            .map_err(|source| AgentCommError::Credentials {
                address: address.to_string(),
                source,
            })?;

        let channel = Endpoint::from_shared(format!("https://{}", address))
            .map_err(|e| AgentCommError::invalid_address(address, e.to_string()))?
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.request_timeout)
            .keep_alive_timeout(self.config.keep_alive_timeout)
            .keep_alive_while_idle(true)
            .http2_keep_alive_interval(self.config.keep_alive_interval)
            .tls_config(tls)
            .map_err(|e| AgentCommError::Credentials {
                address: address.to_string(),
                source: MtlsError::TlsConfigError(e.to_string()),
            })?
            .connect_lazy();

        debug!(agent = %address, "prepared connection to agent");
        Ok(Arc::new(GrpcAgentRpc::new(channel)))
    }
}
