//! Agent controller - resolves the relay and starts one actor per tunnel

use async_trait::async_trait;
use portlink_transport::TransportConnector;
use portlink_transport_websocket::WebSocketConfig;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::actor::TunnelActor;
use crate::config::AgentConfig;
use crate::error::{AgentError, ResolutionError};
use crate::registry::TunnelRegistry;
use crate::transport::TransportSelector;

/// Hostname to address lookup
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, hostname: &str) -> Result<IpAddr, ResolutionError>;
}

/// System resolver; takes the first address returned
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsResolver;

#[async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, hostname: &str) -> Result<IpAddr, ResolutionError> {
        let mut addrs = tokio::net::lookup_host((hostname, 0))
            .await
            .map_err(|e| ResolutionError::new(hostname, e.to_string()))?;

        addrs
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| ResolutionError::new(hostname, "no addresses returned"))
    }
}

pub struct AgentController {
    config: AgentConfig,
    registry: TunnelRegistry,
    resolver: Arc<dyn Resolver>,
    connector: Arc<dyn TransportConnector>,
}

impl std::fmt::Debug for AgentController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentController")
            .field("agent_name", &self.config.agent_name)
            .field("connector", &self.connector)
            .finish_non_exhaustive()
    }
}

impl AgentController {
    pub fn new(config: AgentConfig, registry: TunnelRegistry) -> Result<Self, AgentError> {
        let websocket = WebSocketConfig::default().with_path(&config.relay.websocket_path);
        let connector = TransportSelector::new(websocket)?;

        Ok(Self {
            config,
            registry,
            resolver: Arc::new(DnsResolver),
            connector: Arc::new(connector),
        })
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn TransportConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn registry(&self) -> &TunnelRegistry {
        &self.registry
    }

    /// Resolve the relay hostname, retrying after `reconnectDelay` until it succeeds
    pub async fn resolve_relay(&self) -> IpAddr {
        let hostname = &self.config.relay.hostname;
        let delay = self.config.network.reconnect_delay();

        loop {
            match self.resolver.resolve(hostname).await {
                Ok(ip) => {
                    info!(agent = %self.config.agent_name, "Resolved relay address: {}", ip);
                    return ip;
                }
                Err(e) => {
                    error!(
                        agent = %self.config.agent_name,
                        "{}, retrying in {}ms",
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Register and spawn one actor per enabled server
    pub async fn spawn_tunnels(&self, relay_ip: IpAddr) -> Result<JoinSet<()>, AgentError> {
        self.registry.set_resolved_address(relay_ip).await;

        let mut tunnels = JoinSet::new();
        for spec in self.config.tunnel_specs()? {
            info!(
                agent = %self.config.agent_name,
                "Starting {} tunnel on port {} → {}",
                spec.service_type,
                spec.relay_port,
                spec.local_address()
            );

            let status = self.registry.register(&spec).await?;
            let actor = TunnelActor::new(
                spec,
                relay_ip,
                &self.config.network,
                self.connector.clone(),
                status,
            );
            tunnels.spawn(actor.run());
        }

        Ok(tunnels)
    }

    /// Resolve, start every tunnel, then supervise them
    ///
    /// Only returns if no tunnel is enabled or every actor task has ended.
    pub async fn run(self) -> Result<(), AgentError> {
        info!(agent = %self.config.agent_name, "Agent starting...");

        let relay_ip = self.resolve_relay().await;
        let mut tunnels = self.spawn_tunnels(relay_ip).await?;

        if tunnels.is_empty() {
            warn!(agent = %self.config.agent_name, "No enabled servers configured");
            return Ok(());
        }

        while let Some(result) = tunnels.join_next().await {
            if let Err(e) = result {
                error!(agent = %self.config.agent_name, "Tunnel task ended: {}", e);
            }
        }

        Ok(())
    }
}
