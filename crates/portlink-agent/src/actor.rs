//! Tunnel actor - owns the connect / forward / fail / reconnect cycle of one tunnel
//!
//! ```text
//!  Connecting ──ok──▶ Connected ──close──▶ Reconnecting ──delay──▶ Connecting
//!      │                  │
//!      └──fail──▶ Error ◀─┘error                        Error ──delay──▶ Connecting
//! ```
//!
//! The cycle has no terminal state; an actor retries until its task is dropped.

use portlink_transport::{SessionOptions, TransportConnector, TransportError, TransportSession};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use crate::bridge::LocalBridge;
use crate::config::{NetworkConfig, TunnelSpec};
use crate::error::BridgeError;
use crate::heartbeat::HeartbeatScheduler;
use crate::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::registry::{StatusWriter, TunnelStatus};

/// How a relay session ended
#[derive(Debug)]
pub enum SessionEnd {
    /// Connect failed or the open session reported an error
    Failed(TransportError),
    /// The relay closed the session
    Closed,
}

impl SessionEnd {
    /// Status recorded for this outcome; both lead to the same retry
    pub fn status(&self) -> TunnelStatus {
        match self {
            SessionEnd::Failed(_) => TunnelStatus::Error,
            SessionEnd::Closed => TunnelStatus::Reconnecting,
        }
    }
}

pub struct TunnelActor {
    spec: TunnelSpec,
    name: String,
    relay_addr: SocketAddr,
    options: SessionOptions,
    local_connect_timeout: Duration,
    connector: Arc<dyn TransportConnector>,
    status: StatusWriter,
    heartbeat: HeartbeatScheduler,
    reconnect: ReconnectPolicy,
}

impl std::fmt::Debug for TunnelActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelActor")
            .field("name", &self.name)
            .field("relay_addr", &self.relay_addr)
            .finish()
    }
}

impl TunnelActor {
    pub fn new(
        spec: TunnelSpec,
        relay_ip: IpAddr,
        network: &NetworkConfig,
        connector: Arc<dyn TransportConnector>,
        status: StatusWriter,
    ) -> Self {
        Self {
            name: spec.name(),
            relay_addr: SocketAddr::new(relay_ip, spec.relay_port),
            options: spec.session_options(network),
            local_connect_timeout: network.connect_timeout(),
            connector,
            status,
            heartbeat: HeartbeatScheduler::new(network.heartbeat_interval()),
            reconnect: ReconnectPolicy::new(ReconnectConfig::from_network(network)),
            spec,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn relay_address(&self) -> SocketAddr {
        self.relay_addr
    }

    /// Run the tunnel forever
    pub async fn run(mut self) {
        loop {
            self.run_once().await;

            let delay = self.reconnect.current_delay();
            info!(tunnel = %self.name, "Reconnecting in {}ms", delay.as_millis());
            self.reconnect.wait().await;
        }
    }

    /// One pass through Connecting -> (Connected ->) Reconnecting | Error
    ///
    /// Returns once the status of the ended session has been recorded and
    /// everything it owned has been torn down.
    pub async fn run_once(&mut self) -> SessionEnd {
        self.status.set(TunnelStatus::Connecting).await;
        debug!(tunnel = %self.name, kind = %self.options.kind, "Connecting to {}", self.relay_addr);

        let end = match self.connector.connect(self.relay_addr, &self.options).await {
            Ok(session) => self.serve(session).await,
            Err(e) => SessionEnd::Failed(e),
        };

        self.status.set(end.status()).await;
        match &end {
            SessionEnd::Closed => info!(tunnel = %self.name, "Closed. Reconnecting..."),
            SessionEnd::Failed(e) => error!(tunnel = %self.name, "Error: {}", e),
        }

        end
    }

    /// Connected state: heartbeat + local bridge until the relay session ends
    async fn serve(&mut self, mut session: Box<dyn TransportSession>) -> SessionEnd {
        self.reconnect.reset();
        self.status.set(TunnelStatus::Connected).await;
        info!(tunnel = %self.name, "Connected to {}", self.relay_addr);

        let heartbeat = self.heartbeat.start(session.sender(), &self.name);

        // A failed local connection leaves the relay session up
        let mut bridge = match LocalBridge::open(
            &self.spec.local_host,
            self.spec.local_port,
            session.sender(),
            self.local_connect_timeout,
            &self.name,
        )
        .await
        {
            Ok(bridge) => Some(bridge),
            Err(e) => {
                warn!(tunnel = %self.name, "{}", e);
                None
            }
        };

        let end = loop {
            match session.recv().await {
                Ok(Some(data)) => {
                    let Some(bridge) = bridge.as_mut() else {
                        trace!(tunnel = %self.name, "No local connection, dropped {} bytes", data.len());
                        continue;
                    };
                    match bridge.forward_to_local(&data).await {
                        Ok(()) => {}
                        Err(BridgeError::LocalClosed) => {
                            trace!(tunnel = %self.name, "Local side closed, dropped {} bytes", data.len());
                        }
                        Err(e) => warn!(tunnel = %self.name, "{}", e),
                    }
                }
                Ok(None) => break SessionEnd::Closed,
                Err(e) => break SessionEnd::Failed(e),
            }
        };

        heartbeat.stop();
        if let Some(bridge) = bridge {
            let (to_local, to_relay) = bridge.byte_counts();
            debug!(
                tunnel = %self.name,
                to_local,
                to_relay,
                "Local bridge to {} torn down",
                bridge.address()
            );
            bridge.shutdown().await;
        }
        session.close().await;

        let stats = session.stats();
        debug!(
            tunnel = %self.name,
            sent = stats.bytes_sent,
            received = stats.bytes_received,
            uptime_secs = stats.uptime_secs,
            "Relay session torn down"
        );

        end
    }
}
