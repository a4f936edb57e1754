//! Tunnel registry - the live status of every tunnel
//!
//! Records are created once per tunnel and only ever written through the
//! `StatusWriter` handed to that tunnel's actor. Readers take an owned
//! `RegistrySnapshot`, or subscribe to `StatusEvent`s to learn about
//! transitions as they happen.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::warn;

use crate::config::TunnelSpec;
use crate::error::AgentError;

/// Capacity of the status event channel
const STATUS_EVENT_CAPACITY: usize = 256;

/// Lifecycle state of one tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TunnelStatus {
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl TunnelStatus {
    /// Whether `next` may directly follow `self`
    ///
    /// Valid cycle: `Connecting -> Connected -> (Reconnecting | Error) -> Connecting`,
    /// plus `Connecting -> Error` when the connection attempt itself fails.
    pub fn can_transition_to(self, next: TunnelStatus) -> bool {
        use TunnelStatus::*;
        matches!(
            (self, next),
            (Connecting, Connected)
                | (Connecting, Error)
                | (Connected, Reconnecting)
                | (Connected, Error)
                | (Reconnecting, Connecting)
                | (Error, Connecting)
        )
    }
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TunnelStatus::Connecting => "Connecting",
            TunnelStatus::Connected => "Connected",
            TunnelStatus::Reconnecting => "Reconnecting",
            TunnelStatus::Error => "Error",
        };
        f.write_str(s)
    }
}

/// One tunnel as seen by observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelRecord {
    #[serde(rename = "type")]
    pub service_type: String,
    pub port: u16,
    pub local_host: String,
    pub local_port: u16,
    pub status: TunnelStatus,
}

/// Point-in-time copy of the whole registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub agent_name: String,
    pub resolved_address: Option<IpAddr>,
    pub tunnels: Vec<TunnelRecord>,
}

/// Emitted on every status write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub port: u16,
    pub status: TunnelStatus,
}

#[derive(Debug)]
struct RegistryState {
    agent_name: String,
    resolved_address: Option<IpAddr>,
    /// Configuration order
    tunnels: Vec<TunnelRecord>,
}

/// Shared registry of tunnel records
#[derive(Clone)]
pub struct TunnelRegistry {
    state: Arc<RwLock<RegistryState>>,
    update_tx: broadcast::Sender<StatusEvent>,
}

impl fmt::Debug for TunnelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelRegistry").finish_non_exhaustive()
    }
}

impl TunnelRegistry {
    pub fn new(agent_name: impl Into<String>) -> Self {
        let (update_tx, _) = broadcast::channel(STATUS_EVENT_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(RegistryState {
                agent_name: agent_name.into(),
                resolved_address: None,
                tunnels: Vec::new(),
            })),
            update_tx,
        }
    }

    pub async fn set_resolved_address(&self, address: IpAddr) {
        self.state.write().await.resolved_address = Some(address);
    }

    /// Create the record for a tunnel, starting in `Connecting`
    ///
    /// Returns the only handle allowed to change that record's status.
    pub async fn register(&self, spec: &TunnelSpec) -> Result<StatusWriter, AgentError> {
        let mut state = self.state.write().await;

        if state.tunnels.iter().any(|t| t.port == spec.relay_port) {
            return Err(AgentError::DuplicatePort(spec.relay_port));
        }

        state.tunnels.push(TunnelRecord {
            service_type: spec.service_type.clone(),
            port: spec.relay_port,
            local_host: spec.local_host.clone(),
            local_port: spec.local_port,
            status: TunnelStatus::Connecting,
        });

        Ok(StatusWriter {
            port: spec.relay_port,
            registry: self.clone(),
        })
    }

    /// Owned copy of the current state
    pub async fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.read().await;
        RegistrySnapshot {
            agent_name: state.agent_name.clone(),
            resolved_address: state.resolved_address,
            tunnels: state.tunnels.clone(),
        }
    }

    pub async fn status_of(&self, port: u16) -> Option<TunnelStatus> {
        self.state
            .read()
            .await
            .tunnels
            .iter()
            .find(|t| t.port == port)
            .map(|t| t.status)
    }

    /// Subscribe to status transitions
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.update_tx.subscribe()
    }

    async fn write_status(&self, port: u16, status: TunnelStatus) {
        {
            let mut state = self.state.write().await;
            let Some(record) = state.tunnels.iter_mut().find(|t| t.port == port) else {
                warn!(port, "Status update for unknown tunnel");
                return;
            };

            if record.status != status && !record.status.can_transition_to(status) {
                warn!(
                    port,
                    from = %record.status,
                    to = %status,
                    "Unexpected tunnel status transition"
                );
            }
            record.status = status;
        }

        // No subscribers is fine
        let _ = self.update_tx.send(StatusEvent { port, status });
    }
}

/// Write access to exactly one tunnel record
#[derive(Debug)]
pub struct StatusWriter {
    port: u16,
    registry: TunnelRegistry,
}

impl StatusWriter {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn set(&self, status: TunnelStatus) {
        self.registry.write_status(self.port, status).await;
    }
}
