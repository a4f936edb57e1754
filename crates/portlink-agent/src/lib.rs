//! Tunnel lifecycle manager
//!
//! Exposes local services through a remote relay by keeping one outbound
//! session per configured server alive forever: connect, forward bytes to
//! and from the local service, send heartbeats, and reconnect after any
//! failure.
//!
//! ```text
//! AgentController ── resolve relay ──▶ TunnelActor (one per enabled server)
//!                                        ├─ TransportSession (raw TCP or WebSocket)
//!                                        ├─ HeartbeatScheduler
//!                                        ├─ LocalBridge
//!                                        └─ ReconnectPolicy
//!                                              │
//!                                              ▼
//!                                        TunnelRegistry ──▶ snapshot / status events
//! ```

pub mod actor;
pub mod bridge;
pub mod config;
pub mod controller;
pub mod error;
pub mod heartbeat;
pub mod reconnect;
pub mod registry;
pub mod transport;

#[cfg(test)]
mod mock;

pub use actor::{SessionEnd, TunnelActor};
pub use bridge::LocalBridge;
pub use config::{AgentConfig, ConfigError, TunnelSpec};
pub use controller::{AgentController, DnsResolver, Resolver};
pub use error::{AgentError, BridgeError, ResolutionError};
pub use heartbeat::{HeartbeatHandle, HeartbeatScheduler};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use registry::{RegistrySnapshot, StatusEvent, StatusWriter, TunnelRecord, TunnelRegistry, TunnelStatus};
pub use transport::TransportSelector;
