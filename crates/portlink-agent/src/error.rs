use crate::config::ConfigError;
use portlink_transport::TransportError;
use thiserror::Error;

/// The relay hostname could not be resolved
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to resolve {hostname}: {reason}")]
pub struct ResolutionError {
    pub hostname: String,
    pub reason: String,
}

impl ResolutionError {
    pub fn new(hostname: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from the local side of a tunnel
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to connect to local service {address}: {source}")]
    ConnectionFailed {
        address: String,
        source: std::io::Error,
    },

    #[error("Timed out connecting to local service {0}")]
    Timeout(String),

    #[error("IO error during forwarding: {0}")]
    Io(#[from] std::io::Error),

    #[error("Local connection closed")]
    LocalClosed,
}

/// Errors that can occur in the agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Address resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Relay port {0} is already registered")]
    DuplicatePort(u16),
}
