//! Transport abstraction layer for relay sessions
//!
//! A relay session is either a raw bidirectional byte stream or a framed
//! message connection. This crate normalizes both into one interface so the
//! tunnel lifecycle code never has to know which one it is driving.
//!
//! # Event mapping
//!
//! | Event   | Rust shape                                   |
//! |---------|----------------------------------------------|
//! | open    | `TransportConnector::connect` returns `Ok`   |
//! | data    | `TransportSession::recv` returns `Ok(Some)`  |
//! | close   | `TransportSession::recv` returns `Ok(None)`  |
//! | error   | `TransportSession::recv` returns `Err`       |
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   Tunnel lifecycle                       │
//! │        (actor, heartbeat scheduler, local bridge)        │
//! └─────────────────────────────────────────────────────────┘
//!                           │
//!                           │ Uses traits
//!                           ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │           portlink-transport (this crate)                │
//! │  - TransportConnector   - TransportSession               │
//! │  - SessionSender        - TcpConnector (raw stream)      │
//! └─────────────────────────────────────────────────────────┘
//!                           │
//!                           │ Implemented by
//!                           ↓
//! ┌───────────────────────────┬─────────────────────────────┐
//! │ tcp (raw stream, here)    │ portlink-transport-websocket │
//! └───────────────────────────┴─────────────────────────────┘
//! ```

pub mod tcp;

pub use tcp::{TcpConnector, TcpSession};

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::{self, Debug};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// The single keep-alive probe written to relay sessions.
pub const HEARTBEAT_PROBE: [u8; 1] = [0x00];

/// Capacity of the outbound channel feeding a session's writer task
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Session closed")]
    SessionClosed,

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Timeout")]
    Timeout,

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Which session variant a tunnel uses to reach the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Direct TCP byte stream, no framing
    RawStream,
    /// Message-oriented WebSocket connection
    FramedMessage,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::RawStream => "raw-stream",
            TransportKind::FramedMessage => "framed-message",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options handed to a connector for one connection attempt
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Session variant to open
    pub kind: TransportKind,

    /// Use an encrypted channel (framed variant only: `wss://` instead of `ws://`)
    pub use_encryption: bool,

    /// Whether to verify the relay's TLS certificate when encryption is on
    pub verify_server_cert: bool,

    /// Upper bound on how long a connection attempt may take
    pub connect_timeout: Duration,

    /// Largest single message accepted by the framed variant
    pub max_message_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            kind: TransportKind::RawStream,
            use_encryption: false,
            verify_server_cert: true,
            connect_timeout: Duration::from_secs(10),
            max_message_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

impl SessionOptions {
    pub fn raw_stream() -> Self {
        Self::default()
    }

    pub fn framed_message(use_encryption: bool) -> Self {
        Self {
            kind: TransportKind::FramedMessage,
            use_encryption,
            ..Default::default()
        }
    }
}

/// Cloneable write handle for a session
///
/// Every clone feeds the same writer task, so the heartbeat scheduler and the
/// local bridge can both send without holding the session itself. Once the
/// session is torn down, `send` fails and `is_closed` reports `true`.
#[derive(Clone)]
pub struct SessionSender {
    tx: mpsc::Sender<Bytes>,
    closed: Arc<AtomicBool>,
}

impl Debug for SessionSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSender")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SessionSender {
    pub fn new(tx: mpsc::Sender<Bytes>, closed: Arc<AtomicBool>) -> Self {
        Self { tx, closed }
    }

    /// Queue one payload for the writer task
    ///
    /// For the framed variant each call becomes exactly one message.
    pub async fn send(&self, data: Bytes) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::SessionClosed);
        }

        self.tx
            .send(data)
            .await
            .map_err(|_| TransportError::SessionClosed)
    }

    /// Whether the owning session has been destroyed or closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.tx.is_closed()
    }
}

/// Statistics about a session
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Number of bytes sent
    pub bytes_sent: u64,

    /// Number of bytes received
    pub bytes_received: u64,

    /// Session uptime (seconds)
    pub uptime_secs: u64,
}

/// An open session to the relay
#[async_trait]
pub trait TransportSession: Send + Sync + Debug {
    /// Get a write handle that can be shared with other tasks
    fn sender(&self) -> SessionSender;

    /// Receive the next chunk (raw variant) or message (framed variant)
    ///
    /// Returns `None` once the session has been closed by the remote peer.
    async fn recv(&mut self) -> TransportResult<Option<Bytes>>;

    /// Tear the session down; further sends fail
    async fn close(&mut self);

    /// Check if the session is closed
    fn is_closed(&self) -> bool;

    /// Which variant this session is
    fn kind(&self) -> TransportKind;

    /// Get the remote peer address
    fn remote_address(&self) -> SocketAddr;

    /// Get session statistics
    fn stats(&self) -> SessionStats;
}

/// Client-side: establishes outgoing relay sessions
#[async_trait]
pub trait TransportConnector: Send + Sync + Debug {
    /// Open a session to the relay at `addr`
    async fn connect(
        &self,
        addr: SocketAddr,
        options: &SessionOptions,
    ) -> TransportResult<Box<dyn TransportSession>>;
}
