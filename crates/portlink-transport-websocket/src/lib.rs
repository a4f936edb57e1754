//! WebSocket transport implementation using tokio-tungstenite
//!
//! This crate provides the framed-message session variant: one relay
//! session is one WebSocket connection, and each payload handed to the
//! session's `SessionSender` travels as one binary message.
//!
//! # Features
//!
//! - **Encryption**: optional TLS via rustls (`wss://` vs `ws://`)
//! - **Message framing**: the WebSocket protocol preserves message boundaries
//! - **Firewall Friendly**: runs over plain TCP ports that pass most middleboxes

pub mod config;
pub mod connection;

pub use config::WebSocketConfig;
pub use connection::{WebSocketConnector, WebSocketSession};
