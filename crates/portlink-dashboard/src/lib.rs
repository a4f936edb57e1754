//! Status dashboard for the agent
//!
//! Serves the registry snapshot to browsers:
//! - `GET /ws` pushes the snapshot as JSON on connect, on a fixed cadence,
//!   and after every tunnel status change
//! - `GET /api/status` returns the current snapshot once
//! - everything else is served from the static assets directory

pub mod server;

pub use server::DashboardServer;

use std::net::SocketAddr;
use thiserror::Error;

/// Dashboard errors
#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("Invalid dashboard address {0}")]
    InvalidAddress(String),

    #[error("Failed to bind dashboard on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Dashboard server error: {0}")]
    Serve(#[from] std::io::Error),
}
