//! HTTP + WebSocket server publishing tunnel status using Axum

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use portlink_agent::config::DashboardConfig;
use portlink_agent::{RegistrySnapshot, TunnelRegistry};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::DashboardError;

/// Status dashboard server
#[derive(Debug)]
pub struct DashboardServer {
    addr: SocketAddr,
    registry: TunnelRegistry,
    assets_dir: PathBuf,
    publish_interval: Duration,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    registry: TunnelRegistry,
    publish_interval: Duration,
}

impl DashboardServer {
    pub fn new(addr: SocketAddr, registry: TunnelRegistry) -> Self {
        Self {
            addr,
            registry,
            assets_dir: PathBuf::from("public"),
            publish_interval: Duration::from_secs(1),
        }
    }

    pub fn from_config(
        config: &DashboardConfig,
        registry: TunnelRegistry,
    ) -> Result<Self, DashboardError> {
        let raw = format!("{}:{}", config.bind, config.port);
        let addr: SocketAddr = raw
            .parse()
            .map_err(|_| DashboardError::InvalidAddress(raw.clone()))?;

        Ok(Self::new(addr, registry)
            .with_assets_dir(config.assets_dir.clone())
            .with_publish_interval(config.publish_interval()))
    }

    pub fn with_assets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.assets_dir = dir.into();
        self
    }

    pub fn with_publish_interval(mut self, interval: Duration) -> Self {
        self.publish_interval = interval;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Build the router
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            publish_interval: self.publish_interval,
        };

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/ws", get(handle_ws))
            .route("/api/status", get(handle_api_status))
            .fallback_service(ServeDir::new(&self.assets_dir))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(state)
    }

    /// Bind the configured address and serve until the task is dropped
    pub async fn run(self) -> Result<(), DashboardError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| DashboardError::Bind {
                addr: self.addr,
                source,
            })?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<(), DashboardError> {
        let local = listener.local_addr()?;
        info!("📊 Dashboard listening on http://{}", local);
        info!("   Status:    http://{}/api/status", local);
        info!("   Live feed: ws://{}/ws", local);

        let app = self.router();
        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Current snapshot as JSON
async fn handle_api_status(State(state): State<AppState>) -> Json<RegistrySnapshot> {
    Json(state.registry.snapshot().await)
}

async fn handle_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut updates = state.registry.subscribe();

    if publish_snapshot(&mut socket, &state.registry).await.is_err() {
        return;
    }

    let mut ticker = tokio::time::interval(state.publish_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately; the snapshot was just sent
    ticker.tick().await;

    loop {
        let publish = tokio::select! {
            _ = ticker.tick() => true,
            update = updates.recv() => match update {
                Ok(event) => {
                    debug!(port = event.port, status = %event.status, "Pushing status change");
                    true
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Dashboard client lagged by {} status events", skipped);
                    true
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => false,
            },
        };

        if publish && publish_snapshot(&mut socket, &state.registry).await.is_err() {
            break;
        }
    }

    debug!("Dashboard client disconnected");
}

async fn publish_snapshot(socket: &mut WebSocket, registry: &TunnelRegistry) -> Result<(), ()> {
    let snapshot = registry.snapshot().await;
    let json = match serde_json::to_string(&snapshot) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize status snapshot: {}", e);
            return Err(());
        }
    };

    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}
