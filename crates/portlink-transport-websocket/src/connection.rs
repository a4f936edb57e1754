//! WebSocket session implementation (framed-message variant)

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use portlink_transport::{
    SessionOptions, SessionSender, SessionStats, TransportConnector, TransportError,
    TransportKind, TransportResult, TransportSession, OUTBOUND_CHANNEL_CAPACITY,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig as ProtocolConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{Connector, MaybeTlsStream};
use tracing::{debug, error, trace};

use crate::config::WebSocketConfig;

pub type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector for the framed-message variant
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    config: Arc<WebSocketConfig>,
}

impl WebSocketConnector {
    pub fn new(config: WebSocketConfig) -> TransportResult<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }
}

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn connect(
        &self,
        addr: SocketAddr,
        options: &SessionOptions,
    ) -> TransportResult<Box<dyn TransportSession>> {
        if options.kind != TransportKind::FramedMessage {
            return Err(TransportError::ConfigurationError(format!(
                "WebSocket connector cannot open a {} session",
                options.kind
            )));
        }

        let url = self.config.relay_url(addr, options.use_encryption)?;
        debug!("Connecting to WebSocket: {}", url);

        let connector = if options.use_encryption {
            Connector::Rustls(self.config.build_tls_config(options.verify_server_cert)?)
        } else {
            Connector::Plain
        };

        let mut protocol_config = ProtocolConfig::default();
        protocol_config.max_message_size = Some(options.max_message_size);
        protocol_config.max_frame_size = Some(options.max_message_size);

        let (ws_stream, _response) = tokio::time::timeout(
            options.connect_timeout,
            tokio_tungstenite::connect_async_tls_with_config(
                url.as_str(),
                Some(protocol_config),
                true,
                Some(connector),
            ),
        )
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(map_ws_error)?;

        debug!("WebSocket connected to {}", url);

        Ok(Box::new(WebSocketSession::new(ws_stream, addr)))
    }
}

/// An open WebSocket session
///
/// One `send` is one binary message; one `recv` is one message.
pub struct WebSocketSession {
    /// Session ID for logging
    session_id: String,
    remote_addr: SocketAddr,
    source: Option<SplitStream<WsStream>>,
    sender: SessionSender,
    shutdown_tx: Option<oneshot::Sender<()>>,
    closed: Arc<AtomicBool>,
    bytes_sent: Arc<AtomicU64>,
    bytes_received: u64,
    created_at: Instant,
}

impl std::fmt::Debug for WebSocketSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketSession")
            .field("session_id", &self.session_id)
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}

impl WebSocketSession {
    /// Wrap an established WebSocket stream
    pub fn new(ws_stream: WsStream, remote_addr: SocketAddr) -> Self {
        let session_id = format!("ws-{}", uuid::Uuid::new_v4());

        let (ws_sink, ws_source) = ws_stream.split();

        let (tx, rx) = mpsc::channel::<Bytes>(OUTBOUND_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let closed = Arc::new(AtomicBool::new(false));
        let bytes_sent = Arc::new(AtomicU64::new(0));

        tokio::spawn(Self::writer_task(
            ws_sink,
            rx,
            shutdown_rx,
            bytes_sent.clone(),
            closed.clone(),
            session_id.clone(),
        ));

        Self {
            session_id,
            remote_addr,
            source: Some(ws_source),
            sender: SessionSender::new(tx, closed.clone()),
            shutdown_tx: Some(shutdown_tx),
            closed,
            bytes_sent,
            bytes_received: 0,
            created_at: Instant::now(),
        }
    }

    /// Writer task - sends queued payloads as binary messages
    async fn writer_task(
        mut sink: SplitSink<WsStream, Message>,
        mut rx: mpsc::Receiver<Bytes>,
        mut shutdown_rx: oneshot::Receiver<()>,
        bytes_sent: Arc<AtomicU64>,
        closed: Arc<AtomicBool>,
        session_id: String,
    ) {
        loop {
            tokio::select! {
                maybe_data = rx.recv() => {
                    let Some(data) = maybe_data else { break };
                    let len = data.len() as u64;

                    if let Err(e) = sink.send(Message::Binary(data.to_vec())).await {
                        error!("[{}] WebSocket send error: {}", session_id, e);
                        break;
                    }
                    bytes_sent.fetch_add(len, Ordering::Relaxed);
                }
                _ = &mut shutdown_rx => break,
            }
        }

        debug!("[{}] WebSocket writer task ended", session_id);
        closed.store(true, Ordering::SeqCst);
        let _ = sink.close().await;
    }

    fn mark_closed(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.source = None;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[async_trait]
impl TransportSession for WebSocketSession {
    fn sender(&self) -> SessionSender {
        self.sender.clone()
    }

    async fn recv(&mut self) -> TransportResult<Option<Bytes>> {
        loop {
            let Some(source) = self.source.as_mut() else {
                return Ok(None);
            };

            match source.next().await {
                Some(Ok(Message::Binary(data))) => {
                    trace!("[{}] Received {} bytes", self.session_id, data.len());
                    self.bytes_received += data.len() as u64;
                    return Ok(Some(Bytes::from(data)));
                }
                Some(Ok(Message::Text(text))) => {
                    self.bytes_received += text.len() as u64;
                    return Ok(Some(Bytes::from(text.into_bytes())));
                }
                Some(Ok(Message::Ping(_))) => {
                    // Pong is automatically handled by tungstenite
                    trace!("[{}] Received ping", self.session_id);
                }
                Some(Ok(Message::Pong(_))) => {
                    trace!("[{}] Received pong", self.session_id);
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!("[{}] WebSocket close received: {:?}", self.session_id, frame);
                    self.mark_closed();
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.mark_closed();
                    return Err(map_ws_error(e));
                }
                None => {
                    debug!("[{}] WebSocket stream ended", self.session_id);
                    self.mark_closed();
                    return Ok(None);
                }
            }
        }
    }

    async fn close(&mut self) {
        debug!("[{}] Closing WebSocket session", self.session_id);
        self.mark_closed();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::FramedMessage
    }

    fn remote_address(&self) -> SocketAddr {
        self.remote_addr
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received,
            uptime_secs: self.created_at.elapsed().as_secs(),
        }
    }
}

fn map_ws_error(e: WsError) -> TransportError {
    match e {
        WsError::Io(io) => TransportError::IoError(io),
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::SessionClosed,
        other => TransportError::ProtocolError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(
            map_ws_error(WsError::Io(io)),
            TransportError::IoError(_)
        ));
    }

    #[test]
    fn test_map_closed_error() {
        assert!(matches!(
            map_ws_error(WsError::ConnectionClosed),
            TransportError::SessionClosed
        ));
    }

    #[tokio::test]
    async fn test_rejects_raw_options() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = WebSocketConnector::default()
            .connect(addr, &SessionOptions::raw_stream())
            .await;
        assert!(matches!(
            result,
            Err(TransportError::ConfigurationError(_))
        ));
    }
}
