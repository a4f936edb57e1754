//! Picks the session variant for each connection attempt

use async_trait::async_trait;
use portlink_transport::{
    SessionOptions, TcpConnector, TransportConnector, TransportKind, TransportResult,
    TransportSession,
};
use portlink_transport_websocket::{WebSocketConfig, WebSocketConnector};
use std::net::SocketAddr;
use tracing::debug;

/// Dispatches on `SessionOptions::kind` to the raw-stream or framed-message connector
#[derive(Debug, Clone)]
pub struct TransportSelector {
    raw: TcpConnector,
    framed: WebSocketConnector,
}

impl TransportSelector {
    pub fn new(websocket: WebSocketConfig) -> TransportResult<Self> {
        Ok(Self {
            raw: TcpConnector::new(),
            framed: WebSocketConnector::new(websocket)?,
        })
    }
}

impl Default for TransportSelector {
    fn default() -> Self {
        Self {
            raw: TcpConnector::new(),
            framed: WebSocketConnector::default(),
        }
    }
}

#[async_trait]
impl TransportConnector for TransportSelector {
    async fn connect(
        &self,
        addr: SocketAddr,
        options: &SessionOptions,
    ) -> TransportResult<Box<dyn TransportSession>> {
        debug!(relay = %addr, kind = %options.kind, "Opening relay session");

        match options.kind {
            TransportKind::RawStream => self.raw.connect(addr, options).await,
            TransportKind::FramedMessage => self.framed.connect(addr, options).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_raw_stream_dispatch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let selector = TransportSelector::default();
        let session = selector
            .connect(addr, &SessionOptions::raw_stream())
            .await
            .unwrap();
        assert_eq!(session.kind(), TransportKind::RawStream);

        session
            .sender()
            .send(bytes::Bytes::from_static(&[0x00]))
            .await
            .unwrap();
        assert_eq!(server.await.unwrap(), [0x00]);
    }

    #[tokio::test]
    async fn test_framed_dispatch_reaches_websocket_connector() {
        // A plain TCP listener that never completes the handshake
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let selector = TransportSelector::default();
        let result = selector
            .connect(addr, &SessionOptions::framed_message(false))
            .await;

        assert!(result.is_err());
    }
}
