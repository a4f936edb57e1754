//! Local bridge - relays bytes between the local service and the relay session

use bytes::Bytes;
use portlink_transport::SessionSender;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::BridgeError;

/// Read buffer size for the local connection
const READ_BUFFER_SIZE: usize = 16384; // 16KB

/// Connection to the local service of one tunnel
///
/// Local -> relay runs in a background task; relay -> local is driven by
/// the owner through `forward_to_local`. A closed local connection does not
/// close the relay session.
#[derive(Debug)]
pub struct LocalBridge {
    address: String,
    writer: Option<OwnedWriteHalf>,
    reader_task: JoinHandle<()>,
    local_closed: Arc<AtomicBool>,
    bytes_to_local: u64,
    bytes_to_relay: Arc<AtomicU64>,
}

impl LocalBridge {
    /// Connect to `host:port` and start pumping local bytes into `relay`
    pub async fn open(
        host: &str,
        port: u16,
        relay: SessionSender,
        connect_timeout: Duration,
        tunnel: &str,
    ) -> Result<Self, BridgeError> {
        let address = format!("{}:{}", host, port);

        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| BridgeError::Timeout(address.clone()))?
            .map_err(|source| BridgeError::ConnectionFailed {
                address: address.clone(),
                source,
            })?;
        let _ = stream.set_nodelay(true);

        debug!(tunnel = %tunnel, local = %address, "Connected to local service");

        let (reader, writer) = stream.into_split();
        let local_closed = Arc::new(AtomicBool::new(false));
        let bytes_to_relay = Arc::new(AtomicU64::new(0));

        let reader_task = tokio::spawn(Self::local_to_relay(
            reader,
            relay,
            local_closed.clone(),
            bytes_to_relay.clone(),
            tunnel.to_string(),
        ));

        Ok(Self {
            address,
            writer: Some(writer),
            reader_task,
            local_closed,
            bytes_to_local: 0,
            bytes_to_relay,
        })
    }

    /// Local -> relay pump
    async fn local_to_relay(
        mut reader: OwnedReadHalf,
        relay: SessionSender,
        local_closed: Arc<AtomicBool>,
        bytes_to_relay: Arc<AtomicU64>,
        tunnel: String,
    ) {
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];

        loop {
            match reader.read(&mut buffer).await {
                Ok(0) => {
                    info!(tunnel = %tunnel, "Local connection closed");
                    break;
                }
                Ok(n) => {
                    if let Err(e) = relay.send(Bytes::copy_from_slice(&buffer[..n])).await {
                        debug!(tunnel = %tunnel, "Relay session gone, local reader stopping: {}", e);
                        break;
                    }
                    bytes_to_relay.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(tunnel = %tunnel, "Error reading from local service: {}", e);
                    break;
                }
            }
        }

        local_closed.store(true, Ordering::SeqCst);
    }

    /// Relay -> local: write one received chunk to the local service
    pub async fn forward_to_local(&mut self, data: &[u8]) -> Result<(), BridgeError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(BridgeError::LocalClosed);
        };

        if let Err(e) = writer.write_all(data).await {
            self.writer = None;
            self.local_closed.store(true, Ordering::SeqCst);
            return Err(BridgeError::Io(e));
        }

        self.bytes_to_local += data.len() as u64;
        Ok(())
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_local_closed(&self) -> bool {
        self.local_closed.load(Ordering::SeqCst)
    }

    /// (bytes relay -> local, bytes local -> relay)
    pub fn byte_counts(&self) -> (u64, u64) {
        (
            self.bytes_to_local,
            self.bytes_to_relay.load(Ordering::Relaxed),
        )
    }

    /// Close the local connection and stop the reader task
    pub async fn shutdown(mut self) {
        self.reader_task.abort();
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }
}

impl Drop for LocalBridge {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn relay_channel() -> (SessionSender, mpsc::Receiver<Bytes>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::channel(64);
        let closed = Arc::new(AtomicBool::new(false));
        (SessionSender::new(tx, closed.clone()), rx, closed)
    }

    #[tokio::test]
    async fn test_bidirectional_forwarding() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (relay, mut relay_rx, _closed) = relay_channel();

        let local_service = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping");
            socket.write_all(b"pong").await.unwrap();
            socket
        });

        let mut bridge = LocalBridge::open(
            "127.0.0.1",
            port,
            relay,
            Duration::from_secs(5),
            "TCP [Port: 10000]",
        )
        .await
        .unwrap();
        assert_eq!(bridge.address(), format!("127.0.0.1:{}", port));

        bridge.forward_to_local(b"ping").await.unwrap();

        let mut received = Vec::new();
        while received.len() < 4 {
            received.extend_from_slice(&relay_rx.recv().await.unwrap());
        }
        assert_eq!(received, b"pong");

        let _socket = local_service.await.unwrap();
        assert_eq!(bridge.byte_counts(), (4, 4));
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_local_close_leaves_relay_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (relay, _relay_rx, _closed) = relay_channel();
        let relay_probe = relay.clone();

        let accept = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let bridge = LocalBridge::open("127.0.0.1", port, relay, Duration::from_secs(5), "t")
            .await
            .unwrap();
        accept.await.unwrap();

        for _ in 0..50 {
            if bridge.is_local_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(bridge.is_local_closed());
        assert!(!relay_probe.is_closed());
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (relay, _rx, _closed) = relay_channel();
        let result =
            LocalBridge::open("127.0.0.1", port, relay, Duration::from_secs(5), "t").await;

        assert!(matches!(
            result,
            Err(BridgeError::ConnectionFailed { .. })
        ));
    }
}
