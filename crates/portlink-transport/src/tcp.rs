//! Raw-stream session variant over plain TCP

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::{
    SessionOptions, SessionSender, SessionStats, TransportConnector, TransportError,
    TransportKind, TransportResult, TransportSession, OUTBOUND_CHANNEL_CAPACITY,
};

/// Read buffer size for the raw stream
const READ_BUFFER_SIZE: usize = 16384; // 16KB

/// Connector for the raw-stream variant
#[derive(Debug, Default, Clone)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportConnector for TcpConnector {
    async fn connect(
        &self,
        addr: SocketAddr,
        options: &SessionOptions,
    ) -> TransportResult<Box<dyn TransportSession>> {
        if options.kind != TransportKind::RawStream {
            return Err(TransportError::ConfigurationError(format!(
                "TCP connector cannot open a {} session",
                options.kind
            )));
        }

        debug!("Connecting raw stream to {}", addr);

        let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)??;

        Ok(Box::new(TcpSession::new(stream)?))
    }
}

/// An open raw TCP session
///
/// Reads happen inline in `recv`; writes go through a dedicated writer task
/// fed by `SessionSender` clones.
pub struct TcpSession {
    remote_addr: SocketAddr,
    reader: Option<OwnedReadHalf>,
    sender: SessionSender,
    shutdown_tx: Option<oneshot::Sender<()>>,
    closed: Arc<AtomicBool>,
    bytes_sent: Arc<AtomicU64>,
    bytes_received: u64,
    created_at: Instant,
    buffer: Vec<u8>,
}

impl std::fmt::Debug for TcpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpSession")
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl TcpSession {
    /// Wrap an established TCP stream
    pub fn new(stream: TcpStream) -> TransportResult<Self> {
        let remote_addr = stream.peer_addr()?;
        // Small keep-alive probes must not sit in Nagle's buffer
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();

        let (tx, rx) = mpsc::channel::<Bytes>(OUTBOUND_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let closed = Arc::new(AtomicBool::new(false));
        let bytes_sent = Arc::new(AtomicU64::new(0));

        tokio::spawn(Self::writer_task(
            writer,
            rx,
            shutdown_rx,
            bytes_sent.clone(),
            closed.clone(),
            remote_addr,
        ));

        Ok(Self {
            remote_addr,
            reader: Some(reader),
            sender: SessionSender::new(tx, closed.clone()),
            shutdown_tx: Some(shutdown_tx),
            closed,
            bytes_sent,
            bytes_received: 0,
            created_at: Instant::now(),
            buffer: vec![0u8; READ_BUFFER_SIZE],
        })
    }

    /// Writer task - drains the outbound channel into the socket
    ///
    /// Shutdown also interrupts a write blocked on a peer that stopped reading.
    async fn writer_task(
        mut writer: OwnedWriteHalf,
        mut rx: mpsc::Receiver<Bytes>,
        shutdown_rx: oneshot::Receiver<()>,
        bytes_sent: Arc<AtomicU64>,
        closed: Arc<AtomicBool>,
        remote_addr: SocketAddr,
    ) {
        let pump = async {
            while let Some(data) = rx.recv().await {
                writer.write_all(&data).await?;
                bytes_sent.fetch_add(data.len() as u64, Ordering::Relaxed);
            }
            Ok::<(), std::io::Error>(())
        };

        tokio::select! {
            result = pump => {
                if let Err(e) = result {
                    debug!("[{}] TCP write error: {}", remote_addr, e);
                }
            }
            _ = shutdown_rx => {}
        }

        trace!("[{}] TCP writer task ended", remote_addr);
        closed.store(true, Ordering::SeqCst);
        let _ = writer.shutdown().await;
    }

    fn mark_closed(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.reader = None;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[async_trait]
impl TransportSession for TcpSession {
    fn sender(&self) -> SessionSender {
        self.sender.clone()
    }

    async fn recv(&mut self) -> TransportResult<Option<Bytes>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        match reader.read(&mut self.buffer).await {
            Ok(0) => {
                debug!("[{}] TCP session closed by remote", self.remote_addr);
                self.mark_closed();
                Ok(None)
            }
            Ok(n) => {
                self.bytes_received += n as u64;
                Ok(Some(Bytes::copy_from_slice(&self.buffer[..n])))
            }
            Err(e) => {
                self.mark_closed();
                Err(TransportError::IoError(e))
            }
        }
    }

    async fn close(&mut self) {
        debug!("[{}] Closing TCP session", self.remote_addr);
        self.mark_closed();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::RawStream
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
