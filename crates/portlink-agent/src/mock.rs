//! Scripted transport for driving tunnel actors without a relay

use async_trait::async_trait;
use bytes::Bytes;
use portlink_transport::{
    SessionOptions, SessionSender, SessionStats, TransportConnector, TransportError,
    TransportKind, TransportResult, TransportSession,
};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// What the scripted relay does next
#[derive(Debug)]
pub enum Inbound {
    Data(Bytes),
    Close,
    Error(TransportError),
}

/// Test-side end of a scripted session
#[derive(Debug)]
pub struct SessionHandle {
    pub inbound: mpsc::UnboundedSender<Inbound>,
    pub outbound: mpsc::Receiver<Bytes>,
    closed: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn drain_outbound(&mut self) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Ok(data) = self.outbound.try_recv() {
            out.push(data);
        }
        out
    }
}

#[derive(Debug)]
pub struct ScriptedSession {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    sender: SessionSender,
    closed: Arc<AtomicBool>,
    kind: TransportKind,
    remote: SocketAddr,
}

impl ScriptedSession {
    pub fn pair(kind: TransportKind, remote: SocketAddr) -> (Self, SessionHandle) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let closed = Arc::new(AtomicBool::new(false));

        let session = Self {
            inbound: inbound_rx,
            sender: SessionSender::new(outbound_tx, closed.clone()),
            closed: closed.clone(),
            kind,
            remote,
        };
        let handle = SessionHandle {
            inbound: inbound_tx,
            outbound: outbound_rx,
            closed,
        };
        (session, handle)
    }
}

#[async_trait]
impl TransportSession for ScriptedSession {
    fn sender(&self) -> SessionSender {
        self.sender.clone()
    }

    async fn recv(&mut self) -> TransportResult<Option<Bytes>> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        match self.inbound.recv().await {
            Some(Inbound::Data(data)) => Ok(Some(data)),
            Some(Inbound::Close) | None => {
                self.closed.store(true, Ordering::SeqCst);
                Ok(None)
            }
            Some(Inbound::Error(e)) => {
                self.closed.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn remote_address(&self) -> SocketAddr {
        self.remote
    }

    fn stats(&self) -> SessionStats {
        SessionStats::default()
    }
}

/// Hands out pre-scripted connection results in order; refuses once empty
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    attempts: Mutex<VecDeque<TransportResult<ScriptedSession>>>,
    log: Mutex<Vec<(SocketAddr, Instant)>>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a session that opens successfully
    pub fn accept(&self, kind: TransportKind, remote: SocketAddr) -> SessionHandle {
        let (session, handle) = ScriptedSession::pair(kind, remote);
        self.attempts.lock().unwrap().push_back(Ok(session));
        handle
    }

    pub fn refuse(&self) {
        self.attempts
            .lock()
            .unwrap()
            .push_back(Err(TransportError::ConnectionError(
                "connection refused".to_string(),
            )));
    }

    /// Every connect call made so far, with the (test) clock time it happened
    pub fn connects(&self) -> Vec<(SocketAddr, Instant)> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportConnector for ScriptedConnector {
    async fn connect(
        &self,
        addr: SocketAddr,
        _options: &SessionOptions,
    ) -> TransportResult<Box<dyn TransportSession>> {
        self.log.lock().unwrap().push((addr, Instant::now()));

        let next = self.attempts.lock().unwrap().pop_front();
        match next {
            Some(Ok(session)) => Ok(Box::new(session)),
            Some(Err(e)) => Err(e),
            None => Err(TransportError::ConnectionError(
                "connection refused".to_string(),
            )),
        }
    }
}
