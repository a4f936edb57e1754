//! Keep-alive probes on an open relay session

use bytes::Bytes;
use portlink_transport::{SessionSender, HEARTBEAT_PROBE};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

/// Sends one `0x00` byte on a session every `interval`
///
/// No reply is expected. The task checks the session's liveness on each
/// tick and ends on its own once the session is gone.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatScheduler {
    interval: Duration,
}

impl HeartbeatScheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start probing `sender`'s session; the first probe goes out after one interval
    pub fn start(&self, sender: SessionSender, tunnel: &str) -> HeartbeatHandle {
        info!(tunnel = %tunnel, "Heartbeat started");

        let task = tokio::spawn(run_heartbeat(sender, self.interval, tunnel.to_string()));
        HeartbeatHandle { task }
    }
}

/// Running heartbeat task; dropping or stopping it cancels the task
#[derive(Debug)]
pub struct HeartbeatHandle {
    task: JoinHandle<u64>,
}

impl HeartbeatHandle {
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task to end on its own; returns the number of probes sent
    pub async fn join(mut self) -> Option<u64> {
        (&mut self.task).await.ok()
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_heartbeat(sender: SessionSender, interval: Duration, tunnel: String) -> u64 {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sent = 0u64;

    loop {
        ticker.tick().await;

        if sender.is_closed() {
            debug!(tunnel = %tunnel, "Session closed, heartbeat stopped");
            break;
        }

        if let Err(e) = sender.send(Bytes::from_static(&HEARTBEAT_PROBE)).await {
            debug!(tunnel = %tunnel, "Heartbeat send failed, stopping: {}", e);
            break;
        }

        sent += 1;
        trace!(tunnel = %tunnel, sent, "Heartbeat sent");
    }

    sent
}
