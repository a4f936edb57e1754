//! Delay between reconnection attempts

use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::config::NetworkConfig;

/// Reconnection configuration
///
/// A multiplier of 1.0 gives a fixed delay. There is no attempt limit:
/// tunnels retry for as long as the agent runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry after a session ends
    pub initial_delay: Duration,
    /// Upper bound when backing off
    pub max_delay: Duration,
    /// Growth factor per consecutive failure
    pub multiplier: f64,
}

impl ReconnectConfig {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    pub fn from_network(network: &NetworkConfig) -> Self {
        Self {
            initial_delay: network.reconnect_delay(),
            max_delay: network.max_reconnect_delay(),
            multiplier: network.backoff_multiplier(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

/// Tracks the delay to apply before the next attempt
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt: usize,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            config,
            attempt: 0,
        }
    }

    /// Delay to apply now; advances the backoff for the following attempt
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        let delay = self.current_delay;

        // Past the representable range the cap applies anyway
        let grown = Duration::try_from_secs_f64(delay.as_secs_f64() * self.config.multiplier)
            .unwrap_or(self.config.max_delay);
        self.current_delay = grown.min(self.config.max_delay);

        delay
    }

    /// Sleep for the next delay
    pub async fn wait(&mut self) {
        let delay = self.next_delay();
        debug!(
            "Waiting {}ms before reconnection attempt {}",
            delay.as_millis(),
            self.attempt
        );
        sleep(delay).await;
    }

    /// Reset backoff (call after successful connection)
    pub fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }
}
