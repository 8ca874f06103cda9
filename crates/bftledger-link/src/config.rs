//! Link tuning knobs.

use std::time::Duration;

/// Retransmission and anti-replay settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Wait after the first transmission; doubles on every retry.
    pub retry_base: Duration,
    /// Upper bound on a single wait between retries.
    pub max_backoff: Duration,
    /// Transmissions before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Minimum spacing between accepted messages from one client.
    pub client_window: Duration,
    /// Minimum spacing between accepted messages from one node.
    pub node_window: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            retry_base: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            max_attempts: Some(20),
            client_window: Duration::from_millis(500),
            node_window: Duration::ZERO,
        }
    }
}

impl LinkConfig {
    /// Backoff to wait after transmission number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_base
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}
