//! Retry policy value object.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded retry schedule with an explicit wait before every attempt.
///
/// Metadata lookups right after ingestion race the server's own image extraction, so the
/// waits grow instead of being a fixed exponential series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Wait in seconds before each attempt; the length is the attempt count.
    #[serde(default = "default_delays_secs")]
    pub delays_secs: Vec<u64>,
}

fn default_delays_secs() -> Vec<u64> {
    vec![10, 25, 40]
}

impl RetryPolicy {
    /// Number of attempts this policy allows.
    pub fn attempts(&self) -> u32 {
        self.delays_secs.len() as u32
    }

    /// Wait before the given attempt (0-indexed); past the schedule there is no wait.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delays_secs
            .get(attempt as usize)
            .map(|secs| Duration::from_secs(*secs))
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays_secs: default_delays_secs(),
        }
    }
}
