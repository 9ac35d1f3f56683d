//! Download rate limiting
//!
//! A token-bucket style pacer: each chunk "costs" `bytes / limit` seconds
//! and the limiter sleeps whenever consumption runs ahead of the clock.
//! A zero limit disables pacing entirely.

use std::time::Duration;
use tokio::time::Instant;

/// Minimum debt worth sleeping for; smaller debts carry over to the next
/// chunk so we do not thrash the timer wheel
const MIN_SLEEP: Duration = Duration::from_millis(10);

/// Byte-rate pacer for one download attempt
#[derive(Debug)]
pub struct RateLimiter {
    limit_bps: u64,
    deadline: Instant,
}

impl RateLimiter {
    /// Create a limiter; `limit_bps == 0` disables limiting
    pub fn new(limit_bps: u64) -> Self {
        Self {
            limit_bps,
            deadline: Instant::now(),
        }
    }

    /// True when a non-zero limit is configured
    pub fn is_enabled(&self) -> bool {
        self.limit_bps > 0
    }

    /// Account for `bytes` just read and sleep if we are ahead of the
    /// configured rate
    pub async fn throttle(&mut self, bytes: usize) {
        if self.limit_bps == 0 || bytes == 0 {
            return;
        }
        let now = Instant::now();
        let cost = Duration::from_secs_f64(bytes as f64 / self.limit_bps as f64);
        self.deadline = self.deadline.max(now) + cost;
        let debt = self.deadline.saturating_duration_since(now);
        if debt >= MIN_SLEEP {
            tokio::time::sleep(debt).await;
        }
    }
}

/// Parse a bytes-per-second limit, accepting `_` or `,` digit-group
/// separators ("10_000_000", "10,000,000"). Returns None for anything else.
pub fn parse_limit(input: &str) -> Option<u64> {
    let cleaned: String = input
        .trim()
        .chars()
        .filter(|c| *c != '_' && *c != ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}
