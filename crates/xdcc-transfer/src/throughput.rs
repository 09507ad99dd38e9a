//! Interval-sampled transfer speed.

use std::time::Duration;

use tokio::time::Instant;

/// Bytes-per-second sampler. The reported speed only changes once a full
/// sampling interval has elapsed.
#[derive(Debug)]
pub struct Throughput {
    interval: Duration,
    sampled_at: Instant,
    pending: u64,
    speed: u64,
}

impl Throughput {
    /// Start sampling at `now`.
    #[must_use]
    pub const fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            sampled_at: now,
            pending: 0,
            speed: 0,
        }
    }

    /// Last sampled speed in bytes per second.
    #[must_use]
    pub const fn speed(&self) -> u64 {
        self.speed
    }

    /// Account for `bytes` received at `now`. Returns the new speed when a
    /// sampling interval just closed.
    pub fn record(&mut self, bytes: u64, now: Instant) -> Option<u64> {
        self.pending += bytes;
        let elapsed = now.saturating_duration_since(self.sampled_at);
        if elapsed <= self.interval {
            return None;
        }
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX).max(1);
        self.speed = self.pending.saturating_mul(1_000) / millis;
        self.pending = 0;
        self.sampled_at = now;
        Some(self.speed)
    }
}
