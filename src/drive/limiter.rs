//! Request pacing for drive calls.
//!
//! Each call kind (prepare, upload_part, finish) gets its own limiter so
//! their budgets never starve one another.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Leaky-bucket limiter: admitted calls are spaced `1/rate` apart.
///
/// The schedule lock is only held while reserving a slot, never across the
/// wait, so concurrent callers queue up in reservation order.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Limiter admitting at most `rate` calls per second. A rate of 0 is
    /// treated as 1.
    pub fn per_second(rate: u32) -> Self {
        Self::with_interval(Duration::from_secs(1) / rate.max(1))
    }

    /// Limiter spacing admitted calls `interval` apart.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Minimum spacing between two admitted calls.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next slot is free and consume it.
    pub async fn acquire(&self) {
        let now = Instant::now();
        let slot = {
            let mut next = self.next_slot.lock();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };

        if slot > now {
            tracing::debug!(
                wait_ms = (slot - now).as_millis() as u64,
                "rate limiter: waiting for slot"
            );
            tokio::time::sleep_until(slot).await;
        }
    }
}
