// src/limiter.rs

use tokio::time::{Duration, Instant};

/// Length of one throttling window.
const WINDOW: Duration = Duration::from_secs(1);

/// A per-task bandwidth limiter working on one-second windows.
///
/// The owning task calls [`RateLimiter::wait`] before every read with its
/// running byte count. Within a window, once the bytes read since the window
/// started reach the limit, the caller is put to sleep until the window ends.
/// The ceiling is approximate: one read may overshoot it per window.
#[derive(Debug)]
pub struct RateLimiter {
    /// Ceiling in bytes per second. Zero means unlimited.
    limit: u64,
    checkpoint: Option<Checkpoint>,
}

/// Start of the current window.
#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    at: Instant,
    bytes: u64,
}

impl RateLimiter {
    /// Creates a new limiter. A rate of 0 means the limiter is disabled.
    pub fn new(rate_bytes_per_sec: u64) -> Self {
        Self {
            limit: rate_bytes_per_sec,
            checkpoint: None,
        }
    }

    /// Builds a limiter from the user-facing KB/s value. Negative or zero
    /// values disable limiting.
    pub fn from_kilobytes(limit_kb: i64) -> Self {
        let kb = u64::try_from(limit_kb).unwrap_or(0);
        Self::new(kb.saturating_mul(1000))
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn is_enabled(&self) -> bool {
        self.limit > 0
    }

    /// Waits if the current window's budget is used up.
    ///
    /// `current_bytes_read` is the task's running total, not a delta.
    pub async fn wait(&mut self, current_bytes_read: u64) {
        if !self.is_enabled() {
            return;
        }

        let now = Instant::now();
        let checkpoint = match self.checkpoint {
            Some(checkpoint) if now.duration_since(checkpoint.at) <= WINDOW => checkpoint,
            // First call, or the window expired on its own.
            _ => {
                self.reset(now, current_bytes_read);
                return;
            }
        };

        let read_in_window = current_bytes_read.saturating_sub(checkpoint.bytes);
        if read_in_window >= self.limit {
            tokio::time::sleep_until(checkpoint.at + WINDOW).await;
            self.reset(Instant::now(), current_bytes_read);
        }
    }

    fn reset(&mut self, at: Instant, bytes: u64) {
        self.checkpoint = Some(Checkpoint { at, bytes });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drives the limiter like the copy loop does, with fixed-size reads and a
    /// source that is never the bottleneck, until `run_for` has elapsed.
    async fn drive(limiter: &mut RateLimiter, read_size: u64, run_for: Duration) -> u64 {
        let start = Instant::now();
        let mut total = 0;
        loop {
            limiter.wait(total).await;
            if start.elapsed() >= run_for {
                return total;
            }
            total += read_size;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_limiter_never_sleeps() {
        let mut limiter = RateLimiter::new(0);
        let start = Instant::now();
        for step in 0..1000u64 {
            limiter.wait(step * 1_000_000).await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn first_call_only_sets_checkpoint() {
        let mut limiter = RateLimiter::new(10);
        let start = Instant::now();
        limiter.wait(1_000_000).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_out_the_window_once_budget_is_spent() {
        let mut limiter = RateLimiter::new(1000);
        let start = Instant::now();
        limiter.wait(0).await;

        tokio::time::advance(Duration::from_millis(200)).await;
        limiter.wait(999).await;
        assert_eq!(start.elapsed(), Duration::from_millis(200));

        limiter.wait(1000).await;
        assert_eq!(start.elapsed(), WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_window_resets_without_sleeping() {
        let mut limiter = RateLimiter::new(1000);
        limiter.wait(0).await;

        tokio::time::advance(Duration::from_millis(1500)).await;
        let before = Instant::now();
        limiter.wait(50_000).await;
        assert_eq!(before.elapsed(), Duration::ZERO);

        // The new window starts at 50_000 bytes.
        limiter.wait(50_500).await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn fifty_kilobytes_per_second_over_three_seconds() {
        let mut limiter = RateLimiter::from_kilobytes(50);
        assert_eq!(limiter.limit(), 50_000);

        let total = drive(&mut limiter, 1000, Duration::from_secs(3)).await;
        assert!(total <= 160_000, "transferred {total} bytes");
        assert!(total >= 140_000, "transferred {total} bytes");
    }

    #[tokio::test(start_paused = true)]
    async fn large_reads_overshoot_by_at_most_one_read_per_window() {
        let mut limiter = RateLimiter::new(50_000);
        let read_size = 32 * 1024;

        let total = drive(&mut limiter, read_size, Duration::from_secs(3)).await;
        assert!(total <= 3 * (50_000 + read_size), "transferred {total} bytes");
    }

    #[test]
    fn negative_limit_disables() {
        assert!(!RateLimiter::from_kilobytes(-1).is_enabled());
        assert!(!RateLimiter::from_kilobytes(0).is_enabled());
        assert!(RateLimiter::from_kilobytes(1).is_enabled());
    }
}
