//! Matchmaking queue flood protection
//!
//! Cheaper than the sliding-window limiter: a fixed counting window per
//! connection with a hard block once the budget is exceeded. The block
//! and the counter reset together, so a client that waits out the block
//! starts from a clean window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::constants::{
    QUEUE_BLOCK_MS, QUEUE_SWEEP_INTERVAL_SECS, QUEUE_WINDOW_LIMIT, QUEUE_WINDOW_MS,
};

struct QueueWindow {
    window_start: Instant,
    count: u32,
    blocked_until: Option<Instant>,
    last_seen: Instant,
}

impl QueueWindow {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
            blocked_until: None,
            last_seen: now,
        }
    }
}

/// Fixed-window limiter for queue join attempts
pub struct QueueRateLimiter {
    entries: RwLock<HashMap<String, QueueWindow>>,
    max_attempts: u32,
    window: Duration,
    block_duration: Duration,
}

impl QueueRateLimiter {
    pub fn new() -> Self {
        Self::with_limits(
            QUEUE_WINDOW_LIMIT,
            Duration::from_millis(QUEUE_WINDOW_MS),
            Duration::from_millis(QUEUE_BLOCK_MS),
        )
    }

    pub fn with_limits(max_attempts: u32, window: Duration, block_duration: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_attempts,
            window,
            block_duration,
        }
    }

    /// Record one queue join attempt and decide whether it may proceed
    pub async fn check(&self, connection_id: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(connection_id.to_string())
            .or_insert_with(|| QueueWindow::new(now));
        entry.last_seen = now;

        if let Some(until) = entry.blocked_until {
            if now < until {
                return false;
            }
            // Block over: counter and window restart together
            entry.blocked_until = None;
            entry.window_start = now;
            entry.count = 0;
        }

        if now.duration_since(entry.window_start) > self.window {
            entry.window_start = now;
            entry.count = 0;
        }

        entry.count += 1;
        if entry.count > self.max_attempts {
            entry.blocked_until = Some(now + self.block_duration);
            log::debug!(
                "Connection {} exceeded queue join budget, blocked for {:?}",
                connection_id,
                self.block_duration
            );
            return false;
        }

        true
    }

    /// Drop state for a disconnected connection
    pub async fn remove(&self, connection_id: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(connection_id);
    }

    pub async fn tracked_connections(&self) -> usize {
        let entries = self.entries.read().await;
        entries.len()
    }

    /// Drop entries untouched for more than twice the window, unless
    /// they are still serving a block
    pub async fn sweep(&self) {
        let now = Instant::now();
        let stale_after = self.window * 2;
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| {
            if matches!(entry.blocked_until, Some(until) if now < until) {
                return true;
            }
            now.duration_since(entry.last_seen) <= stale_after
        });
    }

    /// Start the periodic sweep task. The caller owns the handle and
    /// aborts it on shutdown.
    pub fn start_sweep_task(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(QUEUE_SWEEP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                self.sweep().await;
            }
        })
    }
}

impl Default for QueueRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attempts_within_budget_pass() {
        let limiter = QueueRateLimiter::with_limits(
            3,
            Duration::from_secs(10),
            Duration::from_secs(30),
        );
        for _ in 0..3 {
            assert!(limiter.check("c1").await);
        }
        assert!(!limiter.check("c1").await);
    }

    #[tokio::test]
    async fn window_elapse_resets_the_counter() {
        let limiter = QueueRateLimiter::with_limits(
            2,
            Duration::from_millis(30),
            Duration::from_secs(30),
        );
        assert!(limiter.check("c1").await);
        assert!(limiter.check("c1").await);

        tokio::time::sleep(Duration::from_millis(45)).await;
        assert!(limiter.check("c1").await);
        assert!(limiter.check("c1").await);
    }

    #[tokio::test]
    async fn block_expiry_restores_a_full_window() {
        let limiter = QueueRateLimiter::with_limits(
            1,
            Duration::from_millis(30),
            Duration::from_millis(50),
        );
        assert!(limiter.check("c1").await);
        assert!(!limiter.check("c1").await); // exceeds, blocks
        assert!(!limiter.check("c1").await); // still blocked

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(limiter.check("c1").await);
    }

    #[tokio::test]
    async fn connections_are_independent() {
        let limiter = QueueRateLimiter::with_limits(
            1,
            Duration::from_secs(10),
            Duration::from_secs(30),
        );
        assert!(limiter.check("c1").await);
        assert!(!limiter.check("c1").await);
        assert!(limiter.check("c2").await);
    }

    #[tokio::test]
    async fn remove_clears_state() {
        let limiter = QueueRateLimiter::with_limits(
            1,
            Duration::from_secs(10),
            Duration::from_secs(30),
        );
        assert!(limiter.check("c1").await);
        assert!(!limiter.check("c1").await);

        limiter.remove("c1").await;
        assert!(limiter.check("c1").await);
    }

    #[tokio::test]
    async fn sweep_drops_stale_entries_but_keeps_blocks() {
        let limiter = QueueRateLimiter::with_limits(
            1,
            Duration::from_millis(10),
            Duration::from_secs(60),
        );
        assert!(limiter.check("idle").await);
        assert!(limiter.check("noisy").await);
        assert!(!limiter.check("noisy").await); // blocked for 60s

        tokio::time::sleep(Duration::from_millis(30)).await;
        limiter.sweep().await;

        assert_eq!(limiter.tracked_connections().await, 1);
        assert!(!limiter.check("noisy").await);
    }
}
