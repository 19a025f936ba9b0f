//! Rate limiter throttling DCC payload reads.
//!
//! Fills with `gain_amount` tokens every `gain_rate` up to `max_tokens`.
//! `acquire()` blocks until at least one token is available, then takes one.
//! Shutdown is cooperative: `stop()` wakes every waiter without granting a
//! token, so callers must check `is_stopped()` after a wakeup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::interval;

pub struct TokenBucket {
    max_tokens: u64,
    gain_amount: u64,
    gain_rate: Duration,
    tokens: tokio::sync::Mutex<u64>,
    notify: Notify,
    stopped: AtomicBool,
}

impl TokenBucket {
    pub fn new(max_tokens: u64, gain_amount: u64, gain_rate: Duration) -> Self {
        Self {
            max_tokens,
            gain_amount,
            gain_rate,
            tokens: tokio::sync::Mutex::new(max_tokens),
            notify: Notify::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Derive a bucket that yields an average of `max_rate_kib_s` KiB/s:
    /// four 4 KiB reads per refill, per the spec's derivation.
    pub fn for_rate_kib_s(max_rate_kib_s: u64) -> Option<Self> {
        if max_rate_kib_s == 0 {
            return None;
        }
        let seconds_per_refill = 4096.0 / 1024.0 / (max_rate_kib_s as f64 / 4.0);
        Some(Self::new(
            4,
            4,
            Duration::from_secs_f64(seconds_per_refill.max(0.001)),
        ))
    }

    /// Spawn the background refill task. Must be called once; the returned
    /// `JoinHandle` runs until `stop()` is called.
    pub fn spawn_refill(self: &std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let bucket = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(bucket.gain_rate);
            loop {
                ticker.tick().await;
                if bucket.stopped.load(Ordering::Acquire) {
                    return;
                }
                let mut tokens = bucket.tokens.lock().await;
                *tokens = (*tokens + bucket.gain_amount).min(bucket.max_tokens);
                drop(tokens);
                bucket.notify.notify_waiters();
            }
        })
    }

    /// Block until a token is available, then consume it. Returns `false`
    /// if the bucket was stopped before a token could be acquired.
    pub async fn acquire(&self) -> bool {
        loop {
            if self.stopped.load(Ordering::Acquire) {
                return false;
            }
            {
                let mut tokens = self.tokens.lock().await;
                if *tokens > 0 {
                    *tokens -= 1;
                    return true;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn acquires_available_tokens_without_waiting() {
        let bucket = TokenBucket::new(4, 4, Duration::from_secs(1));
        let start = Instant::now();
        for _ in 0..4 {
            assert!(bucket.acquire().await);
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn blocks_until_refill() {
        let bucket = Arc::new(TokenBucket::new(1, 1, Duration::from_millis(100)));
        let _refill = bucket.spawn_refill();

        assert!(bucket.acquire().await);
        let start = Instant::now();
        assert!(bucket.acquire().await);
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn stop_wakes_all_waiters() {
        let bucket = Arc::new(TokenBucket::new(0, 1, Duration::from_secs(60)));
        let waiter = {
            let bucket = bucket.clone();
            tokio::spawn(async move { bucket.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        bucket.stop();
        let acquired = waiter.await.unwrap();
        assert!(!acquired);
    }

    #[test]
    fn derives_four_reads_per_refill() {
        let bucket = TokenBucket::for_rate_kib_s(256).unwrap();
        assert_eq!(bucket.max_tokens, 4);
        assert_eq!(bucket.gain_amount, 4);
        // 4096/1024/(256/4) = 4/64 = 0.0625s
        assert!((bucket.gain_rate.as_secs_f64() - 0.0625).abs() < 1e-9);
    }

    #[test]
    fn zero_rate_disables_bucket() {
        assert!(TokenBucket::for_rate_kib_s(0).is_none());
    }
}
