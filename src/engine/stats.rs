use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use super::results::ResultAggregator;

/// Run-wide attempt counters.
///
/// `attempts` is bumped before a client is called; `successful` (completed
/// handshakes, accepted or rejected) and `failed` (connection failures)
/// after it returns, so `successful + failed <= attempts` holds at all times.
#[derive(Debug)]
pub struct Counters {
    attempts: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    ignored: AtomicU64,
    retried: AtomicU64,
    start_time: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub attempts: u64,
    pub successful: u64,
    pub failed: u64,
    pub ignored: u64,
    pub retried: u64,
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

impl Counters {
    pub fn new() -> Self {
        Self {
            attempts: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_success(&self) {
        self.successful.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::AcqRel);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        // Outcomes are read before attempts so the snapshot never shows more
        // outcomes than attempts.
        let successful = self.successful.load(Ordering::Acquire);
        let failed = self.failed.load(Ordering::Acquire);
        StatsSnapshot {
            attempts: self.attempts.load(Ordering::Acquire),
            successful,
            failed,
            ignored: self.ignored.load(Ordering::Acquire),
            retried: self.retried.load(Ordering::Acquire),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn rate(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.attempts.load(Ordering::Acquire) as f64 / elapsed
        } else {
            0.0
        }
    }
}

/// Logs counters every `every` until the handle is aborted.
pub fn spawn_reporter(
    counters: Arc<Counters>,
    results: Arc<ResultAggregator>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every.max(Duration::from_millis(100)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let stats = counters.snapshot();
            info!(
                "Attempts: {} | Failed connections: {} | Matched credentials: {} | {:.1}/s",
                stats.attempts,
                stats.failed,
                results.len().await,
                counters.rate()
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn counters_do_not_lose_updates() {
        let counters = Arc::new(Counters::new());
        let mut handles = Vec::new();
        for worker in 0..8u64 {
            let counters = Arc::clone(&counters);
            handles.push(tokio::spawn(async move {
                for i in 0..250u64 {
                    counters.record_attempt();
                    if (i + worker) % 3 == 0 {
                        counters.record_failure();
                    } else {
                        counters.record_success();
                    }
                    let snap = counters.snapshot();
                    assert!(snap.successful + snap.failed <= snap.attempts);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let snap = counters.snapshot();
        assert_eq!(snap.attempts, 2000);
        assert_eq!(snap.successful + snap.failed, 2000);
    }

    #[tokio::test]
    async fn reporter_runs_until_aborted() {
        let counters = Arc::new(Counters::new());
        let results = Arc::new(ResultAggregator::new());
        let handle = spawn_reporter(counters, results, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!handle.is_finished());
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
