use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

pub const WORKER_COUNT: usize = 8;
pub const FAILURE_CEILING: u32 = 10;
pub const CONNECTION_TIMEOUT_SECS: u64 = 10;
pub const BASE_WAIT_SECS: f64 = 0.1;
pub const WAIT_JITTER_SECS: f64 = 0.0;
pub const STATS_INTERVAL_SECS: u64 = 5;
/// Upper bound for either pacing component, one day.
pub const MAX_WAIT_SECS: f64 = 86_400.0;

/// Run parameters for one job. Fixed once the job is constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    /// Number of concurrent workers
    pub worker_count: usize,
    /// Connection failures tolerated per target before its tasks are ignored
    pub failure_ceiling: u32,
    /// Per-attempt connect and authentication timeout
    pub connection_timeout: Duration,
    /// Pause after every attempt, in seconds
    pub base_wait: f64,
    /// Upper bound of the random extra pause, in seconds
    pub wait_jitter: f64,
    /// Stop the run once a credential matches
    pub first_match_abort: bool,
    /// Enforce `failure_ceiling`
    pub watch_failures: bool,
    /// Re-enqueue tasks whose connection failed
    pub retry_on_failure: bool,
    /// Pop tasks in random order instead of insertion order
    pub randomize_order: bool,
    /// Log counters periodically
    pub stats_enabled: bool,
    pub stats_interval: Duration,
    /// Append each match to this file as it is found
    pub output_file: Option<PathBuf>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            worker_count: WORKER_COUNT,
            failure_ceiling: FAILURE_CEILING,
            connection_timeout: Duration::from_secs(CONNECTION_TIMEOUT_SECS),
            base_wait: BASE_WAIT_SECS,
            wait_jitter: WAIT_JITTER_SECS,
            first_match_abort: false,
            watch_failures: true,
            retry_on_failure: true,
            randomize_order: false,
            stats_enabled: false,
            stats_interval: Duration::from_secs(STATS_INTERVAL_SECS),
            output_file: None,
        }
    }
}

impl JobConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    pub fn with_failure_ceiling(mut self, ceiling: u32) -> Self {
        self.failure_ceiling = ceiling;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Values are clamped to `0..=MAX_WAIT_SECS`; NaN counts as zero.
    pub fn with_pacing(mut self, base_wait: f64, jitter: f64) -> Self {
        self.base_wait = clamp_wait(base_wait);
        self.wait_jitter = clamp_wait(jitter);
        self
    }

    pub fn with_first_match_abort(mut self, enabled: bool) -> Self {
        self.first_match_abort = enabled;
        self
    }

    pub fn with_watch_failures(mut self, enabled: bool) -> Self {
        self.watch_failures = enabled;
        self
    }

    pub fn with_retry_on_failure(mut self, enabled: bool) -> Self {
        self.retry_on_failure = enabled;
        self
    }

    pub fn with_randomized_order(mut self, enabled: bool) -> Self {
        self.randomize_order = enabled;
        self
    }

    pub fn with_stats(mut self, enabled: bool, interval: Duration) -> Self {
        self.stats_enabled = enabled;
        self.stats_interval = interval;
        self
    }

    pub fn with_output_file(mut self, path: Option<PathBuf>) -> Self {
        self.output_file = path;
        self
    }

    /// Rejects settings under which no task could ever be attempted.
    pub fn validate(&self) -> Result<()> {
        if self.watch_failures && self.failure_ceiling == 0 {
            return Err(Error::configuration(
                "Failure ceiling must be at least 1 while failures are watched",
            ));
        }
        Ok(())
    }
}

fn clamp_wait(secs: f64) -> f64 {
    if secs.is_nan() {
        0.0
    } else {
        secs.clamp(0.0, MAX_WAIT_SECS)
    }
}
