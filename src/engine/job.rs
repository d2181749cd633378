use futures::stream::{FuturesUnordered, StreamExt};
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info};

use super::ledger::FailureLedger;
use super::queue::TaskQueue;
use super::results::ResultAggregator;
use super::stats::{spawn_reporter, Counters, StatsSnapshot};
use crate::config::JobConfig;
use crate::error::{Error, Result};
use crate::services::{Outcome, ServiceRegistry};
use crate::tasks::Task;

/// One credential-testing run: a fixed worker pool draining a shared queue.
pub struct Job {
    config: Arc<JobConfig>,
    registry: Arc<ServiceRegistry>,
    queue: Arc<TaskQueue>,
    ledger: Arc<FailureLedger>,
    results: Arc<ResultAggregator>,
    counters: Arc<Counters>,
}

impl Job {
    pub fn new(config: JobConfig, registry: Arc<ServiceRegistry>) -> Self {
        let results = ResultAggregator::with_output_file(config.output_file.clone());
        Self {
            queue: Arc::new(TaskQueue::new(config.randomize_order)),
            config: Arc::new(config),
            registry,
            ledger: Arc::new(FailureLedger::new()),
            results: Arc::new(results),
            counters: Arc::new(Counters::new()),
        }
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Runs every task to a terminal state and joins all workers.
    ///
    /// Unregistered services are rejected before any worker starts. A client
    /// defect stops the run: the queue is closed, in-flight attempts finish,
    /// and the first error is returned once every worker has joined.
    pub async fn start(&self, tasks: Vec<Task>) -> Result<()> {
        self.config.validate()?;
        let services: HashSet<&str> = tasks.iter().map(|t| t.service.as_str()).collect();
        for service in services {
            self.registry.lookup(service)?;
        }

        info!("Executing {} tasks with {} workers", tasks.len(), self.config.worker_count);
        self.queue.extend(tasks).await;

        let reporter = self.config.stats_enabled.then(|| {
            spawn_reporter(
                Arc::clone(&self.counters),
                Arc::clone(&self.results),
                self.config.stats_interval,
            )
        });

        let mut workers = FuturesUnordered::new();
        for id in 0..self.config.worker_count.max(1) {
            workers.push(tokio::spawn(self.worker(id).run()));
        }

        let mut failure: Option<Error> = None;
        while let Some(joined) = workers.next().await {
            let outcome = joined.map_err(Error::from).and_then(|result| result);
            if let Err(e) = outcome {
                error!("Aborting job: {}", e);
                if failure.is_none() {
                    self.queue.close().await;
                    failure = Some(e);
                }
            }
        }

        if let Some(handle) = reporter {
            handle.abort();
        }

        // Concurrent workers may each have matched before the stop was seen.
        if self.config.first_match_abort {
            self.results.truncate_to_first().await;
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn worker(&self, id: usize) -> Worker {
        Worker {
            id,
            config: Arc::clone(&self.config),
            registry: Arc::clone(&self.registry),
            queue: Arc::clone(&self.queue),
            ledger: Arc::clone(&self.ledger),
            results: Arc::clone(&self.results),
            counters: Arc::clone(&self.counters),
        }
    }

    /// One connection string per match.
    pub async fn output(&self) -> Vec<String> {
        self.results
            .snapshot()
            .await
            .iter()
            .map(|task| self.registry.connection_string(task))
            .collect()
    }

    pub async fn results(&self) -> Vec<Task> {
        self.results.snapshot().await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.counters.snapshot()
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn ledger(&self) -> &FailureLedger {
        &self.ledger
    }
}

struct Worker {
    id: usize,
    config: Arc<JobConfig>,
    registry: Arc<ServiceRegistry>,
    queue: Arc<TaskQueue>,
    ledger: Arc<FailureLedger>,
    results: Arc<ResultAggregator>,
    counters: Arc<Counters>,
}

impl Worker {
    async fn run(self) -> Result<()> {
        while let Some(task) = self.queue.pop().await {
            let identity = task.identity();

            // Check-then-act: workers racing at the ceiling may each make one
            // extra attempt.
            if self.config.watch_failures
                && self.ledger.get(&identity).await >= self.config.failure_ceiling
            {
                debug!("Worker {} ignoring {} for exhausted target {}", self.id, task.username, identity);
                self.counters.record_ignored();
                self.queue.task_done();
                continue;
            }

            let entry = self.registry.lookup(&task.service)?;
            self.counters.record_attempt();
            let outcome = entry
                .client
                .attempt(&task, self.config.connection_timeout)
                .await
                .map_err(|source| Error::Service {
                    service: task.service.clone(),
                    source,
                })?;

            match outcome {
                Outcome::ConnectionFailed => {
                    self.counters.record_failure();
                    let failures = self.ledger.increment(&identity).await;
                    debug!("Connection failed for {} ({} failures)", identity, failures);
                    if self.config.watch_failures && failures == self.config.failure_ceiling {
                        info!("Too many failed connections to {}, ignoring it from now on", identity);
                    }
                    if self.config.retry_on_failure {
                        debug!("Putting {} for {} back in the queue", identity, task.username);
                        self.counters.record_retry();
                        self.queue.requeue(task).await;
                    } else {
                        self.queue.task_done();
                    }
                }
                Outcome::Authenticated(true) => {
                    self.counters.record_success();
                    let line = entry.client.connection_string(&task);
                    info!("Found credentials: {}", line);
                    self.results.add(task, &line).await;
                    self.queue.task_done();
                    if self.config.first_match_abort {
                        let dropped = self.queue.close().await;
                        info!("Found a first match, done! ({} queued tasks dropped)", dropped);
                    }
                }
                Outcome::Authenticated(false) => {
                    self.counters.record_success();
                    debug!("Credentials rejected for {} on {}", task.username, identity);
                    self.queue.task_done();
                }
            }

            if !self.queue.is_closed() {
                if let Some(wait) = self.pacing() {
                    sleep(wait).await;
                }
            }
        }
        debug!("Worker {} finished", self.id);
        Ok(())
    }

    /// `base_wait + uniform(0, jitter)`, or `None` when there is nothing to wait.
    fn pacing(&self) -> Option<Duration> {
        let mut wait = self.config.base_wait;
        if self.config.wait_jitter > 0.0 {
            wait += rand::thread_rng().gen_range(0.0..=self.config.wait_jitter);
        }
        Duration::try_from_secs_f64(wait).ok().filter(|d| !d.is_zero())
    }
}
