//! Concurrent execution of a task list.

pub mod job;
pub mod ledger;
pub mod queue;
pub mod results;
pub mod stats;

pub use job::Job;
pub use ledger::FailureLedger;
pub use queue::TaskQueue;
pub use results::ResultAggregator;
pub use stats::{spawn_reporter, Counters, StatsSnapshot};
