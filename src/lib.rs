//! Concurrent credential testing against SSH, FTP and HTTP Basic services.
//!
//! Input is expanded into [`tasks::Task`]s by the [`tasks::TaskBuilder`],
//! then a [`engine::Job`] drains them with a fixed pool of workers that ask
//! the [`services::ServiceRegistry`] for a protocol client per attempt.

pub mod config;
pub mod engine;
pub mod error;
pub mod input;
pub mod logging;
pub mod services;
pub mod tasks;

pub use config::JobConfig;
pub use engine::{Job, StatsSnapshot};
pub use error::{Error, Result};
pub use services::{Outcome, ServiceClient, ServiceRegistry};
pub use tasks::{Task, TaskBuilder};
