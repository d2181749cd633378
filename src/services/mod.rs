//! Protocol clients and the registry that maps service names to them.
//!
//! Every client performs exactly one connect-and-authenticate exchange per
//! call and collapses protocol details onto [`Outcome`]. Returning `Err` is
//! reserved for defects; the job treats it as fatal.

pub mod ftp;
pub mod http;
pub mod ssh;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::tasks::Task;

/// Result of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The handshake completed; `true` when the credentials were accepted.
    Authenticated(bool),
    /// The endpoint could not be reached or timed out.
    ConnectionFailed,
}

#[async_trait]
pub trait ServiceClient: Send + Sync {
    async fn attempt(&self, task: &Task, timeout: Duration) -> anyhow::Result<Outcome>;

    /// Line reported for a matched task.
    fn connection_string(&self, task: &Task) -> String {
        task.connection_string()
    }
}

#[derive(Clone)]
pub struct ServiceEntry {
    pub name: String,
    pub default_port: u16,
    pub client: Arc<dyn ServiceClient>,
}

impl fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("name", &self.name)
            .field("default_port", &self.default_port)
            .finish()
    }
}

/// Service name to client mapping. Filled before a job starts and only read
/// afterwards.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    entries: BTreeMap<String, ServiceEntry>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every protocol shipped in this crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        ssh::register(&mut registry);
        ftp::register(&mut registry);
        http::register(&mut registry);
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        default_port: u16,
        client: Arc<dyn ServiceClient>,
    ) {
        let name = name.into();
        self.entries.insert(
            name.clone(),
            ServiceEntry {
                name,
                default_port,
                client,
            },
        );
    }

    pub fn lookup(&self, name: &str) -> Result<&ServiceEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| Error::UnknownService(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn default_port(&self, name: &str) -> Option<u16> {
        self.entries.get(name).map(|entry| entry.default_port)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Renders a matched task with its service's formatting, falling back to
    /// the generic line for unregistered services.
    pub fn connection_string(&self, task: &Task) -> String {
        match self.entries.get(&task.service) {
            Some(entry) => entry.client.connection_string(task),
            None => task.connection_string(),
        }
    }
}
