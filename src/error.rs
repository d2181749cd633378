//! Error types for credsweep

use thiserror::Error;

/// Result type alias for credsweep operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the task builder and the job engine.
///
/// Transport failures during an attempt are not errors: clients report them
/// as [`crate::services::Outcome::ConnectionFailed`] and the worker loop
/// handles them.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid run parameters (bad service spec, ambiguous port, malformed options)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed or insufficient input data
    #[error("Data error: {0}")]
    Data(String),

    /// Service name missing from the registry
    #[error("Unknown service `{0}`")]
    UnknownService(String),

    /// A service client failed in a way that is not a connection failure
    #[error("Service `{service}` failed: {source}")]
    Service {
        service: String,
        #[source]
        source: anyhow::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A worker task panicked or was cancelled
    #[error("Worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a data error
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    /// True for errors caused by the operator's input rather than by a run.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Data(_) | Self::UnknownService(_)
        )
    }
}
