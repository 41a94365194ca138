//! Error types for the node agent.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use droneloc_core::error::ConfigError;

/// Result alias for node operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Errors raised by samplers and the node agent.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NodeError {
    /// Invalid node configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The sample source failed to deliver a block.
    #[error("sampler error: {0}")]
    Sampler(String),

    /// Socket setup or send failure.
    #[error("network error: {0}")]
    Network(#[from] io::Error),

    /// A capture could not be written.
    #[error("failed to write {path}: {message}")]
    Output {
        /// Destination path.
        path: PathBuf,
        /// Underlying failure.
        message: String,
    },

    /// A worker thread panicked or disappeared.
    #[error("worker thread failed: {0}")]
    Worker(String),
}

impl NodeError {
    /// Create a sampler error.
    pub fn sampler<S: Into<String>>(message: S) -> Self {
        Self::Sampler(message.into())
    }

    /// `true` if the agent can keep running after this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Sampler(_) | Self::Network(_))
    }
}
