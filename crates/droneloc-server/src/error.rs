//! Error types for the fusion server.

use std::io;

use thiserror::Error;

use droneloc_core::error::ConfigError;

/// Result alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Startup and runtime failures of the fusion server.
///
/// Per-frame problems (`IngestError`, `PacketError`) and per-cycle no-fix
/// outcomes are handled where they occur and never surface here.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    /// The server configuration was rejected.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that failed.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Runtime I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A background task ended abnormally.
    #[error("task failed: {0}")]
    Task(String),
}

impl ServerError {
    /// Create a bind error.
    pub fn bind(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_names_address() {
        let err = ServerError::bind("0.0.0.0:5005", io::Error::new(io::ErrorKind::AddrInUse, "busy"));
        assert!(err.to_string().contains("0.0.0.0:5005"));
    }
}
