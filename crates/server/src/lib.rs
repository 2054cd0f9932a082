//! # Expedientes Server
//!
//! Line-delimited JSON over TCP in front of the record service.
//!
//! - [`config`]: flags and `EXPEDIENTES_*` environment variables
//! - [`connection`]: accept loop and per-connection request handling
//! - [`dump`]: `--dump` output
//! - [`shutdown`]: signal handling

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod connection;
pub mod dump;
pub mod shutdown;

use expedientes_records::ServiceError;
use expedientes_storage::{ConfigError, StorageError};

pub use config::{Cli, LogFormat};
pub use connection::{handle_connection, serve};
pub use dump::write_dump;

/// Failures that stop the server.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServerError {
    /// A flag or environment variable failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The engine could not be opened or closed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Startup maintenance failed.
    #[error("startup maintenance failed: {0}")]
    Maintenance(#[from] ServiceError),

    /// The listener could not be bound, or dump output failed.
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
}
