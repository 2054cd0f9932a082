//! Command-line and environment configuration.
//!
//! Every flag can also be set through an `EXPEDIENTES_*` environment
//! variable; flags win over the environment.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};
use expedientes_records::ServiceConfig;
use expedientes_storage::{ConfigError, EngineKind, StorageConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// JSON when stderr is not a terminal, text otherwise.
    #[default]
    Auto,
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Clinical records server.
#[derive(Debug, Clone, Parser)]
#[command(name = "expedientes-server", version, about)]
pub struct Cli {
    /// Address to accept connections on.
    #[arg(long, env = "EXPEDIENTES_LISTEN", default_value = "127.0.0.1:7878")]
    pub listen: SocketAddr,

    /// Storage engine (`redb` or `memory`).
    #[arg(long, env = "EXPEDIENTES_ENGINE", default_value = "redb")]
    pub engine: EngineKind,

    /// Database file for the redb engine.
    #[arg(long, env = "EXPEDIENTES_DATA")]
    pub data: Option<PathBuf>,

    /// Session lifetime in seconds.
    #[arg(long, env = "EXPEDIENTES_SESSION_TTL_SECS", default_value_t = 24 * 3600)]
    pub session_ttl_secs: u64,

    /// Accepted hospital codes, comma-separated (default: 1 to 9).
    #[arg(long, env = "EXPEDIENTES_HOSPITALS", value_delimiter = ',')]
    pub hospitals: Vec<u16>,

    /// Accepted specialty codes, comma-separated (default: 1 to 9).
    #[arg(long, env = "EXPEDIENTES_SPECIALTIES", value_delimiter = ',')]
    pub specialties: Vec<u16>,

    /// Rebuild the record index at startup even when it verifies clean.
    #[arg(long, env = "EXPEDIENTES_REBUILD_INDEX")]
    pub rebuild_index: bool,

    /// Print every stored entry to stdout and exit without serving.
    #[arg(long)]
    pub dump: bool,

    /// Log output format.
    #[arg(long, env = "EXPEDIENTES_LOG_FORMAT", value_enum, default_value_t = LogFormat::Auto)]
    pub log_format: LogFormat,
}

impl Cli {
    /// Engine selection.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingField`] when `redb` is selected without `--data`.
    pub fn storage_config(&self) -> Result<StorageConfig, ConfigError> {
        StorageConfig::builder().engine(self.engine).maybe_path(self.data.clone()).build()
    }

    /// Service settings. An empty catalog flag falls back to the default
    /// catalog.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a value fails validation.
    pub fn service_config(&self) -> Result<ServiceConfig, ConfigError> {
        let defaults = ServiceConfig::default();
        let hospitals = if self.hospitals.is_empty() {
            defaults.hospitals().clone()
        } else {
            self.hospitals.iter().copied().collect()
        };
        let specialties = if self.specialties.is_empty() {
            defaults.specialties().clone()
        } else {
            self.specialties.iter().copied().collect()
        };

        ServiceConfig::builder()
            .session_ttl(Duration::from_secs(self.session_ttl_secs))
            .hospitals(hospitals)
            .specialties(specialties)
            .rebuild_index_on_start(self.rebuild_index)
            .build()
    }
}
