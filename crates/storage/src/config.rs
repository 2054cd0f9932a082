//! Engine selection configuration.
//!
//! [`StorageConfig`] names the engine to open and, for durable engines, the
//! file to open it from. [`Backend::open`](crate::Backend::open) turns it into
//! a live handle.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which storage engine to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Volatile in-memory maps. Testing and development only.
    Memory,
    /// Durable, file-backed redb database.
    #[default]
    Redb,
}

impl EngineKind {
    /// Lowercase engine name as used in configuration files.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redb => "redb",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redb" => Ok(Self::Redb),
            other => Err(format!("unsupported storage engine: {other}")),
        }
    }
}

/// Storage engine configuration.
///
/// # Example
///
/// ```
/// use expedientes_storage::{EngineKind, StorageConfig};
///
/// let config = StorageConfig::builder()
///     .engine(EngineKind::Redb)
///     .path("/var/lib/expedientes/store.redb")
///     .build()?;
/// assert_eq!(config.engine(), EngineKind::Redb);
///
/// // A durable engine without a path is rejected.
/// assert!(StorageConfig::builder().engine(EngineKind::Redb).build().is_err());
/// # Ok::<(), expedientes_storage::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Engine to open.
    #[serde(default)]
    engine: EngineKind,

    /// Database file. Required for [`EngineKind::Redb`].
    #[serde(default)]
    path: Option<PathBuf>,
}

#[bon::bon]
impl StorageConfig {
    /// Creates a new configuration, validating engine requirements.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingField`] if the engine is durable and no path was
    /// given.
    #[builder]
    pub fn new(
        #[builder(default)] engine: EngineKind,
        #[builder(into)] path: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let config = Self { engine, path };
        config.validate()?;
        Ok(config)
    }

    /// Configuration for a volatile in-memory engine.
    #[must_use]
    pub fn memory() -> Self {
        Self { engine: EngineKind::Memory, path: None }
    }

    /// Re-checks a configuration obtained through deserialization.
    ///
    /// # Errors
    ///
    /// Same conditions as the builder.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine == EngineKind::Redb && self.path.is_none() {
            return Err(ConfigError::MissingField { field: "path", engine: "redb" });
        }
        Ok(())
    }

    /// Returns the selected engine.
    #[must_use]
    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    /// Returns the database path, if one was configured.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
