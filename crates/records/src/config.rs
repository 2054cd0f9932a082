//! Record service configuration.
//!
//! [`ServiceConfig`] carries the session lifetime, the hospital and specialty
//! catalogs accepted at registration, the index maintenance policy, and the
//! retry budget for index updates that lose a race.

use std::{collections::BTreeSet, time::Duration};

use expedientes_authn::DEFAULT_SESSION_TTL;
use expedientes_storage::ConfigError;
use serde::{Deserialize, Serialize};

use crate::types::{HospitalCode, SpecialtyCode};

/// Minimum accepted session lifetime.
pub const MIN_SESSION_TTL: Duration = Duration::from_secs(1);

/// Maximum accepted session lifetime (one year).
pub const MAX_SESSION_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Default conflict retries for `create_record`.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 8;

/// Default base delay between conflict retries.
pub const DEFAULT_CONFLICT_BASE_DELAY: Duration = Duration::from_millis(2);

/// Default number of catalog entries (codes `1..=N`).
const DEFAULT_CATALOG_SIZE: u16 = 9;

/// Retry budget for optimistic index updates.
///
/// A conflicting attempt waits `base_delay` plus a random jitter of up to
/// `base_delay` before trying again.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConflictRetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    #[builder(default = DEFAULT_CONFLICT_RETRIES)]
    pub max_retries: u32,

    /// Base delay before each retry.
    #[serde(with = "humantime_serde", default = "default_base_delay")]
    #[builder(default = DEFAULT_CONFLICT_BASE_DELAY)]
    pub base_delay: Duration,
}

fn default_max_retries() -> u32 {
    DEFAULT_CONFLICT_RETRIES
}

fn default_base_delay() -> Duration {
    DEFAULT_CONFLICT_BASE_DELAY
}

impl Default for ConflictRetryConfig {
    fn default() -> Self {
        Self { max_retries: DEFAULT_CONFLICT_RETRIES, base_delay: DEFAULT_CONFLICT_BASE_DELAY }
    }
}

/// Configuration for [`RecordService`](crate::RecordService).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use expedientes_records::{HospitalCode, ServiceConfig, SpecialtyCode};
///
/// let config = ServiceConfig::builder()
///     .session_ttl(Duration::from_secs(8 * 3600))
///     .hospitals([1, 2, 3])
///     .specialties([1, 2])
///     .build()?;
/// assert!(config.is_known_hospital(HospitalCode(2)));
/// assert!(!config.is_known_specialty(SpecialtyCode(3)));
/// # Ok::<(), expedientes_storage::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Lifetime of a session from issuance.
    #[serde(with = "humantime_serde", default = "default_session_ttl")]
    session_ttl: Duration,

    /// Hospital codes accepted at registration.
    #[serde(default = "default_catalog")]
    hospitals: BTreeSet<u16>,

    /// Specialty codes accepted at registration.
    #[serde(default = "default_catalog")]
    specialties: BTreeSet<u16>,

    /// Rebuild the record index at startup even when it verifies clean.
    #[serde(default)]
    rebuild_index_on_start: bool,

    /// Retry budget for `create_record` index conflicts.
    #[serde(default)]
    conflict_retry: ConflictRetryConfig,
}

fn default_session_ttl() -> Duration {
    DEFAULT_SESSION_TTL
}

fn default_catalog() -> BTreeSet<u16> {
    (1..=DEFAULT_CATALOG_SIZE).collect()
}

#[bon::bon]
impl ServiceConfig {
    /// Creates a new configuration, validating every field.
    ///
    /// # Optional Fields
    ///
    /// * `session_ttl` - Session lifetime (default: 24 hours, from 1 second to 365 days).
    /// * `hospitals` - Hospital catalog (default: codes 1 to 9).
    /// * `specialties` - Specialty catalog (default: codes 1 to 9).
    /// * `rebuild_index_on_start` - Always rebuild the index at startup (default: false).
    /// * `conflict_retry` - Index conflict retry budget.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::BelowMinimum`] if `session_ttl` is under one second
    /// - [`ConfigError::AboveMaximum`] if `session_ttl` is over a year
    /// - [`ConfigError::Empty`] if a catalog is empty
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_SESSION_TTL)] session_ttl: Duration,
        #[builder(with = |codes: impl IntoIterator<Item = u16>| codes.into_iter().collect::<BTreeSet<u16>>())]
        hospitals: Option<BTreeSet<u16>>,
        #[builder(with = |codes: impl IntoIterator<Item = u16>| codes.into_iter().collect::<BTreeSet<u16>>())]
        specialties: Option<BTreeSet<u16>>,
        #[builder(default)] rebuild_index_on_start: bool,
        #[builder(default)] conflict_retry: ConflictRetryConfig,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            session_ttl,
            hospitals: hospitals.unwrap_or_else(default_catalog),
            specialties: specialties.unwrap_or_else(default_catalog),
            rebuild_index_on_start,
            conflict_retry,
        };
        config.validate()?;
        Ok(config)
    }

    /// Re-checks a configuration obtained through deserialization.
    ///
    /// # Errors
    ///
    /// Same conditions as the builder.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_ttl < MIN_SESSION_TTL {
            return Err(ConfigError::BelowMinimum {
                field: "session_ttl",
                min: format!("{MIN_SESSION_TTL:?}"),
                value: format!("{:?}", self.session_ttl),
            });
        }
        if self.session_ttl > MAX_SESSION_TTL {
            return Err(ConfigError::AboveMaximum {
                field: "session_ttl",
                max: format!("{MAX_SESSION_TTL:?}"),
                value: format!("{:?}", self.session_ttl),
            });
        }
        if self.hospitals.is_empty() {
            return Err(ConfigError::Empty { field: "hospitals" });
        }
        if self.specialties.is_empty() {
            return Err(ConfigError::Empty { field: "specialties" });
        }
        Ok(())
    }

    /// Session lifetime.
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Hospital catalog.
    #[must_use]
    pub fn hospitals(&self) -> &BTreeSet<u16> {
        &self.hospitals
    }

    /// Specialty catalog.
    #[must_use]
    pub fn specialties(&self) -> &BTreeSet<u16> {
        &self.specialties
    }

    /// Whether `code` is in the hospital catalog.
    #[must_use]
    pub fn is_known_hospital(&self, code: HospitalCode) -> bool {
        self.hospitals.contains(&code.0)
    }

    /// Whether `code` is in the specialty catalog.
    #[must_use]
    pub fn is_known_specialty(&self, code: SpecialtyCode) -> bool {
        self.specialties.contains(&code.0)
    }

    /// Whether the index is rebuilt at startup regardless of verification.
    #[must_use]
    pub fn rebuild_index_on_start(&self) -> bool {
        self.rebuild_index_on_start
    }

    /// Retry budget for index conflicts.
    #[must_use]
    pub fn conflict_retry(&self) -> &ConflictRetryConfig {
        &self.conflict_retry
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            session_ttl: DEFAULT_SESSION_TTL,
            hospitals: default_catalog(),
            specialties: default_catalog(),
            rebuild_index_on_start: false,
            conflict_retry: ConflictRetryConfig::default(),
        }
    }
}
