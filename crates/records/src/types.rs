//! Domain entities and identifiers.
//!
//! Each entity implements [`Entity`] so the registry knows its namespace and
//! key. Stored snapshots and gateway payloads share the same camelCase JSON
//! shape.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use expedientes_authn::PasswordHash;
use expedientes_storage::{Entity, Namespace, registry::keys};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Defines a transparent newtype over an integer with the usual trait set.
///
/// Each generated type:
/// - Derives `Copy`, `Clone`, `Debug`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Serializes as the bare integer
/// - Converts to and from the inner integer
/// - Displays as the inner integer
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $inner {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Generated patient identifier (snowflake).
    PatientId(u64)
);

define_id!(
    /// Generated record identifier (snowflake). Orders by creation time.
    RecordId(u64)
);

define_id!(
    /// Hospital catalog code.
    HospitalCode(u16)
);

define_id!(
    /// Specialty catalog code.
    SpecialtyCode(u16)
);

/// The (hospital, specialty) pair that authorizes access to a record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    /// Hospital code.
    pub hospital: HospitalCode,
    /// Specialty code.
    pub specialty: SpecialtyCode,
}

impl Scope {
    /// Builds a scope from its parts.
    #[must_use]
    pub const fn new(hospital: u16, specialty: u16) -> Self {
        Self { hospital: HospitalCode(hospital), specialty: SpecialtyCode(specialty) }
    }

    /// Key of this scope's entry in `record_index`.
    #[must_use]
    pub fn index_key(&self) -> Vec<u8> {
        keys::scope_index(self.hospital.0, self.specialty.0)
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "hospital {} / specialty {}", self.hospital, self.specialty)
    }
}

/// Patient sex.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    /// Male.
    Male,
    /// Female.
    Female,
    /// Other or unspecified.
    Other,
}

impl Sex {
    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
        }
    }
}

impl FromStr for Sex {
    type Err = ServiceError;

    /// Accepts the English names, the Spanish names, and the single-letter
    /// codes of the console client (`H`/`M`/`O`) plus `F`. Case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" | "h" | "hombre" => Ok(Self::Male),
            "female" | "f" | "m" | "mujer" => Ok(Self::Female),
            "other" | "o" | "otro" => Ok(Self::Other),
            other => Err(ServiceError::invalid_argument(format!(
                "sex must be one of male, female, other (got {other:?})"
            ))),
        }
    }
}

impl std::fmt::Display for Sex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Date formats accepted for a date of birth, tried in order.
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d-%m-%Y"];

/// Parses a date of birth and rejects dates after `today`.
///
/// # Errors
///
/// [`ServiceError::InvalidArgument`] if the input matches no accepted format,
/// is not a real calendar date, or lies in the future.
pub fn parse_date_of_birth(input: &str, today: NaiveDate) -> Result<NaiveDate, ServiceError> {
    let input = input.trim();
    let date = DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(input, format).ok())
        .ok_or_else(|| {
            ServiceError::invalid_argument(format!(
                "date of birth {input:?} is not a calendar date (expected YYYY-MM-DD)"
            ))
        })?;
    if date > today {
        return Err(ServiceError::invalid_argument(format!("date of birth {date} is in the future")));
    }
    Ok(date)
}

/// A staff account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Account {
    /// Unique login name.
    pub username: String,
    /// Salted password credential.
    pub password: PasswordHash,
    /// Surname.
    pub surname: String,
    /// Specialty code.
    pub specialty: SpecialtyCode,
    /// Hospital code.
    pub hospital: HospitalCode,
    /// When the account was registered.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// The scope stamped on records this account creates.
    #[must_use]
    pub fn scope(&self) -> Scope {
        Scope { hospital: self.hospital, specialty: self.specialty }
    }
}

impl Entity for Account {
    const NAMESPACE: Namespace = Namespace::Users;

    fn key(&self) -> Vec<u8> {
        self.username.as_bytes().to_vec()
    }
}

/// A clinical subject.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Patient {
    /// Generated identifier.
    pub id: PatientId,
    /// Given name.
    pub name: String,
    /// Surname.
    pub surname: String,
    /// Date of birth.
    pub date_of_birth: NaiveDate,
    /// Sex.
    pub sex: Sex,
    /// Username of the staff member who performed the intake.
    pub intake_by: String,
    /// When the intake happened.
    pub intake_at: DateTime<Utc>,
}

impl Entity for Patient {
    const NAMESPACE: Namespace = Namespace::Patients;

    fn key(&self) -> Vec<u8> {
        keys::id(self.id.0)
    }
}

/// One clinical entry ("expediente").
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Record {
    /// Generated identifier.
    pub id: RecordId,
    /// Patient this entry belongs to.
    pub patient_id: PatientId,
    /// Username of the author.
    pub author: String,
    /// Scope stamped from the author at creation. Never changes.
    pub scope: Scope,
    /// Free-text observations.
    pub observations: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last amendment, equal to `created_at` until amended.
    pub modified_at: DateTime<Utc>,
}

impl Record {
    /// Key of this record's patient entry in `record_index`.
    #[must_use]
    pub fn patient_index_key(&self) -> Vec<u8> {
        keys::patient_index(self.patient_id.0)
    }
}

impl Entity for Record {
    const NAMESPACE: Namespace = Namespace::Records;

    fn key(&self) -> Vec<u8> {
        keys::id(self.id.0)
    }
}
