//! # Expedientes Record Service
//!
//! Clinical records on top of [`expedientes_storage`] and
//! [`expedientes_authn`].
//!
//! This crate provides:
//! - **Record service**: registration, login, patient intake, record creation,
//!   amendment and history, each authorized by session token and scope
//! - **Record index**: per-patient and per-scope id lists kept atomic with the
//!   records they describe, with verification and rebuild
//! - **Gateway**: JSON request decoding and response encoding
//!
//! ## Example
//!
//! ```
//! use expedientes_records::{Gateway, RecordService, ServiceConfig};
//! use expedientes_storage::MemoryBackend;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let gateway = Gateway::new(RecordService::new(MemoryBackend::new(), ServiceConfig::default()));
//!
//! let reply = gateway
//!     .handle_line(r#"{"action":"register","username":"doctorA","password":"pw","surname":"Lopez","specialty":1,"hospital":2}"#)
//!     .await;
//! assert!(reply.success);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Service configuration.
pub mod config;
/// Service error taxonomy.
pub mod error;
/// JSON gateway.
pub mod gateway;
/// Snowflake identifiers.
pub mod ids;
/// Derived record index.
pub mod index;
mod retry;
/// The record service.
pub mod service;
/// Domain entities.
pub mod types;

// Re-export key types for convenience
pub use config::{ConflictRetryConfig, ServiceConfig};
pub use error::{ErrorKind, Result, ServiceError};
pub use gateway::{Gateway, Request, Response};
pub use index::{IndexReport, RecordIndex};
pub use service::{LoginOutcome, MaintenanceReport, RecordService};
pub use types::{
    Account, HospitalCode, Patient, PatientId, Record, RecordId, Scope, Sex, SpecialtyCode,
};
