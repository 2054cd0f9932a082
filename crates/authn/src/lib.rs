//! # Expedientes Authentication
//!
//! Staff credentials and bearer sessions for the expedientes service.
//!
//! This crate provides:
//! - **Password credentials**: salted, iterated SHA-256 with constant-time verification
//! - **Session tokens**: 256-bit random, URL-safe, redacted in logs
//! - **Session manager**: storage-backed issue/validate/revoke with a fixed TTL
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use expedientes_authn::{PasswordHash, SessionManager};
//! use expedientes_storage::MemoryBackend;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let credential = PasswordHash::new("pw");
//! credential.check("pw").unwrap();
//!
//! let sessions = SessionManager::new(MemoryBackend::new(), Duration::from_secs(60));
//! let token = sessions.issue("doctorA").await.unwrap();
//! assert_eq!(sessions.validate(&token).await.unwrap(), "doctorA");
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Authentication error types.
pub mod error;
/// Password credentials.
pub mod password;
/// Storage-backed sessions.
pub mod session;
/// Session tokens.
pub mod token;

// Re-export key types for convenience
pub use error::{AuthError, Result};
pub use password::PasswordHash;
pub use session::{DEFAULT_SESSION_TTL, Session, SessionManager};
pub use token::SessionToken;
