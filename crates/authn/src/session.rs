//! Storage-backed session manager.
//!
//! Sessions live in the `sessions` namespace, keyed by token. Expiry is a
//! fixed TTL from issuance with no sliding renewal. Expired sessions are
//! removed lazily when [`SessionManager::validate`] finds them, or in bulk by
//! [`SessionManager::purge_expired`]; nothing runs in the background.

use std::time::Duration;

use chrono::{DateTime, Utc};
use expedientes_storage::{Entity, Namespace, Registry, StorageBackend, StorageError};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AuthError, Result},
    token::SessionToken,
};

/// Default session lifetime (24 hours).
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Attempts at drawing a token that is not already taken.
const ISSUE_ATTEMPTS: usize = 3;

/// A live session.
///
/// # Validity
///
/// A session is valid while `now < expires_at`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct Session {
    /// The bearer token, also the storage key.
    pub token: SessionToken,

    /// Account that logged in.
    #[builder(into)]
    pub username: String,

    /// When the session was issued.
    #[builder(default = Utc::now())]
    pub issued_at: DateTime<Utc>,

    /// First instant at which the session is no longer valid.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Returns `true` once `now` has reached the expiry.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl Entity for Session {
    const NAMESPACE: Namespace = Namespace::Sessions;

    fn key(&self) -> Vec<u8> {
        self.token.as_bytes().to_vec()
    }
}

/// Issues, validates and revokes sessions.
///
/// Cheap to clone when the engine is.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use expedientes_authn::SessionManager;
/// use expedientes_storage::MemoryBackend;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let sessions = SessionManager::new(MemoryBackend::new(), Duration::from_secs(3600));
///
/// let token = sessions.issue("doctorA").await.unwrap();
/// assert_eq!(sessions.validate(&token).await.unwrap(), "doctorA");
///
/// sessions.revoke(&token).await.unwrap();
/// assert!(sessions.validate(&token).await.is_err());
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct SessionManager<B> {
    registry: Registry<B>,
    ttl: Duration,
}

impl<B: StorageBackend> SessionManager<B> {
    /// Creates a manager whose sessions last `ttl`.
    pub fn new(backend: B, ttl: Duration) -> Self {
        Self { registry: Registry::new(backend), ttl }
    }

    /// Configured session lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issues a new session for `username`.
    ///
    /// # Errors
    ///
    /// [`AuthError::Storage`] if the session cannot be persisted, or if
    /// the configured TTL puts the expiry beyond the representable range.
    #[tracing::instrument(skip(self))]
    pub async fn issue(&self, username: &str) -> Result<SessionToken> {
        let issued_at = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| StorageError::internal_with_source("session ttl out of range", e))?;
        let expires_at = issued_at
            .checked_add_signed(ttl)
            .ok_or_else(|| StorageError::internal("session expiry out of range"))?;

        for _ in 0..ISSUE_ATTEMPTS {
            let session = Session::builder()
                .token(SessionToken::generate())
                .username(username)
                .issued_at(issued_at)
                .expires_at(expires_at)
                .build();

            match self.registry.insert_new(&session).await {
                Ok(()) => {
                    tracing::debug!(expires_at = %session.expires_at, "session issued");
                    return Ok(session.token);
                },
                // 256-bit collision: draw again.
                Err(StorageError::Conflict) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StorageError::internal("could not allocate a unique session token").into())
    }

    /// Resolves `token` to the owning username.
    ///
    /// # Errors
    ///
    /// - [`AuthError::UnknownSession`] if no session exists for the token
    /// - [`AuthError::SessionExpired`] if it expired (it is deleted as a side effect)
    /// - [`AuthError::Storage`] on storage failure
    pub async fn validate(&self, token: &SessionToken) -> Result<String> {
        self.validate_at(token, Utc::now()).await.map(|session| session.username)
    }

    /// [`validate`](Self::validate) against an explicit clock reading,
    /// returning the whole session.
    #[tracing::instrument(skip(self, token))]
    pub async fn validate_at(&self, token: &SessionToken, now: DateTime<Utc>) -> Result<Session> {
        let Some(session) = self.registry.try_load::<Session>(token.as_bytes()).await? else {
            return Err(AuthError::UnknownSession);
        };

        if session.is_expired_at(now) {
            if let Err(e) = self.registry.remove::<Session>(token.as_bytes()).await {
                tracing::warn!(error = %e, "failed to remove expired session");
            }
            tracing::debug!(username = %session.username, "session expired");
            return Err(AuthError::SessionExpired);
        }

        Ok(session)
    }

    /// Deletes the session. Revoking an unknown token succeeds.
    #[tracing::instrument(skip(self, token))]
    pub async fn revoke(&self, token: &SessionToken) -> Result<()> {
        self.registry.remove::<Session>(token.as_bytes()).await?;
        Ok(())
    }

    /// Deletes every expired session, returning how many were removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        self.purge_expired_at(Utc::now()).await
    }

    /// [`purge_expired`](Self::purge_expired) against an explicit clock reading.
    #[tracing::instrument(skip(self))]
    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut cursor = self.registry.keys(Namespace::Sessions);
        let mut purged = 0;
        while let Some(key) = cursor.next_key().await? {
            match self.registry.try_load::<Session>(&key).await {
                Ok(Some(session)) if session.is_expired_at(now) => {
                    self.registry.remove::<Session>(&key).await?;
                    purged += 1;
                },
                Ok(_) => {},
                // An undecodable session can never validate; drop it.
                Err(StorageError::Serialization { .. }) => {
                    tracing::warn!("removing undecodable session record");
                    self.registry.remove::<Session>(&key).await?;
                    purged += 1;
                },
                Err(e) => return Err(e.into()),
            }
        }
        tracing::info!(purged, "expired sessions purged");
        Ok(purged)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use expedientes_storage::MemoryBackend;

    use super::*;

    fn manager() -> SessionManager<MemoryBackend> {
        SessionManager::new(MemoryBackend::new(), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn issued_token_validates_to_username() {
        let sessions = manager();
        let token = sessions.issue("doctorA").await.unwrap();
        assert_eq!(sessions.validate(&token).await.unwrap(), "doctorA");
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let sessions = manager();
        let err = sessions.validate(&SessionToken::from("nope")).await.unwrap_err();
        assert!(matches!(err, AuthError::UnknownSession));
    }

    #[tokio::test]
    async fn revoked_token_is_rejected_and_revoke_is_idempotent() {
        let sessions = manager();
        let token = sessions.issue("doctorA").await.unwrap();

        sessions.revoke(&token).await.unwrap();
        sessions.revoke(&token).await.unwrap();
        assert!(matches!(sessions.validate(&token).await, Err(AuthError::UnknownSession)));
    }

    #[tokio::test]
    async fn expiry_is_exclusive_and_deletes_the_session() {
        let sessions = manager();
        let token = sessions.issue("doctorA").await.unwrap();
        let session = sessions.validate_at(&token, Utc::now()).await.unwrap();

        let just_before = session.expires_at - chrono::Duration::milliseconds(1);
        assert!(sessions.validate_at(&token, just_before).await.is_ok());

        let err = sessions.validate_at(&token, session.expires_at).await.unwrap_err();
        assert!(matches!(err, AuthError::SessionExpired));

        // Cleanup side effect: the session is gone now.
        let err = sessions.validate_at(&token, just_before).await.unwrap_err();
        assert!(matches!(err, AuthError::UnknownSession));
    }

    #[tokio::test]
    async fn one_user_can_hold_several_sessions() {
        let sessions = manager();
        let a = sessions.issue("doctorA").await.unwrap();
        let b = sessions.issue("doctorA").await.unwrap();
        assert_ne!(a, b);

        sessions.revoke(&a).await.unwrap();
        assert_eq!(sessions.validate(&b).await.unwrap(), "doctorA");
    }

    #[tokio::test]
    async fn purge_removes_only_expired_sessions() {
        let sessions = manager();
        let old = sessions.issue("doctorA").await.unwrap();
        let later = Utc::now() + chrono::Duration::seconds(120);
        let fresh_manager = SessionManager::new(sessions.registry.backend().clone(), Duration::from_secs(3600));
        let fresh = fresh_manager.issue("doctorB").await.unwrap();

        assert_eq!(sessions.purge_expired_at(later).await.unwrap(), 1);
        assert!(matches!(sessions.validate(&old).await, Err(AuthError::UnknownSession)));
        assert_eq!(sessions.validate(&fresh).await.unwrap(), "doctorB");
    }

    #[rstest::rstest]
    #[case::not_a_chrono_duration(Duration::from_secs(u64::MAX))]
    #[case::expiry_past_year_262143(Duration::from_secs(1_000_000 * 365 * 24 * 60 * 60))]
    #[tokio::test]
    async fn oversized_ttl_is_an_error(#[case] ttl: Duration) {
        let sessions = SessionManager::new(MemoryBackend::new(), ttl);
        let err = sessions.issue("doctorA").await.unwrap_err();
        assert!(matches!(err, AuthError::Storage(StorageError::Internal { .. })), "{err:?}");
        assert_eq!(sessions.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn storage_failure_surfaces_as_storage_error() {
        let sessions = manager();
        sessions.registry.backend().close().await.unwrap();
        let err = sessions.issue("doctorA").await.unwrap_err();
        assert!(matches!(err, AuthError::Storage(StorageError::Closed)));
    }
}
