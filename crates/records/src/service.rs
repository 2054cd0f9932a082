//! The record service.
//!
//! Every operation past login takes the session token explicitly; there is
//! no per-connection user state. A token resolves to an [`Account`], whose
//! current (hospital, specialty) is the caller's [`Scope`](crate::types::Scope).
//!
//! # Authorization
//!
//! A record's scope is stamped from its author at creation and never
//! changes. Reading it through [`history`](RecordService::history),
//! [`scope_records`](RecordService::scope_records) or
//! [`get_record`](RecordService::get_record), and amending it, require the
//! caller's scope to equal the stamped one. Patients carry no scope: any
//! authenticated caller may intake, look up, or add records to any patient.

use std::sync::Arc;

use chrono::Utc;
use expedientes_authn::{PasswordHash, SessionManager, SessionToken};
use expedientes_storage::{Registry, StorageBackend, StorageError, registry::keys};
use serde::Serialize;

use crate::{
    config::ServiceConfig,
    error::{Result, ServiceError},
    ids::IdGenerator,
    index::{IndexReport, RecordIndex, stage_insert},
    retry::with_conflict_retry,
    types::{
        Account, HospitalCode, Patient, PatientId, Record, RecordId, Sex, SpecialtyCode,
        parse_date_of_birth,
    },
};

/// Successful login.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOutcome {
    /// Bearer token for subsequent calls.
    pub token: SessionToken,
    /// The account's specialty.
    pub specialty: SpecialtyCode,
    /// The account's hospital.
    pub hospital: HospitalCode,
}

/// What [`RecordService::prepare`] did at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Expired sessions removed.
    pub purged_sessions: usize,
    /// Index state before any rebuild.
    pub index: IndexReport,
    /// Whether the index was rebuilt.
    pub rebuilt: bool,
}

/// Session-authenticated, scope-authorized access to patients and records.
///
/// Cheap to clone; clones share the engine handle and id generator.
///
/// # Example
///
/// ```
/// use expedientes_records::{HospitalCode, RecordService, ServiceConfig, SpecialtyCode};
/// use expedientes_storage::MemoryBackend;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let service = RecordService::new(MemoryBackend::new(), ServiceConfig::default());
///
/// service.register("doctorA", "pw", "Lopez", SpecialtyCode(1), HospitalCode(2)).await.unwrap();
/// let login = service.login("doctorA", "pw").await.unwrap();
///
/// let patient = service.intake_patient(&login.token, "Ana", "Ruiz", "1990-01-01", "F").await.unwrap();
/// let record = service.create_record(&login.token, patient, "first visit").await.unwrap();
///
/// let history = service.history(&login.token, patient).await.unwrap();
/// assert_eq!(history.len(), 1);
/// assert_eq!(history[0].id, record);
/// assert_eq!(history[0].observations, "first visit");
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct RecordService<B> {
    registry: Registry<B>,
    sessions: SessionManager<B>,
    index: RecordIndex<B>,
    ids: Arc<IdGenerator>,
    config: Arc<ServiceConfig>,
}

impl<B: StorageBackend + Clone> RecordService<B> {
    /// Creates a service over an open engine.
    pub fn new(backend: B, config: ServiceConfig) -> Self {
        let registry = Registry::new(backend.clone());
        Self {
            sessions: SessionManager::new(backend, config.session_ttl()),
            index: RecordIndex::new(registry.clone()),
            registry,
            ids: Arc::new(IdGenerator::new()),
            config: Arc::new(config),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The session manager.
    pub fn sessions(&self) -> &SessionManager<B> {
        &self.sessions
    }

    /// The record index.
    pub fn index(&self) -> &RecordIndex<B> {
        &self.index
    }

    /// The typed storage facade.
    pub fn registry(&self) -> &Registry<B> {
        &self.registry
    }

    /// Startup maintenance: purges expired sessions, verifies the record
    /// index, and rebuilds it when it diverges or when configured to always
    /// rebuild.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Io`] on storage failure.
    #[tracing::instrument(skip(self))]
    pub async fn prepare(&self) -> Result<MaintenanceReport> {
        let purged_sessions = self.sessions.purge_expired().await?;
        let index = self.index.verify().await?;
        let rebuilt = if !index.is_consistent() || self.config.rebuild_index_on_start() {
            self.index.rebuild().await?;
            true
        } else {
            false
        };
        Ok(MaintenanceReport { purged_sessions, index, rebuilt })
    }

    /// Registers a staff account.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::InvalidArgument`] if username or password is empty, or
    ///   a code is outside its catalog
    /// - [`ServiceError::Conflict`] if the username is taken
    #[tracing::instrument(skip(self, password, surname))]
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        surname: &str,
        specialty: SpecialtyCode,
        hospital: HospitalCode,
    ) -> Result<()> {
        require("username", username)?;
        if password.is_empty() {
            return Err(ServiceError::invalid_argument("password must not be empty"));
        }
        if !self.config.is_known_specialty(specialty) {
            return Err(ServiceError::invalid_argument(format!("unknown specialty code {specialty}")));
        }
        if !self.config.is_known_hospital(hospital) {
            return Err(ServiceError::invalid_argument(format!("unknown hospital code {hospital}")));
        }

        let account = Account {
            username: username.to_owned(),
            password: PasswordHash::new(password),
            surname: surname.trim().to_owned(),
            specialty,
            hospital,
            created_at: Utc::now(),
        };
        match self.registry.insert_new(&account).await {
            Ok(()) => {
                tracing::info!("account registered");
                Ok(())
            },
            Err(StorageError::Conflict) => {
                Err(ServiceError::conflict(format!("username {username} is already registered")))
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Checks credentials and issues a session.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Unauthenticated`] on an unknown username or a wrong
    /// password; both read the same.
    #[tracing::instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome> {
        let Some(account) = self.registry.try_load::<Account>(username.as_bytes()).await? else {
            tracing::debug!("login for unknown username");
            // Same digest work as a wrong password for a known account.
            std::hint::black_box(PasswordHash::placeholder().verify(password));
            return Err(expedientes_authn::AuthError::InvalidCredentials.into());
        };
        account.password.check(password)?;

        let token = self.sessions.issue(&account.username).await?;
        tracing::info!("login succeeded");
        Ok(LoginOutcome { token, specialty: account.specialty, hospital: account.hospital })
    }

    /// Ends a session.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Unauthenticated`] if the token was already invalid.
    #[tracing::instrument(skip(self, token))]
    pub async fn logout(&self, token: &SessionToken) -> Result<()> {
        let username = self.sessions.validate(token).await?;
        self.sessions.revoke(token).await?;
        tracing::info!(%username, "logged out");
        Ok(())
    }

    /// Registers a patient and returns the new id.
    ///
    /// `date_of_birth` is `YYYY-MM-DD` (or `DD-MM-YYYY`) and may not be in
    /// the future. `sex` is male, female or other, or one of their aliases.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Unauthenticated`] on an invalid token
    /// - [`ServiceError::InvalidArgument`] on an empty name, a bad date, or an
    ///   unknown sex
    #[tracing::instrument(skip(self, token, name, surname, date_of_birth))]
    pub async fn intake_patient(
        &self,
        token: &SessionToken,
        name: &str,
        surname: &str,
        date_of_birth: &str,
        sex: &str,
    ) -> Result<PatientId> {
        let account = self.authenticate(token).await?;
        require("name", name)?;
        require("surname", surname)?;
        let date_of_birth = parse_date_of_birth(date_of_birth, Utc::now().date_naive())?;
        let sex: Sex = sex.parse()?;

        let patient = Patient {
            id: PatientId(self.ids.next_id()),
            name: name.trim().to_owned(),
            surname: surname.trim().to_owned(),
            date_of_birth,
            sex,
            intake_by: account.username,
            intake_at: Utc::now(),
        };
        self.registry.insert_new(&patient).await?;
        tracing::info!(patient_id = %patient.id, "patient admitted");
        Ok(patient.id)
    }

    /// Loads one patient.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotFound`] if no such patient exists.
    #[tracing::instrument(skip(self, token))]
    pub async fn get_patient(&self, token: &SessionToken, patient_id: PatientId) -> Result<Patient> {
        self.authenticate(token).await?;
        self.load_patient(patient_id).await
    }

    /// Creates a record for a patient, stamped with the caller's scope, and
    /// returns its id.
    ///
    /// The record and both index entries commit in one transaction. Losing a
    /// race on an index entry retries within the configured budget.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::NotFound`] if the patient does not exist
    /// - [`ServiceError::Conflict`] if the retry budget runs out
    #[tracing::instrument(skip(self, token, observations))]
    pub async fn create_record(
        &self,
        token: &SessionToken,
        patient_id: PatientId,
        observations: &str,
    ) -> Result<RecordId> {
        let account = self.authenticate(token).await?;
        self.load_patient(patient_id).await?;

        let now = Utc::now();
        let record = Record {
            id: RecordId(self.ids.next_id()),
            patient_id,
            scope: account.scope(),
            author: account.username,
            observations: observations.to_owned(),
            created_at: now,
            modified_at: now,
        };

        let registry = &self.registry;
        let record_ref = &record;
        with_conflict_retry(self.config.conflict_retry(), "create_record", move || async move {
            let mut txn = registry.transaction().await?;
            txn.insert_new(record_ref)?;
            stage_insert(&mut txn, record_ref.patient_index_key(), record_ref.id).await?;
            stage_insert(&mut txn, record_ref.scope.index_key(), record_ref.id).await?;
            txn.commit().await
        })
        .await?;

        tracing::info!(record_id = %record.id, scope = %record.scope, "record created");
        Ok(record.id)
    }

    /// Replaces a record's observations.
    ///
    /// The write is conditional on the record being unchanged since it was
    /// read, so of two concurrent amendments one fails with `Conflict`.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::NotFound`] if the record does not exist
    /// - [`ServiceError::PermissionDenied`] if the caller's scope differs from
    ///   the record's
    /// - [`ServiceError::Conflict`] if the record changed concurrently
    #[tracing::instrument(skip(self, token, observations))]
    pub async fn amend_record(
        &self,
        token: &SessionToken,
        record_id: RecordId,
        observations: &str,
    ) -> Result<()> {
        let account = self.authenticate(token).await?;
        let (mut record, snapshot) = match self
            .registry
            .load_with_snapshot::<Record>(&keys::id(record_id.0))
            .await
        {
            Ok(loaded) => loaded,
            Err(e) if e.is_not_found() => return Err(ServiceError::not_found("record", record_id)),
            Err(e) => return Err(e.into()),
        };
        authorize(&account, &record)?;

        record.observations = observations.to_owned();
        record.modified_at = Utc::now().max(record.modified_at);

        let mut txn = self.registry.transaction().await?;
        txn.replace(&snapshot, &record)?;
        match txn.commit().await {
            Ok(()) => {
                tracing::info!("record amended");
                Ok(())
            },
            Err(StorageError::Conflict) => {
                Err(ServiceError::conflict(format!("record {record_id} was modified concurrently")))
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Loads one record in the caller's scope.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::NotFound`] if the record does not exist
    /// - [`ServiceError::PermissionDenied`] if it is outside the caller's scope
    #[tracing::instrument(skip(self, token))]
    pub async fn get_record(&self, token: &SessionToken, record_id: RecordId) -> Result<Record> {
        let account = self.authenticate(token).await?;
        let record = self
            .registry
            .try_load::<Record>(&keys::id(record_id.0))
            .await?
            .ok_or_else(|| ServiceError::not_found("record", record_id))?;
        authorize(&account, &record)?;
        Ok(record)
    }

    /// Every record of a patient in the caller's scope, oldest first.
    ///
    /// An empty list means the patient has no records visible to the caller.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotFound`] if the patient does not exist.
    #[tracing::instrument(skip(self, token))]
    pub async fn history(&self, token: &SessionToken, patient_id: PatientId) -> Result<Vec<Record>> {
        let account = self.authenticate(token).await?;
        self.load_patient(patient_id).await?;

        let ids = self.index.ids_for_patient(patient_id).await?;
        let scope = account.scope();
        let mut records = self.load_records(&ids).await?;
        records.retain(|record| record.scope == scope);
        sort_by_creation(&mut records);
        Ok(records)
    }

    /// Every record stamped with the caller's scope, oldest first.
    #[tracing::instrument(skip(self, token))]
    pub async fn scope_records(&self, token: &SessionToken) -> Result<Vec<Record>> {
        let account = self.authenticate(token).await?;
        let ids = self.index.ids_for_scope(account.scope()).await?;
        let mut records = self.load_records(&ids).await?;
        sort_by_creation(&mut records);
        Ok(records)
    }

    /// Resolves a token to its account.
    async fn authenticate(&self, token: &SessionToken) -> Result<Account> {
        let username = self.sessions.validate(token).await?;
        self.registry
            .try_load::<Account>(username.as_bytes())
            .await?
            .ok_or(ServiceError::Unauthenticated { reason: "account no longer exists" })
    }

    async fn load_patient(&self, patient_id: PatientId) -> Result<Patient> {
        self.registry
            .try_load::<Patient>(&keys::id(patient_id.0))
            .await?
            .ok_or_else(|| ServiceError::not_found("patient", patient_id))
    }

    async fn load_records(&self, ids: &[RecordId]) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.registry.try_load::<Record>(&keys::id(id.0)).await? {
                Some(record) => records.push(record),
                None => tracing::warn!(record_id = %id, "index names a missing record"),
            }
        }
        Ok(records)
    }
}

/// Fails unless the caller's scope equals the record's stamped scope.
fn authorize(account: &Account, record: &Record) -> Result<()> {
    let caller = account.scope();
    if caller == record.scope {
        Ok(())
    } else {
        tracing::info!(record_id = %record.id, %caller, stamped = %record.scope, "out-of-scope access");
        Err(ServiceError::permission_denied(format!(
            "record {} belongs to {}, caller is in {}",
            record.id, record.scope, caller
        )))
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ServiceError::invalid_argument(format!("{field} must not be empty")));
    }
    Ok(())
}

fn sort_by_creation(records: &mut [Record]) {
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use expedientes_storage::MemoryBackend;

    use super::*;
    use crate::error::ErrorKind;

    fn service() -> RecordService<MemoryBackend> {
        RecordService::new(MemoryBackend::new(), ServiceConfig::default())
    }

    async fn logged_in(
        service: &RecordService<MemoryBackend>,
        user: &str,
        hospital: u16,
        specialty: u16,
    ) -> SessionToken {
        service
            .register(user, "pw", "Lopez", SpecialtyCode(specialty), HospitalCode(hospital))
            .await
            .unwrap();
        service.login(user, "pw").await.unwrap().token
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_bad_input() {
        let service = service();
        service.register("doctorA", "pw", "Lopez", SpecialtyCode(1), HospitalCode(2)).await.unwrap();

        let dup = service.register("doctorA", "other", "X", SpecialtyCode(1), HospitalCode(2)).await;
        assert_eq!(dup.unwrap_err().kind(), ErrorKind::Conflict);

        let cases = [
            ("", "pw", 1, 2),
            ("  ", "pw", 1, 2),
            ("doctorB", "", 1, 2),
            ("doctorB", "pw", 99, 2),
            ("doctorB", "pw", 1, 0),
        ];
        for (user, pw, specialty, hospital) in cases {
            let err = service
                .register(user, pw, "S", SpecialtyCode(specialty), HospitalCode(hospital))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{user:?}/{pw:?}/{specialty}/{hospital}");
        }
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let service = service();
        service.register("doctorA", "pw", "Lopez", SpecialtyCode(1), HospitalCode(2)).await.unwrap();

        let unknown = service.login("nobody", "pw").await.unwrap_err();
        let wrong = service.login("doctorA", "nope").await.unwrap_err();
        assert_eq!(unknown.kind(), ErrorKind::Unauthenticated);
        assert_eq!(unknown.to_string(), wrong.to_string());

        for password in ["", "pw"] {
            let unknown = service.login("nobody", password).await.unwrap_err();
            assert_eq!(unknown.to_string(), wrong.to_string());
        }
    }

    #[tokio::test]
    async fn login_returns_account_scope() {
        let service = service();
        service.register("doctorA", "pw", "Lopez", SpecialtyCode(1), HospitalCode(2)).await.unwrap();
        let login = service.login("doctorA", "pw").await.unwrap();
        assert_eq!(login.specialty, SpecialtyCode(1));
        assert_eq!(login.hospital, HospitalCode(2));
        assert_eq!(service.sessions().validate(&login.token).await.unwrap(), "doctorA");
    }

    #[tokio::test]
    async fn logout_invalidates_token_everywhere() {
        let service = service();
        let token = logged_in(&service, "doctorA", 2, 1).await;
        let patient = service.intake_patient(&token, "Ana", "Ruiz", "1990-01-01", "F").await.unwrap();

        service.logout(&token).await.unwrap();
        assert_eq!(service.logout(&token).await.unwrap_err().kind(), ErrorKind::Unauthenticated);
        assert_eq!(service.history(&token, patient).await.unwrap_err().kind(), ErrorKind::Unauthenticated);
        assert_eq!(
            service.create_record(&token, patient, "x").await.unwrap_err().kind(),
            ErrorKind::Unauthenticated
        );
    }

    #[tokio::test]
    async fn fresh_patient_has_empty_history() {
        let service = service();
        let token = logged_in(&service, "doctorA", 2, 1).await;
        let patient = service.intake_patient(&token, "Ana", "Ruiz", "1990-01-01", "F").await.unwrap();
        assert!(service.history(&token, patient).await.unwrap().is_empty());

        let missing = service.history(&token, PatientId(12345)).await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn intake_validates_fields() {
        let service = service();
        let token = logged_in(&service, "doctorA", 2, 1).await;
        for (name, surname, dob, sex) in [
            ("", "Ruiz", "1990-01-01", "F"),
            ("Ana", " ", "1990-01-01", "F"),
            ("Ana", "Ruiz", "1990-02-30", "F"),
            ("Ana", "Ruiz", "2999-01-01", "F"),
            ("Ana", "Ruiz", "1990-01-01", "X"),
        ] {
            let err = service.intake_patient(&token, name, surname, dob, sex).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{name:?} {surname:?} {dob:?} {sex:?}");
        }
    }

    #[tokio::test]
    async fn intake_stores_demographics() {
        let service = service();
        let token = logged_in(&service, "doctorA", 2, 1).await;
        let id = service.intake_patient(&token, " Ana ", "Ruiz", "02-03-1990", "mujer").await.unwrap();

        let patient = service.get_patient(&token, id).await.unwrap();
        assert_eq!(patient.name, "Ana");
        assert_eq!(patient.date_of_birth.to_string(), "1990-03-02");
        assert_eq!(patient.sex, Sex::Female);
        assert_eq!(patient.intake_by, "doctorA");
    }

    #[tokio::test]
    async fn create_record_requires_existing_patient() {
        let service = service();
        let token = logged_in(&service, "doctorA", 2, 1).await;
        let err = service.create_record(&token, PatientId(1), "x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(service.index().verify().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn history_is_scoped_and_ordered() {
        let service = service();
        let a = logged_in(&service, "doctorA", 2, 1).await;
        let b = logged_in(&service, "doctorB", 3, 1).await;
        let patient = service.intake_patient(&a, "Ana", "Ruiz", "1990-01-01", "F").await.unwrap();

        let first = service.create_record(&a, patient, "first").await.unwrap();
        let other = service.create_record(&b, patient, "cardiology note").await.unwrap();
        let second = service.create_record(&a, patient, "second").await.unwrap();

        let history: Vec<_> = service.history(&a, patient).await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(history, vec![first, second]);

        let b_history = service.history(&b, patient).await.unwrap();
        assert_eq!(b_history.len(), 1);
        assert_eq!(b_history[0].id, other);
    }

    #[tokio::test]
    async fn amend_enforces_scope_and_preserves_data() {
        let service = service();
        let a = logged_in(&service, "doctorA", 2, 1).await;
        let b = logged_in(&service, "doctorB", 2, 5).await;
        let patient = service.intake_patient(&a, "Ana", "Ruiz", "1990-01-01", "F").await.unwrap();
        let record = service.create_record(&a, patient, "first visit").await.unwrap();

        let err = service.amend_record(&b, record, "tampered").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(service.get_record(&b, record).await.unwrap_err().kind(), ErrorKind::PermissionDenied);
        assert_eq!(service.get_record(&a, record).await.unwrap().observations, "first visit");

        let before = service.get_record(&a, record).await.unwrap();
        service.amend_record(&a, record, "follow-up").await.unwrap();
        let after = service.get_record(&a, record).await.unwrap();
        assert_eq!(after.observations, "follow-up");
        assert_eq!(after.created_at, before.created_at);
        assert!(after.modified_at >= before.modified_at);
        assert_eq!(after.scope, before.scope);

        let missing = service.amend_record(&a, RecordId(1), "x").await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn scope_records_lists_only_own_scope() {
        let service = service();
        let a = logged_in(&service, "doctorA", 2, 1).await;
        let b = logged_in(&service, "doctorB", 4, 4).await;
        let p1 = service.intake_patient(&a, "Ana", "Ruiz", "1990-01-01", "F").await.unwrap();
        let p2 = service.intake_patient(&b, "Luis", "Gil", "1985-05-05", "H").await.unwrap();

        let r1 = service.create_record(&a, p1, "a1").await.unwrap();
        service.create_record(&b, p1, "b1").await.unwrap();
        let r2 = service.create_record(&a, p2, "a2").await.unwrap();

        let ids: Vec<_> = service.scope_records(&a).await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![r1, r2]);
    }

    #[tokio::test]
    async fn prepare_repairs_index_and_purges_sessions() {
        let service = service();
        let token = logged_in(&service, "doctorA", 2, 1).await;
        let patient = service.intake_patient(&token, "Ana", "Ruiz", "1990-01-01", "F").await.unwrap();
        let record = service.create_record(&token, patient, "x").await.unwrap();

        service.registry().backend().delete("record_index", &keys::patient_index(patient.0)).await.unwrap();
        assert!(service.history(&token, patient).await.unwrap().is_empty());

        let report = service.prepare().await.unwrap();
        assert!(report.rebuilt);
        assert!(!report.index.is_consistent());
        assert_eq!(report.purged_sessions, 0);
        assert_eq!(service.history(&token, patient).await.unwrap()[0].id, record);

        let clean = service.prepare().await.unwrap();
        assert!(!clean.rebuilt);
    }
}
