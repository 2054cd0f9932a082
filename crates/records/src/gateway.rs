//! JSON request gateway.
//!
//! Decodes one request object (an `action` discriminator plus named fields),
//! runs it against the [`RecordService`], and encodes the outcome. Every
//! failure becomes a `success: false` response carrying the error kind; no
//! error escapes [`Gateway::dispatch`].

use expedientes_authn::SessionToken;
use expedientes_storage::{StorageBackend, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    error::{ErrorKind, ServiceError},
    service::RecordService,
    types::{HospitalCode, PatientId, RecordId, SpecialtyCode},
};

/// A decoded client request.
///
/// Not `Debug`: requests carry passwords.
#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    /// Register a staff account.
    Register {
        /// Login name.
        username: String,
        /// Password.
        password: String,
        /// Surname.
        surname: String,
        /// Specialty code.
        specialty: SpecialtyCode,
        /// Hospital code.
        hospital: HospitalCode,
    },
    /// Open a session.
    Login {
        /// Login name.
        username: String,
        /// Password.
        password: String,
    },
    /// Close a session.
    Logout {
        /// Session token.
        token: SessionToken,
    },
    /// Register a patient.
    IntakePatient {
        /// Session token.
        token: SessionToken,
        /// Given name.
        name: String,
        /// Surname.
        surname: String,
        /// Date of birth, `YYYY-MM-DD`.
        date_of_birth: String,
        /// Sex.
        sex: String,
    },
    /// Create a record.
    CreateRecord {
        /// Session token.
        token: SessionToken,
        /// Patient the record belongs to.
        patient_id: PatientId,
        /// Free-text observations.
        observations: String,
    },
    /// Replace a record's observations.
    AmendRecord {
        /// Session token.
        token: SessionToken,
        /// Record to amend.
        record_id: RecordId,
        /// New observations.
        observations: String,
    },
    /// A patient's records in the caller's scope.
    History {
        /// Session token.
        token: SessionToken,
        /// Patient to list.
        patient_id: PatientId,
    },
    /// One record.
    GetRecord {
        /// Session token.
        token: SessionToken,
        /// Record to load.
        record_id: RecordId,
    },
    /// Every record in the caller's scope.
    ScopeRecords {
        /// Session token.
        token: SessionToken,
    },
    /// One patient's demographics.
    GetPatient {
        /// Session token.
        token: SessionToken,
        /// Patient to load.
        patient_id: PatientId,
    },
}

impl Request {
    /// Wire name of the action.
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Login { .. } => "login",
            Self::Logout { .. } => "logout",
            Self::IntakePatient { .. } => "intakePatient",
            Self::CreateRecord { .. } => "createRecord",
            Self::AmendRecord { .. } => "amendRecord",
            Self::History { .. } => "history",
            Self::GetRecord { .. } => "getRecord",
            Self::ScopeRecords { .. } => "scopeRecords",
            Self::GetPatient { .. } => "getPatient",
        }
    }
}

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Whether the action succeeded.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// Failure category, absent on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    /// Action result, absent when there is nothing to return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    /// A success with no payload.
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into(), error: None, data: None }
    }

    /// A success with a payload.
    #[must_use]
    pub fn with_data(message: impl Into<String>, data: Value) -> Self {
        Self { success: true, message: message.into(), error: None, data: Some(data) }
    }

    /// A failure.
    #[must_use]
    pub fn failure(err: &ServiceError) -> Self {
        Self { success: false, message: err.to_string(), error: Some(err.kind()), data: None }
    }

    /// Encodes as one JSON line, without the trailing newline.
    #[must_use]
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "response encoding failed");
            r#"{"success":false,"message":"response encoding failed","error":"io_failure"}"#.to_owned()
        })
    }
}

/// Translates requests into service calls.
#[derive(Debug, Clone)]
pub struct Gateway<B> {
    service: RecordService<B>,
}

impl<B: StorageBackend + Clone> Gateway<B> {
    /// Wraps a service.
    pub fn new(service: RecordService<B>) -> Self {
        Self { service }
    }

    /// The wrapped service.
    pub fn service(&self) -> &RecordService<B> {
        &self.service
    }

    /// Decodes and dispatches one JSON request line.
    ///
    /// Malformed JSON, an unknown action, or a missing field yields an
    /// `invalid_argument` response.
    pub async fn handle_line(&self, line: &str) -> Response {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => {
                let err = ServiceError::invalid_argument(format!("malformed request: {e}"));
                tracing::debug!(error = %err, "rejected request");
                Response::failure(&err)
            },
        }
    }

    /// Runs one request. Never fails; errors become failure responses.
    #[tracing::instrument(skip_all, fields(action = request.action()))]
    pub async fn dispatch(&self, request: Request) -> Response {
        match self.run(request).await {
            Ok(response) => response,
            Err(err) => {
                match err.kind() {
                    ErrorKind::Io => tracing::error!(error = %err, "storage failure"),
                    ErrorKind::PermissionDenied => tracing::info!(error = %err, "request denied"),
                    _ => tracing::debug!(error = %err, "request failed"),
                }
                Response::failure(&err)
            },
        }
    }

    async fn run(&self, request: Request) -> Result<Response, ServiceError> {
        let service = &self.service;
        Ok(match request {
            Request::Register { username, password, surname, specialty, hospital } => {
                service.register(&username, &password, &surname, specialty, hospital).await?;
                Response::ok(format!("user {username} registered"))
            },
            Request::Login { username, password } => {
                let outcome = service.login(&username, &password).await?;
                Response::with_data("login successful", to_value(&outcome)?)
            },
            Request::Logout { token } => {
                service.logout(&token).await?;
                Response::ok("logged out")
            },
            Request::IntakePatient { token, name, surname, date_of_birth, sex } => {
                let id = service.intake_patient(&token, &name, &surname, &date_of_birth, &sex).await?;
                Response::with_data(format!("patient {id} admitted"), json!({ "patientId": id }))
            },
            Request::CreateRecord { token, patient_id, observations } => {
                let id = service.create_record(&token, patient_id, &observations).await?;
                Response::with_data(format!("record {id} created"), json!({ "recordId": id }))
            },
            Request::AmendRecord { token, record_id, observations } => {
                service.amend_record(&token, record_id, &observations).await?;
                Response::ok(format!("record {record_id} amended"))
            },
            Request::History { token, patient_id } => {
                let records = service.history(&token, patient_id).await?;
                let message = if records.is_empty() {
                    "no records found".to_owned()
                } else {
                    format!("{} record(s)", records.len())
                };
                Response::with_data(message, json!({ "records": to_value(&records)? }))
            },
            Request::GetRecord { token, record_id } => {
                let record = service.get_record(&token, record_id).await?;
                Response::with_data(format!("record {record_id}"), json!({ "record": to_value(&record)? }))
            },
            Request::ScopeRecords { token } => {
                let records = service.scope_records(&token).await?;
                let message = format!("{} record(s)", records.len());
                Response::with_data(message, json!({ "records": to_value(&records)? }))
            },
            Request::GetPatient { token, patient_id } => {
                let patient = service.get_patient(&token, patient_id).await?;
                Response::with_data(format!("patient {patient_id}"), json!({ "patient": to_value(&patient)? }))
            },
        })
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ServiceError> {
    serde_json::to_value(value)
        .map_err(|e| StorageError::serialization_with_source("response encoding failed", e).into())
}
