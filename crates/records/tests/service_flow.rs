//! End-to-end flows through the gateway and the service.
//!
//! These tests drive the JSON surface the server exposes, then check the
//! durable engine keeps accounts, sessions, patients, records and the index
//! across a close and reopen.
#![allow(clippy::expect_used, clippy::panic)]

use expedientes_records::{
    ErrorKind, Gateway, HospitalCode, PatientId, RecordService, ServiceConfig, SpecialtyCode,
};
use expedientes_storage::{RedbBackend, StorageBackend, testutil::temp_redb};
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn call<B: StorageBackend + Clone>(gateway: &Gateway<B>, request: Value) -> Value {
    let response = gateway.handle_line(&request.to_string()).await;
    serde_json::from_str(&response.to_line()).expect("response is JSON")
}

fn assert_ok(reply: &Value) {
    assert_eq!(reply["success"], true, "unexpected failure: {reply}");
}

fn assert_kind(reply: &Value, kind: &str) {
    assert_eq!(reply["success"], false, "unexpected success: {reply}");
    assert_eq!(reply["error"], kind, "wrong kind: {reply}");
}

// ---------------------------------------------------------------------------
// Worked example
// ---------------------------------------------------------------------------

#[tokio::test]
async fn worked_example_over_json() {
    let (_dir, backend) = temp_redb();
    let gateway = Gateway::new(RecordService::new(backend, ServiceConfig::default()));

    assert_ok(
        &call(
            &gateway,
            json!({
                "action": "register", "username": "doctorA", "password": "pw",
                "surname": "Lopez", "specialty": 1, "hospital": 2
            }),
        )
        .await,
    );

    let login = call(&gateway, json!({ "action": "login", "username": "doctorA", "password": "pw" })).await;
    assert_ok(&login);
    let token = login["data"]["token"].as_str().expect("token").to_owned();

    let intake = call(
        &gateway,
        json!({
            "action": "intakePatient", "token": token, "name": "Ana", "surname": "Ruiz",
            "dateOfBirth": "1990-01-01", "sex": "F"
        }),
    )
    .await;
    assert_ok(&intake);
    let patient_id = intake["data"]["patientId"].as_u64().expect("patient id");

    let empty = call(&gateway, json!({ "action": "history", "token": token, "patientId": patient_id })).await;
    assert_ok(&empty);
    assert_eq!(empty["message"], "no records found");
    assert_eq!(empty["data"]["records"], json!([]));

    let created = call(
        &gateway,
        json!({
            "action": "createRecord", "token": token, "patientId": patient_id,
            "observations": "first visit"
        }),
    )
    .await;
    assert_ok(&created);
    let record_id = created["data"]["recordId"].as_u64().expect("record id");

    let history = call(&gateway, json!({ "action": "history", "token": token, "patientId": patient_id })).await;
    assert_ok(&history);
    let records = history["data"]["records"].as_array().expect("records array");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["id"], record_id);
    assert_eq!(records[0]["observations"], "first visit");
    assert_eq!(records[0]["scope"], json!({ "hospital": 2, "specialty": 1 }));
}

// ---------------------------------------------------------------------------
// Error surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_error_kind_reaches_the_wire() {
    let (_dir, backend) = temp_redb();
    let gateway = Gateway::new(RecordService::new(backend, ServiceConfig::default()));
    let register = |user: &str, hospital: u16, specialty: u16| {
        json!({
            "action": "register", "username": user, "password": "pw",
            "surname": "S", "specialty": specialty, "hospital": hospital
        })
    };

    assert_kind(&call(&gateway, json!({ "oops": true })).await, "invalid_argument");
    assert_kind(&call(&gateway, register("doctorA", 2, 42)).await, "invalid_argument");

    assert_ok(&call(&gateway, register("doctorA", 2, 1)).await);
    assert_kind(&call(&gateway, register("doctorA", 2, 1)).await, "conflict");
    assert_ok(&call(&gateway, register("doctorB", 3, 1)).await);

    let bad_login = call(&gateway, json!({ "action": "login", "username": "doctorA", "password": "x" })).await;
    assert_kind(&bad_login, "unauthenticated");

    let token_a = call(&gateway, json!({ "action": "login", "username": "doctorA", "password": "pw" })).await
        ["data"]["token"]
        .clone();
    let token_b = call(&gateway, json!({ "action": "login", "username": "doctorB", "password": "pw" })).await
        ["data"]["token"]
        .clone();

    let missing = call(&gateway, json!({ "action": "getPatient", "token": token_a, "patientId": 9 })).await;
    assert_kind(&missing, "not_found");

    let patient = call(
        &gateway,
        json!({
            "action": "intakePatient", "token": token_a, "name": "Ana", "surname": "Ruiz",
            "dateOfBirth": "1990-01-01", "sex": "female"
        }),
    )
    .await["data"]["patientId"]
        .clone();
    let record = call(
        &gateway,
        json!({ "action": "createRecord", "token": token_a, "patientId": patient, "observations": "x" }),
    )
    .await["data"]["recordId"]
        .clone();

    let denied = call(
        &gateway,
        json!({ "action": "amendRecord", "token": token_b, "recordId": record, "observations": "y" }),
    )
    .await;
    assert_kind(&denied, "permission_denied");

    let logout = call(&gateway, json!({ "action": "logout", "token": token_a })).await;
    assert_ok(&logout);
    let reuse = call(&gateway, json!({ "action": "scopeRecords", "token": token_a })).await;
    assert_kind(&reuse, "unauthenticated");

    // Closing the engine turns every storage-touching request into io_failure.
    gateway.service().registry().backend().close().await.expect("close");
    let io = call(&gateway, json!({ "action": "scopeRecords", "token": token_b })).await;
    assert_kind(&io, "io_failure");
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn state_survives_close_and_reopen() {
    let (dir, backend) = temp_redb();
    let path = dir.path().join("test.redb");

    let (token, patient, record) = {
        let service = RecordService::new(backend.clone(), ServiceConfig::default());
        service
            .register("doctorA", "pw", "Lopez", SpecialtyCode(1), HospitalCode(2))
            .await
            .expect("register");
        let token = service.login("doctorA", "pw").await.expect("login").token;
        let patient = service
            .intake_patient(&token, "Ana", "Ruiz", "1990-01-01", "F")
            .await
            .expect("intake");
        let record = service.create_record(&token, patient, "first visit").await.expect("create");
        service.amend_record(&token, record, "amended").await.expect("amend");
        backend.close().await.expect("close");
        (token, patient, record)
    };

    let reopened = RedbBackend::open(&path).expect("reopen");
    let service = RecordService::new(reopened, ServiceConfig::default());
    let report = service.prepare().await.expect("prepare");
    assert!(report.index.is_consistent());
    assert!(!report.rebuilt);

    let history = service.history(&token, patient).await.expect("history after reopen");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, record);
    assert_eq!(history[0].observations, "amended");

    let login = service.login("doctorA", "pw").await.expect("login after reopen");
    assert_eq!(login.hospital, HospitalCode(2));

    let unknown = service.history(&token, PatientId(patient.0 + 1)).await.expect_err("unknown patient");
    assert_eq!(unknown.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn rebuild_on_start_is_honoured() {
    let (_dir, backend) = temp_redb();
    let config = ServiceConfig::builder().rebuild_index_on_start(true).build().expect("config");
    let service = RecordService::new(backend, config);

    let report = service.prepare().await.expect("prepare");
    assert!(report.index.is_consistent());
    assert!(report.rebuilt);
}
