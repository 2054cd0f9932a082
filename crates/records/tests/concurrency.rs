//! Concurrent writers against one shared engine.
//!
//! Every record commits together with its two index entries under
//! compare-and-set, so racing writers may retry but never drop an id.
#![allow(clippy::expect_used, clippy::panic)]

use std::collections::{BTreeMap, BTreeSet};

use expedientes_authn::SessionToken;
use expedientes_records::{
    ConflictRetryConfig, ErrorKind, HospitalCode, PatientId, Record, RecordService, Scope,
    ServiceConfig, SpecialtyCode,
};
use expedientes_storage::{StorageBackend, testutil::temp_redb};
use tokio::task::JoinSet;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config() -> ServiceConfig {
    ServiceConfig::builder()
        .conflict_retry(
            ConflictRetryConfig::builder()
                .max_retries(64)
                .base_delay(std::time::Duration::from_millis(1))
                .build(),
        )
        .build()
        .expect("config")
}

async fn staff<B: StorageBackend + Clone>(
    service: &RecordService<B>,
    user: &str,
    hospital: u16,
    specialty: u16,
) -> SessionToken {
    service
        .register(user, "pw", "S", SpecialtyCode(specialty), HospitalCode(hospital))
        .await
        .expect("register");
    service.login(user, "pw").await.expect("login").token
}

/// Asserts that every index entry holds exactly the ids its records imply.
async fn assert_index_exact<B: StorageBackend + Clone>(service: &RecordService<B>, scopes: &[Scope]) {
    let records: Vec<Record> = service.registry().load_all().await.expect("load records");

    let mut by_scope: BTreeMap<Scope, BTreeSet<u64>> = BTreeMap::new();
    let mut by_patient: BTreeMap<PatientId, BTreeSet<u64>> = BTreeMap::new();
    for record in &records {
        by_scope.entry(record.scope).or_default().insert(record.id.0);
        by_patient.entry(record.patient_id).or_default().insert(record.id.0);
    }

    for scope in scopes {
        let indexed: BTreeSet<u64> =
            service.index().ids_for_scope(*scope).await.expect("scope ids").into_iter().map(|id| id.0).collect();
        assert_eq!(indexed, by_scope.remove(scope).unwrap_or_default(), "scope {scope}");
    }
    for (patient, expected) in by_patient {
        let indexed: BTreeSet<u64> =
            service.index().ids_for_patient(patient).await.expect("patient ids").into_iter().map(|id| id.0).collect();
        assert_eq!(indexed, expected, "patient {patient}");
    }
    assert!(service.index().verify().await.expect("verify").is_consistent());
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_on_distinct_patients_keep_index_exact() {
    let (_dir, backend) = temp_redb();
    let service = RecordService::new(backend, config());
    let scopes = [Scope::new(1, 1), Scope::new(1, 2), Scope::new(2, 1)];

    let mut tokens = Vec::new();
    for (i, scope) in scopes.iter().enumerate() {
        tokens.push(staff(&service, &format!("doc{i}"), scope.hospital.0, scope.specialty.0).await);
    }

    let mut patients = Vec::new();
    for i in 0..12 {
        let patient = service
            .intake_patient(&tokens[0], &format!("P{i}"), "Test", "2000-01-01", "other")
            .await
            .expect("intake");
        patients.push(patient);
    }

    let mut tasks = JoinSet::new();
    for (i, patient) in patients.iter().copied().enumerate() {
        let service = service.clone();
        let token = tokens[i % tokens.len()].clone();
        tasks.spawn(async move {
            for n in 0..3 {
                service.create_record(&token, patient, &format!("note {n}")).await.expect("create");
            }
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.expect("task panicked");
    }

    assert_eq!(service.registry().load_all::<Record>().await.expect("records").len(), 36);
    assert_index_exact(&service, &scopes).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_on_one_patient_lose_nothing() {
    let (_dir, backend) = temp_redb();
    let service = RecordService::new(backend, config());
    let token = staff(&service, "doctorA", 2, 1).await;
    let patient = service.intake_patient(&token, "Ana", "Ruiz", "1990-01-01", "F").await.expect("intake");

    let mut tasks = JoinSet::new();
    for n in 0..16 {
        let service = service.clone();
        let token = token.clone();
        tasks.spawn(async move { service.create_record(&token, patient, &format!("note {n}")).await });
    }
    let mut created = BTreeSet::new();
    while let Some(joined) = tasks.join_next().await {
        created.insert(joined.expect("task panicked").expect("create"));
    }

    let history: BTreeSet<_> =
        service.history(&token, patient).await.expect("history").into_iter().map(|r| r.id).collect();
    assert_eq!(history, created);
    assert_index_exact(&service, &[Scope::new(2, 1)]).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_amendments_never_lose_silently() {
    let (_dir, backend) = temp_redb();
    let service = RecordService::new(backend, config());
    let token = staff(&service, "doctorA", 2, 1).await;
    let patient = service.intake_patient(&token, "Ana", "Ruiz", "1990-01-01", "F").await.expect("intake");
    let record = service.create_record(&token, patient, "original").await.expect("create");

    let mut tasks = JoinSet::new();
    for n in 0..8 {
        let service = service.clone();
        let token = token.clone();
        tasks.spawn(async move { (n, service.amend_record(&token, record, &format!("amendment {n}")).await) });
    }

    let mut winners = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (n, result) = joined.expect("task panicked");
        match result {
            Ok(()) => winners.push(n),
            Err(e) => assert_eq!(e.kind(), ErrorKind::Conflict, "unexpected error: {e}"),
        }
    }

    // Some amendment landed, and the stored text is one a caller was told succeeded.
    assert!(!winners.is_empty());
    let stored = service.get_record(&token, record).await.expect("get").observations;
    assert!(winners.iter().any(|n| stored == format!("amendment {n}")), "stored {stored:?}, winners {winners:?}");
}
