//! The server over real sockets.
#![allow(clippy::expect_used, clippy::panic)]

use expedientes_records::{Gateway, RecordService, ServiceConfig};
use expedientes_server::{serve, write_dump};
use expedientes_storage::{Backend, EngineKind, StorageBackend, StorageConfig};
use serde_json::{Value, json};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::oneshot,
    task::JoinHandle,
};

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let (reader, writer) = TcpStream::connect(addr).await.expect("connect").into_split();
        Self { lines: BufReader::new(reader).lines(), writer }
    }

    async fn call(&mut self, request: Value) -> Value {
        let mut line = request.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.expect("send");
        let reply = self.lines.next_line().await.expect("receive").expect("reply line");
        serde_json::from_str(&reply).expect("reply is JSON")
    }
}

async fn start(backend: Backend) -> (std::net::SocketAddr, oneshot::Sender<()>, JoinHandle<std::io::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let gateway = Gateway::new(RecordService::new(backend, ServiceConfig::default()));
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(serve(listener, gateway, async move {
        let _ = stopped.await;
    }));
    (addr, stop, handle)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worked_example_over_tcp_then_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = StorageConfig::builder()
        .engine(EngineKind::Redb)
        .path(dir.path().join("store.redb"))
        .build()
        .expect("storage config");

    let backend = Backend::open(&config).expect("open");
    let (addr, stop, server) = start(backend.clone()).await;

    let mut doctor = Client::connect(addr).await;
    let reply = doctor
        .call(json!({
            "action": "register", "username": "doctorA", "password": "pw",
            "surname": "Lopez", "specialty": 1, "hospital": 2
        }))
        .await;
    assert_eq!(reply["success"], true, "{reply}");

    let token = doctor.call(json!({ "action": "login", "username": "doctorA", "password": "pw" })).await["data"]
        ["token"]
        .clone();
    let patient = doctor
        .call(json!({
            "action": "intakePatient", "token": token, "name": "Ana", "surname": "Ruiz",
            "dateOfBirth": "1990-01-01", "sex": "F"
        }))
        .await["data"]["patientId"]
        .clone();

    // A second connection shares the same store and session table.
    let mut colleague = Client::connect(addr).await;
    let created = colleague
        .call(json!({
            "action": "createRecord", "token": token, "patientId": patient,
            "observations": "first visit"
        }))
        .await;
    assert_eq!(created["success"], true, "{created}");
    let record = created["data"]["recordId"].clone();

    let history = doctor.call(json!({ "action": "history", "token": token, "patientId": patient })).await;
    assert_eq!(history["data"]["records"][0]["id"], record);

    stop.send(()).expect("server still running");
    server.await.expect("server task").expect("serve");
    backend.close().await.expect("close");

    let reopened = Backend::open(&config).expect("reopen");
    let service = RecordService::new(reopened.clone(), ServiceConfig::default());
    let login = service.login("doctorA", "pw").await.expect("login after reopen");
    let history = service
        .history(&login.token, serde_json::from_value(patient).expect("patient id"))
        .await
        .expect("history after reopen");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].observations, "first visit");

    let mut out = Vec::new();
    assert!(write_dump(&reopened, &mut out).await.expect("dump") > 0);
    let text = String::from_utf8(out).expect("utf-8 dump");
    assert!(text.contains("[users] 1 entries\n  doctorA = "), "{text}");
    assert!(text.contains("first visit"), "{text}");
}

#[tokio::test]
async fn shutdown_drops_open_connections() {
    let (addr, stop, server) = start(Backend::memory()).await;
    let mut client = Client::connect(addr).await;
    let reply = client.call(json!({ "action": "scopeRecords", "token": "nope" })).await;
    assert_eq!(reply["error"], "unauthenticated");

    stop.send(()).expect("server still running");
    server.await.expect("server task").expect("serve");

    let next = client.lines.next_line().await;
    assert!(matches!(next, Ok(None) | Err(_)), "connection should be closed");
}
