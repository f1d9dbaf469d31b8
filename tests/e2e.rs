//! E2E regression test suite for the hub
//!
//! Uses the real axum router on an ephemeral port, a real sqlite store
//! (in memory) and a stub recognition service to exercise the full
//! pipeline:
//!
//! - Device WS → dispatcher → store/recognition → admin-room broadcast
//! - Admin WS admitted by a signed token at connect time
//!
//! Run: `cargo test --test e2e`

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite;
use uuid::Uuid;

use kao_hub::{auth, web, Config, HttpRecognitionClient, HubState, SqliteStore};

const SECRET: &str = "e2e-secret";

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Stub recognition service. Answers every POST /recognition/binary
/// with the configured result tag and counts the calls.
struct StubRecognition {
    result: &'static str,
    user_id: i64,
    calls: AtomicUsize,
}

async fn start_stub_recognition(stub: Arc<StubRecognition>) -> SocketAddr {
    use axum::extract::State;
    use axum::response::Json;
    use axum::routing::post;

    async fn classify(State(stub): State<Arc<StubRecognition>>) -> Json<Value> {
        stub.calls.fetch_add(1, Ordering::SeqCst);
        Json(json!({
            "result": stub.result,
            "userId": stub.user_id,
            "confidence": 0.91,
            "image": "ANNOTATED",
        }))
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = axum::Router::new()
        .route("/recognition/binary", post(classify))
        .with_state(stub);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Bring up the whole hub on an ephemeral port. Returns the bound
/// address, the shared state and a provisioned device token.
async fn start_test_hub(stub: Arc<StubRecognition>) -> (SocketAddr, Arc<HubState>, Uuid) {
    start_test_hub_with(stub, Duration::from_secs(1)).await
}

async fn start_test_hub_with(
    stub: Arc<StubRecognition>,
    write_timeout: Duration,
) -> (SocketAddr, Arc<HubState>, Uuid) {
    let recognition_addr = start_stub_recognition(stub).await;

    let config = Config {
        auth_secret: SECRET.into(),
        api_host: format!("http://{}", recognition_addr),
        frame_limit: 3,
        write_timeout,
        ..Config::default()
    };

    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let token = Uuid::new_v4();
    store
        .insert_device("D1", "Lobby", token, Utc::now() + chrono::Duration::hours(1))
        .unwrap();

    let recognizer =
        Arc::new(HttpRecognitionClient::new(&config.api_host, config.http_timeout).unwrap());
    let state = Arc::new(HubState::new(config, store, recognizer));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = web::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state, token)
}

async fn connect_ws(addr: SocketAddr, query: &str) -> WsStream {
    let url = format!("ws://{}/ws{}", addr, query);
    let (stream, _response) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("WebSocket connect failed");
    stream
}

async fn connect_admin(addr: SocketAddr) -> WsStream {
    let token = auth::issue_token("7", SECRET, Utc::now().timestamp() + 3600);
    let ws = connect_ws(addr, &format!("?auth_token={}", token)).await;
    // Registration happens in the connection task after the handshake;
    // give it a beat so broadcasts sent next reach this admin.
    tokio::time::sleep(Duration::from_millis(50)).await;
    ws
}

async fn send_command(ws: &mut WsStream, command: &str, data: Value) -> Uuid {
    let uuid = Uuid::new_v4();
    let frame = json!({"uuid": uuid, "command": command, "data": data}).to_string();
    ws.send(tungstenite::Message::Text(frame.into()))
        .await
        .unwrap();
    uuid
}

/// Read text frames until timeout, parsed as JSON.
async fn next_frame(ws: &mut WsStream) -> Value {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
        {
            Some(Ok(tungstenite::Message::Text(text))) => {
                return serde_json::from_str(&text).unwrap()
            }
            Some(Ok(_)) => continue, // Ignore ping/pong
            other => panic!("connection ended early: {:?}", other),
        }
    }
}

async fn authorize_device(ws: &mut WsStream, token: Uuid) {
    let uuid = send_command(
        ws,
        "authorize-device",
        json!({"deviceId": "D1", "authToken": token.to_string()}),
    )
    .await;
    let reply = next_frame(ws).await;
    assert_eq!(reply["uuid"], json!(uuid));
    assert_eq!(reply["result"], "success");
}

#[tokio::test(flavor = "multi_thread")]
async fn device_lifecycle_is_visible_to_admins() {
    let stub = Arc::new(StubRecognition {
        result: "recognized",
        user_id: 42,
        calls: AtomicUsize::new(0),
    });
    let (addr, _state, token) = start_test_hub(stub).await;

    let mut admin = connect_admin(addr).await;
    let mut device = connect_ws(addr, "").await;

    authorize_device(&mut device, token).await;
    let event = next_frame(&mut admin).await;
    assert_eq!(event["command"], "device-authorized");
    assert_eq!(event["data"]["deviceId"], "D1");
    assert_eq!(event["data"]["deviceName"], "Lobby");

    // The admin sees the device in the roster.
    let uuid = send_command(&mut admin, "get-devices", json!({})).await;
    let reply = next_frame(&mut admin).await;
    assert_eq!(reply["uuid"], json!(uuid));
    assert_eq!(reply["result"], "success");
    assert_eq!(reply["data"], json!([{"deviceId": "D1", "deviceName": "Lobby"}]));

    // On disconnect, the departure is announced.
    device.close(None).await.unwrap();
    let event = next_frame(&mut admin).await;
    assert_eq!(event["command"], "device-disconnected");
    assert_eq!(event["data"]["deviceId"], "D1");
}

#[tokio::test(flavor = "multi_thread")]
async fn frames_flow_to_the_admin_room_and_complete_the_session() {
    let stub = Arc::new(StubRecognition {
        result: "recognized",
        user_id: 42,
        calls: AtomicUsize::new(0),
    });
    let (addr, _state, token) = start_test_hub(stub.clone()).await;

    let mut admin = connect_admin(addr).await;
    let mut device = connect_ws(addr, "").await;
    authorize_device(&mut device, token).await;
    next_frame(&mut admin).await; // device-authorized

    let uuid = send_command(&mut device, "start-capture-session", json!({})).await;
    let reply = next_frame(&mut device).await;
    assert_eq!(reply["uuid"], json!(uuid));
    assert_eq!(reply["result"], "success");

    // Frame limit is 3 in this fixture: three frames classify and
    // broadcast, the fourth closes the session.
    for _ in 0..3 {
        let uuid = send_command(&mut device, "face-capture-frame", json!({"image": "RAW"})).await;
        let reply = next_frame(&mut device).await;
        assert_eq!(reply["uuid"], json!(uuid));
        assert_eq!(reply["result"], "success");

        let event = next_frame(&mut admin).await;
        assert_eq!(event["command"], "frame-captured");
        assert_eq!(event["data"]["deviceId"], "D1");
        // Recognized frames carry the service's annotated image.
        assert_eq!(event["data"]["image"], "ANNOTATED");
    }

    let uuid = send_command(&mut device, "face-capture-frame", json!({"image": "RAW"})).await;
    let reply = next_frame(&mut device).await;
    assert_eq!(reply["command"], "authorization-result");
    assert_eq!(reply["result"], "success");
    assert_ne!(reply["uuid"], json!(uuid));
    assert_eq!(reply["data"]["result"], "success");
    assert!(!reply["data"]["token"].as_str().unwrap().is_empty());

    // The closing intake never reached the recognition service.
    assert_eq!(stub.calls.load(Ordering::SeqCst), 3);

    // The session is closed: another frame is rejected.
    let uuid = send_command(&mut device, "face-capture-frame", json!({"image": "RAW"})).await;
    let reply = next_frame(&mut device).await;
    assert_eq!(reply["uuid"], json!(uuid));
    assert_eq!(reply["result"], "error");
    assert_eq!(reply["data"], json!("no open capture session"));
}

#[tokio::test(flavor = "multi_thread")]
async fn undetected_faces_are_relayed_but_never_recorded() {
    let stub = Arc::new(StubRecognition {
        result: "face not detected",
        user_id: 0,
        calls: AtomicUsize::new(0),
    });
    let (addr, _state, token) = start_test_hub(stub.clone()).await;

    let mut admin = connect_admin(addr).await;
    let mut device = connect_ws(addr, "").await;
    authorize_device(&mut device, token).await;
    next_frame(&mut admin).await; // device-authorized

    send_command(&mut device, "start-capture-session", json!({})).await;
    next_frame(&mut device).await;

    // Five undetected frames against a limit of three: the session
    // never advances, every frame still reaches the admin room with
    // the raw image.
    for _ in 0..5 {
        let uuid = send_command(&mut device, "face-capture-frame", json!({"image": "RAW"})).await;
        let reply = next_frame(&mut device).await;
        assert_eq!(reply["uuid"], json!(uuid));
        assert_eq!(reply["result"], "success");

        let event = next_frame(&mut admin).await;
        assert_eq!(event["command"], "frame-captured");
        assert_eq!(event["data"]["image"], "RAW");
    }
    assert_eq!(stub.calls.load(Ordering::SeqCst), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn unauthenticated_connections_cannot_act_as_admins() {
    let stub = Arc::new(StubRecognition {
        result: "recognized",
        user_id: 1,
        calls: AtomicUsize::new(0),
    });
    let (addr, _state, _token) = start_test_hub(stub).await;

    // A garbage token is ignored at the gate, not refused.
    let mut ws = connect_ws(addr, "?auth_token=garbage").await;
    let uuid = send_command(&mut ws, "get-devices", json!({})).await;
    let reply = next_frame(&mut ws).await;
    assert_eq!(reply["uuid"], json!(uuid));
    assert_eq!(reply["result"], "error");
    assert_eq!(reply["data"], json!("not authorized as admin"));
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_commands_do_not_kill_the_connection() {
    let stub = Arc::new(StubRecognition {
        result: "recognized",
        user_id: 1,
        calls: AtomicUsize::new(0),
    });
    let (addr, _state, token) = start_test_hub(stub).await;

    let mut device = connect_ws(addr, "").await;
    let uuid = send_command(&mut device, "reticulate-splines", json!({})).await;
    let reply = next_frame(&mut device).await;
    assert_eq!(reply["uuid"], json!(uuid));
    assert_eq!(reply["result"], "error");
    assert_eq!(reply["data"], json!("unknown command: reticulate-splines"));

    // Still usable afterwards.
    authorize_device(&mut device, token).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_reply_writes_do_not_kill_the_connection() {
    let stub = Arc::new(StubRecognition {
        result: "recognized",
        user_id: 1,
        calls: AtomicUsize::new(0),
    });
    // A 1 ns write budget: any reply too large to land in a single
    // poll times out. Small replies still complete on the first poll.
    let (addr, state, token) = start_test_hub_with(stub, Duration::from_nanos(1)).await;

    let mut device = connect_ws(addr, "").await;

    // An unknown command echoes its name in the error reply, so an
    // 8 MiB name forces the reply write past the socket buffer and
    // into the timeout.
    let huge = "x".repeat(8 * 1024 * 1024);
    send_command(&mut device, &huge, json!({})).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The lost reply must not have torn the connection down: the next
    // command is still processed.
    send_command(
        &mut device,
        "authorize-device",
        json!({"deviceId": "D1", "authToken": token.to_string()}),
    )
    .await;

    let authorized = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if state
                .registry
                .device_contexts()
                .await
                .iter()
                .any(|d| d.device_id == "D1")
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(authorized.is_ok(), "connection died after a failed reply write");
}

#[tokio::test(flavor = "multi_thread")]
async fn undecodable_envelopes_close_the_connection() {
    let stub = Arc::new(StubRecognition {
        result: "recognized",
        user_id: 1,
        calls: AtomicUsize::new(0),
    });
    let (addr, _state, _token) = start_test_hub(stub).await;

    let mut device = connect_ws(addr, "").await;
    device
        .send(tungstenite::Message::Text("not json".to_string().into()))
        .await
        .unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match device.next().await {
                Some(Ok(tungstenite::Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "connection should have closed");
}

#[tokio::test(flavor = "multi_thread")]
async fn status_endpoint_reports_registry_counters() {
    let stub = Arc::new(StubRecognition {
        result: "recognized",
        user_id: 1,
        calls: AtomicUsize::new(0),
    });
    let (addr, _state, token) = start_test_hub(stub).await;

    let mut admin = connect_admin(addr).await;
    let mut device = connect_ws(addr, "").await;
    authorize_device(&mut device, token).await;
    next_frame(&mut admin).await; // device-authorized

    let status: Value = reqwest::get(format!("http://{}/api/status", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["connections"], 2);
    assert_eq!(status["admins"], 1);
    assert_eq!(status["devices"], 1);
}
