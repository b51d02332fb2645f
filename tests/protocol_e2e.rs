//! ---
//! gr_section: "05-testing"
//! gr_subsection: "integration"
//! gr_type: "test"
//! gr_scope: "code"
//! gr_description: "End-to-end control protocol checks over a live websocket."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use gr_common::config::AppConfig;
use gr_common::metrics::RoverMetrics;
use gr_core::{RoverRuntime, RuntimeHandle};
use serde_json::{Map, Value};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Rover {
    _storage: TempDir,
    handle: RuntimeHandle,
}

async fn start_rover(start_enabled: bool) -> Rover {
    let storage = tempfile::tempdir().unwrap();
    std::fs::write(storage.path().join("index.html"), "<html></html>").unwrap();
    std::fs::write(storage.path().join("menu.html"), "menu").unwrap();

    let mut config = AppConfig::default();
    config.network.listen = "127.0.0.1:0".parse().unwrap();
    config.storage.root = storage.path().to_path_buf();
    config.telemetry.start_enabled = start_enabled;
    config.telemetry.position.period = Duration::from_millis(50);
    config.telemetry.position.seed = Some(7);

    let handle = RoverRuntime::new(config, RoverMetrics::unregistered().unwrap())
        .start()
        .await
        .unwrap();
    Rover {
        _storage: storage,
        handle,
    }
}

async fn connect(rover: &Rover) -> Socket {
    let url = format!("ws://{}/ghostRover", rover.handle.local_addr());
    let (socket, _) = connect_async(&url).await.unwrap();
    socket
}

async fn send(socket: &mut Socket, frame: &str) {
    socket.send(Message::Text(frame.into())).await.unwrap();
}

/// Next text frame decoded as a JSON object, or `None` on timeout.
async fn next_object(socket: &mut Socket, wait: Duration) -> Option<Map<String, Value>> {
    loop {
        let message = timeout(wait, socket.next()).await.ok()??.ok()?;
        if let Message::Text(text) = message {
            match serde_json::from_str::<Value>(&text).unwrap() {
                Value::Object(map) => return Some(map),
                other => panic!("unexpected frame {other}"),
            }
        }
    }
}

/// Skip telemetry frames until one carrying `key` arrives.
async fn frame_with(socket: &mut Socket, key: &str) -> Map<String, Value> {
    for _ in 0..50 {
        let frame = next_object(socket, Duration::from_secs(2))
            .await
            .expect("frame before timeout");
        if frame.contains_key(key) {
            return frame;
        }
    }
    panic!("no frame carrying {key}");
}

#[tokio::test]
async fn operate_ready_replies_with_identity_and_starts_position_frames() {
    let rover = start_rover(false).await;
    let mut socket = connect(&rover).await;
    assert!(next_object(&mut socket, Duration::from_millis(200)).await.is_none());

    send(&mut socket, r#"{"operate":"ready"}"#).await;
    let reply = frame_with(&mut socket, "version").await;
    let version = reply["version"].as_str().unwrap();
    assert_eq!(version.split('.').count(), 3);
    assert_eq!(reply["mode"], "base");
    assert_eq!(reply["units"], "meters");

    let fix = frame_with(&mut socket, "latitude").await;
    for key in ["elevation", "latitude", "longitude", "hac", "vac"] {
        assert!(fix[key].is_string(), "{key} should be a string");
    }
    let latitude: f64 = fix["latitude"].as_str().unwrap().parse().unwrap();
    assert!((35.556..=35.5566).contains(&latitude));

    rover.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn client_ready_pauses_producers() {
    let rover = start_rover(true).await;
    let mut socket = connect(&rover).await;
    frame_with(&mut socket, "latitude").await;

    send(&mut socket, r#"{"main":"ready"}"#).await;
    let reply = frame_with(&mut socket, "server").await;
    assert_eq!(reply["server"], "ready");

    // Drain anything already queued, then expect silence.
    while next_object(&mut socket, Duration::from_millis(150)).await.is_some() {}
    assert!(next_object(&mut socket, Duration::from_millis(300)).await.is_none());

    rover.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn lock_requests_are_acknowledged() {
    let rover = start_rover(false).await;
    let mut socket = connect(&rover).await;

    send(&mut socket, r#"{"laser":"lock"}"#).await;
    let reply = next_object(&mut socket, Duration::from_secs(2)).await.unwrap();
    assert_eq!(Value::Object(reply), serde_json::json!({"laser": "locked"}));

    send(&mut socket, r#"{"elevation":"unlock"}"#).await;
    let reply = next_object(&mut socket, Duration::from_secs(2)).await.unwrap();
    assert_eq!(Value::Object(reply), serde_json::json!({"elevation": "unlocked"}));

    rover.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn leaving_malformed_and_unknown_frames_get_no_reply() {
    let rover = start_rover(false).await;
    let mut socket = connect(&rover).await;

    send(&mut socket, r#"{"foo":"leaving","echo":"x"}"#).await;
    send(&mut socket, "not json at all").await;
    send(&mut socket, r#"{"unknown":"value"}"#).await;
    assert!(next_object(&mut socket, Duration::from_millis(300)).await.is_none());

    // The connection survives and still answers.
    send(&mut socket, r#"{"echo":"still here"}"#).await;
    let reply = next_object(&mut socket, Duration::from_secs(2)).await.unwrap();
    assert_eq!(reply["echo"], "still here");

    rover.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn file_commands_list_and_delete() {
    let rover = start_rover(false).await;
    let mut socket = connect(&rover).await;

    send(&mut socket, r#"{"listFiles":""}"#).await;
    let reply = next_object(&mut socket, Duration::from_secs(2)).await.unwrap();
    assert_eq!(reply["listFiles"], "/index.html,/menu.html,");

    send(&mut socket, r#"{"deleteFile":"/menu.html"}"#).await;
    let reply = next_object(&mut socket, Duration::from_secs(2)).await.unwrap();
    assert_eq!(reply["fileDeleted"], "/menu.html");

    send(&mut socket, r#"{"deleteFile":"/menu.html"}"#).await;
    let reply = next_object(&mut socket, Duration::from_secs(2)).await.unwrap();
    assert_eq!(reply["fileNOTdeleted"], "/menu.html");

    rover.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn replies_reach_every_connected_client() {
    let rover = start_rover(false).await;
    let mut first = connect(&rover).await;
    let mut second = connect(&rover).await;

    send(&mut first, r#"{"echo":"hello"}"#).await;
    for socket in [&mut first, &mut second] {
        let reply = next_object(socket, Duration::from_secs(2)).await.unwrap();
        assert_eq!(reply["echo"], "hello");
    }

    rover.handle.shutdown().await.unwrap();
}
