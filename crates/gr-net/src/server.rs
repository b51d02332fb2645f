//! ---
//! gr_section: "03-networking"
//! gr_subsection: "module"
//! gr_type: "source"
//! gr_scope: "code"
//! gr_description: "Builder and handle for the combined HTTP and WebSocket server."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use gr_common::config::NetworkConfig;
use gr_common::metrics::RoverMetrics;
use gr_common::storage::StorageVolume;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::bind::bind_with_retry;
use crate::broadcast::FrameBroadcaster;
use crate::control::{ClientId, ControlHandler, StatusProvider};
use crate::http;
use crate::websocket;

const UPLOAD_LIMIT_BYTES: usize = 64 * 1024 * 1024;

/// Shared state injected into the axum handlers.
pub(crate) struct ServerState {
    pub(crate) broadcaster: FrameBroadcaster,
    pub(crate) handler: Arc<dyn ControlHandler>,
    pub(crate) status: Arc<dyn StatusProvider>,
    pub(crate) storage: StorageVolume,
    pub(crate) metrics: Option<RoverMetrics>,
    pub(crate) max_frame_bytes: usize,
    pub(crate) shutdown: watch::Receiver<bool>,
    next_client: AtomicU64,
}

impl ServerState {
    pub(crate) fn next_client_id(&self) -> ClientId {
        self.next_client.fetch_add(1, Ordering::Relaxed)
    }
}

/// Builder used to configure and spawn the rover's network surface.
#[derive(Clone)]
pub struct ServerBuilder {
    network: NetworkConfig,
    storage: StorageVolume,
    broadcaster: FrameBroadcaster,
    handler: Arc<dyn ControlHandler>,
    status: Arc<dyn StatusProvider>,
    metrics: Option<RoverMetrics>,
}

impl ServerBuilder {
    pub fn new(
        network: NetworkConfig,
        storage: StorageVolume,
        broadcaster: FrameBroadcaster,
        handler: Arc<dyn ControlHandler>,
        status: Arc<dyn StatusProvider>,
    ) -> Self {
        Self {
            network,
            storage,
            broadcaster,
            handler,
            status,
            metrics: None,
        }
    }

    /// Expose the metrics registry at `/metrics`.
    pub fn with_metrics(mut self, metrics: RoverMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn router(&self, state: Arc<ServerState>) -> Router {
        Router::new()
            .route("/", get(http::get_index))
            .route(
                "/upload",
                post(http::post_upload).layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)),
            )
            .route("/download", get(http::get_download))
            .route("/api/status", get(http::get_status))
            .route("/metrics", get(http::get_metrics))
            .route(&self.network.websocket_path, get(websocket::upgrade_handler))
            .fallback_service(ServeDir::new(self.storage.root()))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the listener (honouring the retry policy) and start serving.
    pub async fn spawn(self) -> Result<ServerHandle> {
        let listener = bind_with_retry(self.network.listen, &self.network.bind_retry)
            .await
            .with_context(|| format!("unable to bind {}", self.network.listen))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read bound listener address")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(ServerState {
            broadcaster: self.broadcaster.clone(),
            handler: self.handler.clone(),
            status: self.status.clone(),
            storage: self.storage.clone(),
            metrics: self.metrics.clone(),
            max_frame_bytes: self.network.max_frame_bytes,
            shutdown: shutdown_rx.clone(),
            next_client: AtomicU64::new(1),
        });
        let router = self.router(state);
        info!(
            address = %local_addr,
            websocket = %self.network.websocket_path,
            "rover server listening"
        );

        let mut serve_shutdown = shutdown_rx;
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = serve_shutdown.changed().await;
            });
            if let Err(err) = server.await {
                warn!(error = %err, "rover server exited with error");
            }
        });

        Ok(ServerHandle {
            address: local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Handle for the running server.
pub struct ServerHandle {
    address: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Close every client and stop accepting connections.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task.await.map_err(|err| anyhow::anyhow!(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ProducerStatus, StatusSnapshot};
    use futures_util::{SinkExt, StreamExt};
    use parking_lot::Mutex;
    use tempfile::TempDir;
    use tokio::time::{sleep, timeout, Duration};
    use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};

    #[derive(Default)]
    struct EchoHandler {
        broadcaster: Mutex<Option<FrameBroadcaster>>,
        events: Mutex<Vec<String>>,
    }

    impl ControlHandler for EchoHandler {
        fn on_connect(&self, client: ClientId) {
            self.events.lock().push(format!("connect:{client}"));
        }

        fn on_disconnect(&self, client: ClientId) {
            self.events.lock().push(format!("disconnect:{client}"));
        }

        fn on_text(&self, client: ClientId, text: &str) {
            self.events.lock().push(format!("text:{client}:{text}"));
            if let Some(broadcaster) = self.broadcaster.lock().as_ref() {
                broadcaster.send(text.to_owned());
            }
        }
    }

    struct FixedStatus;

    impl StatusProvider for FixedStatus {
        fn snapshot(&self) -> StatusSnapshot {
            StatusSnapshot {
                version: "3.0.7".into(),
                mode: "base".into(),
                units: "meters".into(),
                connected_clients: 0,
                active_client: None,
                producers: ProducerStatus {
                    position: true,
                    power: false,
                },
                indicator: "yellow".into(),
                degraded: vec![],
                health: None,
            }
        }
    }

    async fn spawn_server() -> (TempDir, Arc<EchoHandler>, ServerHandle) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>rover</h1>").unwrap();
        std::fs::write(dir.path().join("menu.html"), "menu").unwrap();
        let storage = StorageVolume::open(dir.path(), "index.html").unwrap();

        let broadcaster = FrameBroadcaster::new(16);
        let handler = Arc::new(EchoHandler::default());
        *handler.broadcaster.lock() = Some(broadcaster.clone());

        let network = NetworkConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            ..NetworkConfig::default()
        };
        let handle = ServerBuilder::new(
            network,
            storage,
            broadcaster,
            handler.clone(),
            Arc::new(FixedStatus),
        )
        .with_metrics(RoverMetrics::unregistered().unwrap())
        .spawn()
        .await
        .unwrap();
        (dir, handler, handle)
    }

    #[tokio::test]
    async fn websocket_frames_reach_handler_and_fan_out() {
        let (_dir, handler, handle) = spawn_server().await;
        let url = format!("ws://{}/ghostRover", handle.local_addr());

        let (mut first, _) = connect_async(&url).await.unwrap();
        let (mut second, _) = connect_async(&url).await.unwrap();
        sleep(Duration::from_millis(50)).await;

        first
            .send(WsMessage::Text("{\"echo\":\"hi\"}".into()))
            .await
            .unwrap();

        for socket in [&mut first, &mut second] {
            let received = timeout(Duration::from_secs(2), socket.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            assert_eq!(received, WsMessage::Text("{\"echo\":\"hi\"}".into()));
        }

        first.close(None).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        let events = handler.events.lock().clone();
        assert!(events.contains(&"connect:1".to_owned()));
        assert!(events.contains(&"connect:2".to_owned()));
        assert!(events.iter().any(|e| e.starts_with("text:")));
        assert!(events.iter().any(|e| e.starts_with("disconnect:")));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn file_routes_follow_status_contract() {
        let (dir, _handler, handle) = spawn_server().await;
        let base = format!("http://{}", handle.local_addr());
        let client = reqwest::Client::new();

        let index = client.get(format!("{base}/")).send().await.unwrap();
        assert_eq!(index.status(), 200);
        assert_eq!(index.text().await.unwrap(), "<h1>rover</h1>");

        let missing_param = client.get(format!("{base}/download")).send().await.unwrap();
        assert_eq!(missing_param.status(), 400);

        let absent = client
            .get(format!("{base}/download?file=nothing.bin"))
            .send()
            .await
            .unwrap();
        assert_eq!(absent.status(), 404);

        let traversal = client
            .get(format!("{base}/download?file=../secret"))
            .send()
            .await
            .unwrap();
        assert_eq!(traversal.status(), 400);

        let form = reqwest::multipart::Form::new().part(
            "upload",
            reqwest::multipart::Part::bytes(b"lat,lon\n".to_vec()).file_name("track.csv"),
        );
        let upload = client
            .post(format!("{base}/upload"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(upload.status(), 200);
        assert_eq!(upload.text().await.unwrap(), http::UPLOAD_COMPLETE);
        assert!(dir.path().join("track.csv").is_file());

        let download = client
            .get(format!("{base}/download?file=/track.csv"))
            .send()
            .await
            .unwrap();
        assert_eq!(download.status(), 200);
        assert!(download
            .headers()
            .get("content-disposition")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("track.csv"));
        assert_eq!(download.bytes().await.unwrap().as_ref(), b"lat,lon\n");

        let static_file = client.get(format!("{base}/menu.html")).send().await.unwrap();
        assert_eq!(static_file.text().await.unwrap(), "menu");

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn large_downloads_arrive_intact_across_chunks() {
        let (dir, _handler, handle) = spawn_server().await;
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(dir.path().join("survey.bin"), &payload).unwrap();

        let download = reqwest::get(format!(
            "http://{}/download?file=survey.bin",
            handle.local_addr()
        ))
        .await
        .unwrap();
        assert_eq!(download.status(), 200);
        assert_eq!(download.bytes().await.unwrap().as_ref(), payload.as_slice());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn status_and_metrics_are_served() {
        let (_dir, _handler, handle) = spawn_server().await;
        let base = format!("http://{}", handle.local_addr());

        let status: StatusSnapshot = reqwest::get(format!("{base}/api/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status.version, "3.0.7");
        assert!(status.producers.position);

        let metrics = reqwest::get(format!("{base}/metrics"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(metrics.contains("gr_connected_clients"));

        handle.shutdown().await.unwrap();
    }
}
