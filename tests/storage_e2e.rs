//! ---
//! gr_section: "05-testing"
//! gr_subsection: "integration"
//! gr_type: "test"
//! gr_scope: "code"
//! gr_description: "End-to-end upload, download and page serving over HTTP."
//! gr_version: "v0.1.0"
//! gr_owner: "tbd"
//! ---
use gr_common::config::AppConfig;
use gr_common::metrics::{new_registry, RoverMetrics};
use gr_core::RoverRuntime;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;

fn config_for(storage: &tempfile::TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.network.listen = "127.0.0.1:0".parse().unwrap();
    config.storage.root = storage.path().to_path_buf();
    config.telemetry.start_enabled = false;
    config
}

#[tokio::test]
async fn upload_then_download_round_trip() {
    let storage = tempfile::tempdir().unwrap();
    std::fs::write(storage.path().join("index.html"), "<html>rover</html>").unwrap();
    let handle = RoverRuntime::new(config_for(&storage), RoverMetrics::unregistered().unwrap())
        .start()
        .await
        .unwrap();
    let base = format!("http://{}", handle.local_addr());
    let client = reqwest::Client::new();

    let index = client.get(format!("{base}/")).send().await.unwrap();
    assert_eq!(index.status(), StatusCode::OK);
    assert_eq!(index.text().await.unwrap(), "<html>rover</html>");

    let form = Form::new().part(
        "file",
        Part::bytes(b"lat,lon\n35.5,-78.7\n".to_vec()).file_name("track.csv"),
    );
    let upload = client
        .post(format!("{base}/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(upload.status(), StatusCode::OK);
    assert_eq!(
        upload.text().await.unwrap(),
        "Upload complete. File saved to storage."
    );
    assert!(storage.path().join("track.csv").exists());

    let download = client
        .get(format!("{base}/download?file=track.csv"))
        .send()
        .await
        .unwrap();
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(download.bytes().await.unwrap().as_ref(), b"lat,lon\n35.5,-78.7\n");

    let missing = client
        .get(format!("{base}/download?file=nope.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let no_param = client.get(format!("{base}/download")).send().await.unwrap();
    assert_eq!(no_param.status(), StatusCode::BAD_REQUEST);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn status_and_metrics_endpoints_report_runtime() {
    let storage = tempfile::tempdir().unwrap();
    std::fs::write(storage.path().join("index.html"), "<html></html>").unwrap();
    let metrics = RoverMetrics::new(new_registry()).unwrap();
    let handle = RoverRuntime::new(config_for(&storage), metrics)
        .start()
        .await
        .unwrap();
    let base = format!("http://{}", handle.local_addr());

    let status: serde_json::Value = reqwest::get(format!("{base}/api/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["mode"], "base");
    assert_eq!(status["connected_clients"], 0);
    assert_eq!(status["producers"]["position"], false);

    let body = reqwest::get(format!("{base}/metrics"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("gr_runtime_starts_total 1"));

    handle.shutdown().await.unwrap();
}
