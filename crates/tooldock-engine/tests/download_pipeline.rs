//! End-to-end download pipeline scenarios against a mock HTTP server

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tooldock_core::{
    Catalog, DownloadStatus, InstallKey, NoOpSink, ProgressMessage, ProgressSink,
};
use tooldock_engine::{Engine, EngineConfig};
use tooldock_paths::Roots;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Sink that records every message it sees
#[derive(Default)]
struct CollectSink {
    messages: Mutex<Vec<ProgressMessage>>,
}

impl CollectSink {
    fn statuses(&self) -> Vec<DownloadStatus> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|message| message.status)
            .collect()
    }

    fn last(&self) -> Option<ProgressMessage> {
        self.messages.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl ProgressSink for CollectSink {
    async fn emit(&self, message: ProgressMessage) {
        self.messages.lock().unwrap().push(message);
    }
}

fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
        for (name, body) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

fn catalog_json(name: &str, version: &str, urls: &[String], entry: &str) -> Catalog {
    let urls = serde_json::to_string(urls).unwrap();
    Catalog::from_json(&format!(
        r#"{{ "{name}": {{ "{version}": {{
            "downloadUrl": {urls},
            "pathToEntry": "{entry}",
            "isExecutable": false
        }} }} }}"#
    ))
    .unwrap()
}

fn engine_in(dir: &Path, catalog: Catalog) -> Engine {
    let roots = Roots::with_platform(dir.join("writable"), vec![], None, "linux", "amd64");
    Engine::new(EngineConfig {
        catalog,
        roots,
        download_limit_bps: 0,
        sink: Arc::new(NoOpSink),
    })
    .unwrap()
}

#[tokio::test]
async fn test_mirror_failover_and_completed_install() {
    let server = MockServer::start().await;
    let payload = zip_bytes(&[("tool", "#!/bin/sh\necho hi\n")]);

    Mock::given(method("HEAD"))
        .and(path("/bad/tool.zip"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bad/tool.zip"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/good/tool.zip"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Content-Length", payload.len().to_string()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/good/tool.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let urls = vec![
        format!("{}/bad/tool.zip", server.uri()),
        format!("{}/good/tool.zip", server.uri()),
    ];
    let engine = engine_in(dir.path(), catalog_json("demo", "1.0", &urls, "tool"));
    let sink = Arc::new(CollectSink::default());
    let key = InstallKey::new("demo", "1.0");

    engine.install_with_sink(&key, sink.clone()).await.unwrap();

    // Mirror 1 recorded as failed, mirror 2 carried the install home
    let statuses = sink.statuses();
    assert_eq!(statuses.first(), Some(&DownloadStatus::Trying));
    assert!(statuses.contains(&DownloadStatus::Downloading));
    assert!(statuses.contains(&DownloadStatus::Extracting));
    assert_eq!(statuses.last(), Some(&DownloadStatus::Completed));
    let second_trying = sink
        .messages
        .lock()
        .unwrap()
        .iter()
        .find(|message| {
            message.status == DownloadStatus::Trying && message.attempt_index == Some(2)
        })
        .cloned()
        .expect("second mirror attempted");
    assert_eq!(
        second_trying.failed_urls.unwrap(),
        vec![format!("{}/bad/tool.zip", server.uri())]
    );

    // Entry file in place, sidecar zeroed
    assert!(engine.roots().installed("demo", "1.0", "tool"));
    let metadata = engine.metadata_json(&key).unwrap();
    let value: serde_json::Value = serde_json::from_str(&metadata).unwrap();
    assert_eq!(value["downloadProcess"]["status"], "");
    assert_eq!(value["downloadProcess"]["fileSize"], 0);

    // Second install takes the fast path straight to completed
    let fast = Arc::new(CollectSink::default());
    engine.install_with_sink(&key, fast.clone()).await.unwrap();
    assert_eq!(fast.statuses(), vec![DownloadStatus::Completed]);
}

#[tokio::test]
async fn test_all_mirrors_failing_emits_failed() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let urls = vec![
        format!("{}/m1/tool.zip", server.uri()),
        format!("{}/m2/tool.zip", server.uri()),
    ];
    let engine = engine_in(dir.path(), catalog_json("demo", "1.0", &urls, "tool"));
    let sink = Arc::new(CollectSink::default());
    let key = InstallKey::new("demo", "1.0");

    let error = engine.install_with_sink(&key, sink.clone()).await.unwrap_err();
    assert!(!error.is_busy());

    let last = sink.last().unwrap();
    assert_eq!(last.status, DownloadStatus::Failed);
    assert_eq!(last.failed_urls.unwrap().len(), 2);
    assert_eq!(last.all_urls.unwrap().len(), 2);
    assert!(last.error.unwrap().contains("503"));
    assert!(!engine.roots().installed("demo", "1.0", "tool"));

    // The failed status survives in the sidecar for a restart to observe
    let value: serde_json::Value =
        serde_json::from_str(&engine.metadata_json(&key).unwrap()).unwrap();
    assert_eq!(value["downloadProcess"]["status"], "failed");
}

#[tokio::test]
async fn test_resume_issues_range_request() {
    let server = MockServer::start().await;
    let full = b"0123456789abcdef".to_vec();
    let tail = full[6..].to_vec();

    Mock::given(method("HEAD"))
        .and(path("/tool.bin"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Content-Length", full.len().to_string()),
        )
        .mount(&server)
        .await;
    // Only a ranged GET is mounted: a full GET would 404 and fail the test
    Mock::given(method("GET"))
        .and(path("/tool.bin"))
        .and(header("Range", "bytes=6-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Length", tail.len().to_string())
                .set_body_bytes(tail.clone()),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let urls = vec![format!("{}/tool.bin", server.uri())];
    let engine = engine_in(dir.path(), catalog_json("demo", "1.0", &urls, "tool.bin"));
    let key = InstallKey::new("demo", "1.0");

    // A previous paused run left the first 6 bytes behind
    let folder = engine.roots().writable_folder("demo", "1.0");
    std::fs::create_dir_all(&folder).unwrap();
    std::fs::write(folder.join("tool.bin"), &full[..6]).unwrap();

    let sink = Arc::new(CollectSink::default());
    engine.install_with_sink(&key, sink.clone()).await.unwrap();

    let bytes = std::fs::read(folder.join("tool.bin")).unwrap();
    assert_eq!(bytes, full);
    assert_eq!(sink.statuses().last(), Some(&DownloadStatus::Completed));

    // Progress accounting includes the resumed prefix
    let downloading = sink
        .messages
        .lock()
        .unwrap()
        .iter()
        .find(|message| message.status == DownloadStatus::Downloading)
        .cloned()
        .unwrap();
    assert_eq!(downloading.total_bytes, Some(full.len() as u64));
    assert!(downloading.downloaded_bytes.unwrap() > 6);
}

#[tokio::test]
async fn test_oversized_local_file_restarts_from_scratch() {
    let server = MockServer::start().await;
    let full = b"fresh-artifact".to_vec();

    Mock::given(method("HEAD"))
        .and(path("/tool.bin"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Content-Length", full.len().to_string()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tool.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(full.clone()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let urls = vec![format!("{}/tool.bin", server.uri())];
    let engine = engine_in(dir.path(), catalog_json("demo", "1.0", &urls, "tool.bin"));

    let folder = engine.roots().writable_folder("demo", "1.0");
    std::fs::create_dir_all(&folder).unwrap();
    // Larger than the server's copy: must be discarded, not resumed
    std::fs::write(folder.join("tool.bin"), vec![0u8; 1000]).unwrap();

    engine
        .install_with_sink(&InstallKey::new("demo", "1.0"), Arc::new(CollectSink::default()))
        .await
        .unwrap();
    assert_eq!(std::fs::read(folder.join("tool.bin")).unwrap(), full);
}

#[tokio::test]
async fn test_range_not_satisfiable_with_complete_file_skips() {
    let server = MockServer::start().await;
    let full = b"complete-artifact".to_vec();

    // First HEAD reveals no size, so the engine goes for a ranged GET;
    // the second HEAD (issued on 416) confirms the file is complete
    Mock::given(method("HEAD"))
        .and(path("/tool.bin"))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/tool.bin"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Content-Length", full.len().to_string()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tool.bin"))
        .respond_with(ResponseTemplate::new(416))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let urls = vec![format!("{}/tool.bin", server.uri())];
    let engine = engine_in(dir.path(), catalog_json("demo", "1.0", &urls, "tool.bin"));

    let folder = engine.roots().writable_folder("demo", "1.0");
    std::fs::create_dir_all(&folder).unwrap();
    std::fs::write(folder.join("tool.bin"), &full).unwrap();

    let sink = Arc::new(CollectSink::default());
    engine
        .install_with_sink(&InstallKey::new("demo", "1.0"), sink.clone())
        .await
        .unwrap();
    assert_eq!(sink.statuses().last(), Some(&DownloadStatus::Completed));
    assert_eq!(std::fs::read(folder.join("tool.bin")).unwrap(), full);
}

#[tokio::test]
async fn test_pause_stops_transfer_and_persists_state() {
    let server = MockServer::start().await;
    let payload = vec![7u8; 64 * 1024];

    Mock::given(method("HEAD"))
        .and(path("/tool.bin"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Content-Length", payload.len().to_string()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tool.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(payload.clone())
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let urls = vec![format!("{}/tool.bin", server.uri())];
    let engine = engine_in(dir.path(), catalog_json("demo", "1.0", &urls, "tool.bin"));
    let key = InstallKey::new("demo", "1.0");
    let sink = Arc::new(CollectSink::default());

    let install_engine = engine.clone();
    let install_key = key.clone();
    let install_sink = sink.clone();
    let handle = tokio::spawn(async move {
        install_engine
            .install_with_sink(&install_key, install_sink)
            .await
    });

    // Let the install reach the response delay, then pause
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.pause(&key);

    // Pause is success-with-no-progress, not an error
    handle.await.unwrap().unwrap();

    let last = sink.last().unwrap();
    assert_eq!(last.status, DownloadStatus::Paused);

    let value: serde_json::Value =
        serde_json::from_str(&engine.metadata_json(&key).unwrap()).unwrap();
    assert_eq!(value["downloadProcess"]["status"], "paused");
    let temp_len = std::fs::metadata(
        engine.roots().writable_folder("demo", "1.0").join("tool.bin"),
    )
    .map(|meta| meta.len())
    .unwrap_or(0);
    assert!(value["downloadProcess"]["fileSize"].as_u64().unwrap() >= temp_len);
    assert!(!engine.roots().installed("demo", "1.0", "tool.bin"));
}

#[tokio::test]
async fn test_concurrent_installs_one_wins() {
    let server = MockServer::start().await;
    let payload = vec![1u8; 1024];

    Mock::given(method("HEAD"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Content-Length", payload.len().to_string()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(payload)
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let urls = vec![format!("{}/tool.bin", server.uri())];
    let engine = engine_in(dir.path(), catalog_json("demo", "1.0", &urls, "tool.bin"));
    let key = InstallKey::new("demo", "1.0");

    let first_engine = engine.clone();
    let first_key = key.clone();
    let first = tokio::spawn(async move {
        first_engine
            .install_with_sink(&first_key, Arc::new(NoOpSink))
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(engine.active().contains(&key));

    // Second install and a concurrent uninstall both bounce off
    let busy = engine
        .install_with_sink(&key, Arc::new(NoOpSink))
        .await
        .unwrap_err();
    assert!(busy.is_busy());
    let busy = engine.uninstall(&key).await.unwrap_err();
    assert!(busy.is_busy());

    first.await.unwrap().unwrap();
    assert!(!engine.active().contains(&key));
    assert!(engine.roots().installed("demo", "1.0", "tool.bin"));
}

#[tokio::test]
async fn test_uninstall_removes_everything_and_is_idempotent() {
    let server = MockServer::start().await;
    let payload = zip_bytes(&[("tool", "bin")]);

    Mock::given(method("HEAD"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Content-Length", payload.len().to_string()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let urls = vec![format!("{}/tool.zip", server.uri())];
    let engine = engine_in(dir.path(), catalog_json("demo", "1.0", &urls, "tool"));
    let key = InstallKey::new("demo", "1.0");

    engine
        .install_with_sink(&key, Arc::new(NoOpSink))
        .await
        .unwrap();
    assert!(engine.roots().installed("demo", "1.0", "tool"));
    assert!(engine.roots().writable_metadata_path("demo", "1.0").exists());

    engine.uninstall(&key).await.unwrap();
    assert!(!engine.roots().installed("demo", "1.0", "tool"));
    assert!(!engine.roots().writable_folder("demo", "1.0").exists());
    assert!(!engine.roots().writable_metadata_path("demo", "1.0").exists());

    // Second uninstall is a clean no-op
    engine.uninstall(&key).await.unwrap();
}

#[tokio::test]
async fn test_content_disposition_filename_drives_extraction() {
    let server = MockServer::start().await;
    let payload = zip_bytes(&[("tool", "bin")]);

    // The URL has no useful basename; the header names the zip
    Mock::given(method("HEAD"))
        .and(path("/download"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Length", payload.len().to_string())
                .insert_header("Content-Disposition", "attachment; filename=\"tool.zip\""),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/download"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let urls = vec![format!("{}/download", server.uri())];
    let engine = engine_in(dir.path(), catalog_json("demo", "1.0", &urls, "tool"));

    engine
        .install_with_sink(&InstallKey::new("demo", "1.0"), Arc::new(NoOpSink))
        .await
        .unwrap();
    assert!(engine.roots().installed("demo", "1.0", "tool"));
}
