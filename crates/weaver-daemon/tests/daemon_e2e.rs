//! End-to-end daemon smoke tests: real vault directory, real watcher,
//! full component wiring.

use std::time::Duration;

use tempfile::TempDir;

use weaver_daemon::Daemon;
use weaver_observe::HealthStatus;

fn test_config(vault: &std::path::Path) -> weaver_config::WeaverConfig {
    let mut config = weaver_config::WeaverConfig::default();
    config.vault.path = vault.to_path_buf();
    config.vault.watcher.debounce_ms = 80;
    // No inspection server in tests; ports collide across parallel runs.
    config.workflows.http_addr = String::new();
    config
}

async fn cached_note_count(daemon: &Daemon) -> i64 {
    daemon
        .health()
        .await
        .1
        .iter()
        .find(|r| r.component == "cache")
        .and_then(|r| r.details["note_count"].as_i64())
        .unwrap_or(-1)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn startup_indexes_existing_notes() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("concepts")).unwrap();
    std::fs::write(dir.path().join("concepts/graph.md"), "Graph theory").unwrap();

    let daemon = Daemon::start(test_config(dir.path())).await.unwrap();

    let (status, reports) = daemon.health().await;
    assert_eq!(status, HealthStatus::Healthy);
    let cache_report = reports.iter().find(|r| r.component == "cache").unwrap();
    assert_eq!(cache_report.details["note_count"], 1);

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn live_note_creation_reaches_the_cache() {
    let dir = TempDir::new().unwrap();
    let daemon = Daemon::start(test_config(dir.path())).await.unwrap();

    // Short body: stays under the auto-tag threshold, so no LLM traffic.
    tokio::fs::write(dir.path().join("inbox.md"), "quick note")
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut indexed = false;
    while tokio::time::Instant::now() < deadline {
        if cached_note_count(&daemon).await == 1 {
            indexed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(indexed, "live event should reach the cache");

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_state_restarts_cleanly() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("persist.md"), "kept across restarts").unwrap();

    let daemon = Daemon::start(test_config(dir.path())).await.unwrap();
    daemon.shutdown().await;

    // Second start reuses the persisted cache; no events, no rebuild.
    let daemon = Daemon::start(test_config(dir.path())).await.unwrap();
    let (_, reports) = daemon.health().await;
    let cache_report = reports.iter().find(|r| r.component == "cache").unwrap();
    assert_eq!(cache_report.details["note_count"], 1);
    daemon.shutdown().await;
}
