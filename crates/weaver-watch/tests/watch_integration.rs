//! End-to-end watcher tests against a real temporary vault.
//!
//! Short debounce windows keep these fast while still exercising the
//! coalescing, filtering, and reconciliation paths.

use std::time::Duration;

use tempfile::TempDir;
use tokio::time::timeout;

use weaver_core::FileEventKind;
use weaver_watch::{start, BaselineEntry, WatchConfig};

fn test_config(root: &std::path::Path) -> WatchConfig {
    WatchConfig::new(root)
        .with_debounce(Duration::from_millis(80))
        .with_ignore(vec![".weaver/".into(), ".obsidian/".into()])
}

/// Collect events for a while, acking each one.
async fn collect_for(
    handle: &weaver_watch::WatcherHandle,
    window: Duration,
) -> Vec<weaver_core::FileEvent> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, handle.next_event()).await {
            Ok(Some(watched)) => {
                events.push(watched.event.clone());
                watched.ack();
            }
            _ => break,
        }
    }
    events
}

#[tokio::test]
async fn live_create_emits_added() {
    let dir = TempDir::new().unwrap();
    let handle = start(test_config(dir.path()), Vec::new()).await.unwrap();

    tokio::fs::write(dir.path().join("note.md"), "# hi").await.unwrap();

    let events = collect_for(&handle, Duration::from_millis(800)).await;
    assert!(
        events
            .iter()
            .any(|e| e.kind == FileEventKind::Added && e.path == "note.md"),
        "expected Added for note.md, got {events:?}"
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn startup_scan_replays_differences() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("new.md"), "fresh").unwrap();
    std::fs::write(dir.path().join("edited.md"), "v2").unwrap();

    let baseline = vec![
        BaselineEntry {
            path: "edited.md".into(),
            content_hash: weaver_core::content_hash(b"v1"),
        },
        BaselineEntry {
            path: "gone.md".into(),
            content_hash: weaver_core::content_hash(b"x"),
        },
    ];

    let handle = start(test_config(dir.path()), baseline).await.unwrap();
    let events = collect_for(&handle, Duration::from_millis(400)).await;

    let find = |path: &str| events.iter().find(|e| e.path == path).map(|e| e.kind);
    assert_eq!(find("new.md"), Some(FileEventKind::Added));
    assert_eq!(find("edited.md"), Some(FileEventKind::Changed));
    assert_eq!(find("gone.md"), Some(FileEventKind::Deleted));

    // Synthetic events arrive in sequence order before anything live.
    let mut sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    let mut sorted = sequences.clone();
    sorted.sort_unstable();
    assert_eq!(sequences, sorted);
    sequences.dedup();
    assert_eq!(sequences.len(), events.len());

    handle.shutdown().await;
}

#[tokio::test]
async fn unchanged_files_replay_nothing() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("same.md"), "stable").unwrap();

    let baseline = vec![BaselineEntry {
        path: "same.md".into(),
        content_hash: weaver_core::content_hash(b"stable"),
    }];

    let handle = start(test_config(dir.path()), baseline).await.unwrap();
    let events = collect_for(&handle, Duration::from_millis(300)).await;
    assert!(events.is_empty(), "expected quiescence, got {events:?}");
    handle.shutdown().await;
}

#[tokio::test]
async fn rapid_modifications_coalesce() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("busy.md");
    std::fs::write(&path, "v0").unwrap();

    let baseline = vec![BaselineEntry {
        path: "busy.md".into(),
        content_hash: weaver_core::content_hash(b"v0"),
    }];
    let handle = start(test_config(dir.path()), baseline).await.unwrap();

    for i in 0..20 {
        tokio::fs::write(&path, format!("v{i}")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let events = collect_for(&handle, Duration::from_millis(900)).await;
    let changes = events
        .iter()
        .filter(|e| e.path == "busy.md")
        .count();
    assert!(changes >= 1, "terminal state must not be lost");
    assert!(changes < 20, "debounce should coalesce, got {changes}");
    handle.shutdown().await;
}

#[tokio::test]
async fn ignored_prefixes_stay_silent() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join(".weaver")).unwrap();

    let handle = start(test_config(dir.path()), Vec::new()).await.unwrap();
    tokio::fs::write(dir.path().join(".weaver/state.md"), "internal")
        .await
        .unwrap();
    tokio::fs::write(dir.path().join("visible.md"), "public")
        .await
        .unwrap();

    let events = collect_for(&handle, Duration::from_millis(800)).await;
    assert!(events.iter().all(|e| !e.path.starts_with(".weaver/")));
    assert!(events.iter().any(|e| e.path == "visible.md"));
    handle.shutdown().await;
}

#[tokio::test]
async fn add_then_delete_never_surfaces_a_live_note() {
    let dir = TempDir::new().unwrap();
    let handle = start(test_config(dir.path()), Vec::new()).await.unwrap();

    let path = dir.path().join("flash.md");
    tokio::fs::write(&path, "here and gone").await.unwrap();
    tokio::fs::remove_file(&path).await.unwrap();

    let events = collect_for(&handle, Duration::from_millis(700)).await;
    let for_path: Vec<_> = events.iter().filter(|e| e.path == "flash.md").collect();
    // Within one debounce window only the terminal state may surface.
    assert!(
        for_path
            .iter()
            .all(|e| e.kind == FileEventKind::Deleted),
        "no Added/Changed may survive, got {for_path:?}"
    );
    assert!(for_path.len() <= 1);
    handle.shutdown().await;
}

#[tokio::test]
async fn unacked_events_are_redelivered() {
    let dir = TempDir::new().unwrap();
    let handle = start(test_config(dir.path()), Vec::new()).await.unwrap();

    tokio::fs::write(dir.path().join("retry.md"), "x").await.unwrap();

    // First delivery is dropped without ack.
    let first = timeout(Duration::from_secs(2), handle.next_event())
        .await
        .expect("timely delivery")
        .expect("event");
    assert_eq!(first.attempt(), 0);
    drop(first);

    // The same logical event comes back with a bumped attempt counter.
    let second = timeout(Duration::from_secs(2), handle.next_event())
        .await
        .expect("timely redelivery")
        .expect("event");
    assert_eq!(second.event.path, "retry.md");
    assert_eq!(second.attempt(), 1);
    second.ack();

    handle.shutdown().await;
}
