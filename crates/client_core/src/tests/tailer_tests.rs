use std::time::Duration;

use super::*;
use crate::{
    fs::LocalDirectory,
    support::{append, fast_tailer, wait_until, FlakyDirectory, RecordingSink},
};

struct Running {
    sink: Arc<RecordingSink>,
    redraw: Arc<RedrawGate>,
    cancel: CancellationToken,
    task: JoinHandle<u64>,
}

async fn follow(
    path: &std::path::Path,
    directory: Arc<dyn ChannelDirectory>,
    settings: TailerSettings,
) -> Running {
    let sink = RecordingSink::new();
    let redraw = RedrawGate::new();
    let cancel = CancellationToken::new();
    let handle = directory.open(path).await.expect("open channel file");
    let task = Tailer::new(
        ChannelName::from("#chan"),
        path.to_path_buf(),
        directory,
        sink.clone(),
        Arc::clone(&redraw),
        cancel.clone(),
        settings,
    )
    .spawn(handle);
    Running {
        sink,
        redraw,
        cancel,
        task,
    }
}

#[tokio::test]
async fn delivers_appends_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("#chan");
    append(&path, b"first\n");

    let settings = TailerSettings {
        chunk_bytes: 4,
        ..fast_tailer()
    };
    let running = follow(&path, Arc::new(LocalDirectory), settings).await;
    assert!(wait_until(|| running.sink.text() == "first\n").await);

    append(&path, b"second\n");
    append(&path, b"third\n");
    assert!(wait_until(|| running.sink.text() == "first\nsecond\nthird\n").await);
    assert!(running.sink.scrolls() >= 4);

    running.cancel.cancel();
    let delivered = running.task.await.expect("join");
    assert_eq!(delivered, 19);
}

#[tokio::test]
async fn resumes_at_captured_offset_after_read_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("#chan");
    append(&path, b"abc");

    let directory = FlakyDirectory::new();
    let running = follow(&path, directory.clone(), fast_tailer()).await;
    assert!(wait_until(|| running.sink.text() == "abc").await);

    directory.fail_next_read();
    assert!(wait_until(|| directory.opens() == 2).await);

    append(&path, b"def");
    assert!(wait_until(|| running.sink.text() == "abcdef").await);

    // Nothing is replayed once the reopened handle catches up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(running.sink.text(), "abcdef");
    running.cancel.cancel();
}

#[tokio::test]
async fn truncated_file_resumes_at_its_new_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("#chan");
    append(&path, b"hello world");

    let directory = FlakyDirectory::new();
    let running = follow(&path, directory.clone(), fast_tailer()).await;
    assert!(wait_until(|| running.sink.text() == "hello world").await);

    std::fs::write(&path, b"hi").expect("truncate");
    directory.fail_next_read();
    assert!(wait_until(|| directory.opens() == 2).await);

    append(&path, b"!");
    assert!(wait_until(|| running.sink.text() == "hello world!").await);
    assert!(!running.task.is_finished());
    running.cancel.cancel();
}

#[tokio::test]
async fn cancellation_stops_delivery() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("#chan");
    append(&path, b"before\n");

    let running = follow(&path, Arc::new(LocalDirectory), fast_tailer()).await;
    assert!(wait_until(|| running.sink.text() == "before\n").await);

    running.cancel.cancel();
    let delivered = tokio::time::timeout(Duration::from_secs(1), running.task)
        .await
        .expect("tailer should stop promptly")
        .expect("join");
    assert_eq!(delivered, 7);

    append(&path, b"after\n");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(running.sink.text(), "before\n");
}

#[tokio::test]
async fn redraw_requests_coalesce_until_drawn() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("#chan");
    append(&path, b"one\n");

    let running = follow(&path, Arc::new(LocalDirectory), fast_tailer()).await;
    assert!(wait_until(|| running.sink.text() == "one\n").await);

    append(&path, b"two\n");
    assert!(wait_until(|| running.sink.text() == "one\ntwo\n").await);
    assert_eq!(running.sink.redraws(), 1);
    assert!(running.redraw.is_pending());

    running.redraw.complete();
    append(&path, b"three\n");
    assert!(wait_until(|| running.sink.text().ends_with("three\n")).await);
    assert_eq!(running.sink.redraws(), 2);
    running.cancel.cancel();
}
