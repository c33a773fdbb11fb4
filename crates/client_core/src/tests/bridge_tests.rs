use shared::{error::ErrorClass, protocol::OutboundIntent};

use super::*;
use crate::support::{append, wait_until, RecordingFactory};

fn fast_settings() -> Settings {
    Settings {
        retry_backoff_ms: 10,
        poll_interval_ms: 20,
        shutdown_grace_ms: 500,
        ..Settings::default()
    }
}

async fn stop(bridge: Bridge) {
    bridge.shutdown().fire();
    tokio::time::timeout(Duration::from_secs(3), bridge.wait())
        .await
        .expect("bridge should stop");
}

#[tokio::test]
async fn missing_directory_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = Bridge::start(
        dir.path().join("absent"),
        &fast_settings(),
        RecordingFactory::new(),
    )
    .await;

    let err = result.err().expect("startup should fail");
    assert!(matches!(err, StartupError::Directory { .. }));
    assert_eq!(err.class(), ErrorClass::StartupFatal);
}

#[tokio::test]
async fn directory_without_raw_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    append(&dir.path().join("#rust"), b"");

    let result = Bridge::start(dir.path(), &fast_settings(), RecordingFactory::new()).await;
    assert!(matches!(
        result.err(),
        Some(StartupError::MissingRawChannel { .. })
    ));
}

#[tokio::test]
async fn runs_read_only_without_control() {
    let dir = tempfile::tempdir().expect("tempdir");
    append(&dir.path().join("raw"), b"server notice\n");

    let display = RecordingFactory::new();
    let bridge = Bridge::start(dir.path(), &fast_settings(), display.clone())
        .await
        .expect("start");

    assert!(bridge.control().is_none());
    assert_eq!(*bridge.status().borrow(), LinkStatus::Disconnected);
    assert_eq!(bridge.initial_channel().as_str(), "raw");
    assert_eq!(bridge.dir(), dir.path());
    assert_eq!(display.opened(), vec![("raw".to_string(), false)]);
    assert!(wait_until(|| display.text("raw") == "server notice\n").await);

    stop(bridge).await;
}

#[tokio::test]
async fn submitted_commands_reach_the_control_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    append(&dir.path().join("raw"), b"");
    append(&dir.path().join("#rust"), b"");
    append(&dir.path().join("ctl"), b"");

    let display = RecordingFactory::new();
    let bridge = Bridge::start(dir.path(), &fast_settings(), display.clone())
        .await
        .expect("start");
    assert_eq!(*bridge.status().borrow(), LinkStatus::Connected);

    let emitter = display.emitter("#rust").expect("emitter");
    emitter.submit("/j #new").await.expect("join");
    emitter.submit("hi all").await.expect("message");

    let ctl = dir.path().join("ctl");
    assert!(
        wait_until(|| {
            std::fs::read_to_string(&ctl).unwrap_or_default() == "join #new\nmsg #rust hi all\n"
        })
        .await
    );

    append(&dir.path().join("#new"), b"welcome\n");
    let mut channels = bridge.channels();
    channels
        .wait_for(|set| set.contains_key(&ChannelName::from("#new")))
        .await
        .expect("new channel");
    assert!(wait_until(|| display.text("#new") == "welcome\n").await);

    stop(bridge).await;
}

#[tokio::test]
async fn quit_command_shuts_the_bridge_down() {
    let dir = tempfile::tempdir().expect("tempdir");
    append(&dir.path().join("raw"), b"");
    append(&dir.path().join("ctl"), b"");

    let bridge = Bridge::start(dir.path(), &fast_settings(), RecordingFactory::new())
        .await
        .expect("start");
    let shutdown = bridge.shutdown().clone();
    bridge
        .control()
        .expect("control")
        .send(OutboundIntent::Quit)
        .await
        .expect("quit");

    tokio::time::timeout(Duration::from_secs(3), bridge.wait())
        .await
        .expect("bridge should stop after quit");
    assert!(shutdown.is_fired());
}
