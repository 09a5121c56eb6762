//! Integration tests for background pattern watches driven through the
//! registry.

mod common;

use std::time::Duration;

use common::{quiet_config, MockOpener};
use serial_supervisor::device::DeviceError;
use serial_supervisor::registry::PortRegistry;
use serial_supervisor::watch::{WatchConfig, WatchError, WatchStatus, DEFAULT_BUFFER_LINES};

fn watch(port: &str, patterns: &[&str], timeout: Duration) -> WatchConfig {
    WatchConfig {
        port: port.to_string(),
        patterns: patterns.iter().map(ToString::to_string).collect(),
        timeout,
        buffer_lines: DEFAULT_BUFFER_LINES,
    }
}

/// Test that a watch completes on the first matching line and captures
/// the output leading up to it.
#[tokio::test(start_paused = true)]
async fn watch_completes_on_match() {
    let opener = MockOpener::new();
    let script = opener.push_device("COM1");
    let registry = PortRegistry::new(opener, quiet_config());
    registry.connect("COM1", None).await.expect("connect failed");

    let id = registry
        .start_watch(watch("COM1", &["ERROR"], Duration::from_secs(60)))
        .await
        .expect("start_watch failed");

    script.send_line("booting");
    script.send_line("ERROR: flash failed");
    tokio::time::sleep(Duration::from_millis(200)).await;

    let snap = registry.check_watch(id).expect("check failed");
    assert_eq!(snap.status, WatchStatus::Complete);
    assert_eq!(snap.matched_pattern.as_deref(), Some("ERROR"));
    assert!(snap.output.contains(&"ERROR: flash failed".to_string()));
    assert!(snap.output.contains(&"booting".to_string()));
}

/// Test that a watch with no match times out at its deadline.
#[tokio::test(start_paused = true)]
async fn watch_times_out() {
    let opener = MockOpener::new();
    let _script = opener.push_device("COM1");
    let registry = PortRegistry::new(opener, quiet_config());
    registry.connect("COM1", None).await.expect("connect failed");

    let id = registry
        .start_watch(watch("COM1", &["never"], Duration::from_millis(100)))
        .await
        .expect("start_watch failed");

    tokio::time::sleep(Duration::from_millis(300)).await;

    let snap = registry.check_watch(id).expect("check failed");
    assert_eq!(snap.status, WatchStatus::Timeout);
}

/// Test that starting a watch on an unconnected port connects it first.
#[tokio::test(start_paused = true)]
async fn watch_auto_connects_port() {
    let opener = MockOpener::new();
    let script = opener.push_device("COM9");
    let registry = PortRegistry::new(opener, quiet_config());

    let id = registry
        .start_watch(watch("COM9", &["READY"], Duration::from_secs(60)))
        .await
        .expect("start_watch failed");
    assert!(registry.is_connected("COM9").await);

    script.send_line("READY");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        registry.check_watch(id).expect("check failed").status,
        WatchStatus::Complete
    );
}

/// Test that an auto-connect failure surfaces through the watch API.
#[tokio::test(start_paused = true)]
async fn watch_auto_connect_failure() {
    let opener = MockOpener::new();
    opener.push_failure("COM9", DeviceError::Busy("COM9".to_string()));
    let registry = PortRegistry::new(opener, quiet_config());

    assert!(matches!(
        registry
            .start_watch(watch("COM9", &["x"], Duration::from_secs(1)))
            .await,
        Err(WatchError::Connection(_))
    ));
}

/// Test that an invalid pattern is rejected before any side effect.
#[tokio::test(start_paused = true)]
async fn invalid_pattern_rejected_before_connect() {
    let opener = MockOpener::new();
    let _script = opener.push_device("COM9");
    let registry = PortRegistry::new(opener, quiet_config());

    assert!(matches!(
        registry
            .start_watch(watch("COM9", &["[unclosed"], Duration::from_secs(1)))
            .await,
        Err(WatchError::InvalidPattern { .. })
    ));
    assert!(!registry.is_connected("COM9").await);
}

/// Test cancel semantics: once true, then false, unknown ids false.
#[tokio::test(start_paused = true)]
async fn cancel_watch_semantics() {
    let opener = MockOpener::new();
    let _script = opener.push_device("COM1");
    let registry = PortRegistry::new(opener, quiet_config());
    registry.connect("COM1", None).await.expect("connect failed");

    let id = registry
        .start_watch(watch("COM1", &["never"], Duration::from_secs(60)))
        .await
        .expect("start_watch failed");

    assert!(registry.cancel_watch(id));
    assert!(!registry.cancel_watch(id));
    assert!(!registry.cancel_watch(uuid::Uuid::new_v4()));
    assert_eq!(
        registry.check_watch(id).expect("check failed").status,
        WatchStatus::Cancelled
    );
}

/// Test that disconnecting a port fails its running watches, after the
/// disconnect marker has been delivered to them.
#[tokio::test(start_paused = true)]
async fn disconnect_fails_running_watches() {
    let opener = MockOpener::new();
    let _script = opener.push_device("COM1");
    let registry = PortRegistry::new(opener, quiet_config());
    registry.connect("COM1", None).await.expect("connect failed");

    let id = registry
        .start_watch(watch("COM1", &["never"], Duration::from_secs(60)))
        .await
        .expect("start_watch failed");

    registry.disconnect("COM1").await.expect("disconnect failed");

    let snap = registry.check_watch(id).expect("check failed");
    assert_eq!(snap.status, WatchStatus::Error);
    assert!(snap
        .output
        .contains(&"=== DISCONNECTED BY USER ===".to_string()));
}

/// Test that a watch can match on a connection lifecycle marker.
#[tokio::test(start_paused = true)]
async fn watch_matches_loss_marker() {
    let opener = MockOpener::new();
    let script = opener.push_device("COM1");
    let registry = PortRegistry::new(opener, quiet_config());
    registry.connect("COM1", None).await.expect("connect failed");

    let id = registry
        .start_watch(watch("COM1", &["CONNECTION LOST"], Duration::from_secs(60)))
        .await
        .expect("start_watch failed");

    script.fail(DeviceError::Disconnected("COM1".to_string()));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(
        registry.check_watch(id).expect("check failed").status,
        WatchStatus::Complete
    );
}
