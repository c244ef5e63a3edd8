use claude_bridge::config::{ConfigManager, DetectionConfig};
use claude_bridge::detector::Detector;
use claude_bridge::target::Target;
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::{test_config, FakeProbe};

async fn manager_with(config: claude_bridge::config::RoutingConfig) -> Arc<ConfigManager> {
    // The manager only reads the file in load(); the saved snapshot lives in
    // memory, so the tempdir can go away with this helper.
    let dir = tempfile::TempDir::new().expect("tempdir");
    let manager = Arc::new(ConfigManager::new(Some(dir.path().join("config.json"))));
    manager.save(config).await.expect("save config");
    manager
}

#[tokio::test]
async fn fresh_cache_entry_skips_probing_entirely() {
    let mut config = test_config("/tmp/nowhere-desktop.sock", "/tmp/nowhere-cli.sock");
    config.detection = DetectionConfig {
        interval: 5000,
        cache_ttl: 60_000,
    };
    let probe = FakeProbe::new(false, false);
    let detector = Detector::new(probe.clone(), manager_with(config).await);

    let first = detector.detect(Target::Cli).await;
    assert_eq!(probe.call_count(), 1);
    assert!(!first.process_running);
    assert!(!first.ipc_connectable);

    // Within the TTL: zero probing I/O, the cached status verbatim.
    let second = detector.detect(Target::Cli).await;
    assert_eq!(probe.call_count(), 1);
    assert_eq!(second, first);
}

#[tokio::test]
async fn expired_cache_entry_triggers_a_new_probe() {
    let mut config = test_config("/tmp/nowhere-desktop.sock", "/tmp/nowhere-cli.sock");
    config.detection = DetectionConfig {
        interval: 5000,
        cache_ttl: 50,
    };
    let probe = FakeProbe::new(false, false);
    let detector = Detector::new(probe.clone(), manager_with(config).await);

    detector.detect(Target::Cli).await;
    assert_eq!(probe.call_count(), 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    detector.detect(Target::Cli).await;
    assert_eq!(probe.call_count(), 2);
}

#[tokio::test]
async fn detect_all_probes_each_target_once() {
    let config = test_config("/tmp/nowhere-desktop.sock", "/tmp/nowhere-cli.sock");
    let probe = FakeProbe::new(false, false);
    let detector = Detector::new(probe.clone(), manager_with(config).await);

    let snapshot = detector.detect_all().await;
    assert_eq!(probe.call_count(), 2);
    assert_eq!(snapshot.desktop.target, Target::Desktop);
    assert_eq!(snapshot.cli.target, Target::Cli);
}

#[tokio::test]
async fn clear_cache_forces_reprobe() {
    let mut config = test_config("/tmp/nowhere-desktop.sock", "/tmp/nowhere-cli.sock");
    config.detection.cache_ttl = 60_000;
    let probe = FakeProbe::new(false, false);
    let detector = Detector::new(probe.clone(), manager_with(config).await);

    detector.detect(Target::Desktop).await;
    detector.clear_cache().await;
    detector.detect(Target::Desktop).await;
    assert_eq!(probe.call_count(), 2);
}

#[tokio::test]
async fn watch_delivers_a_snapshot_every_cycle() {
    let mut config = test_config("/tmp/nowhere-desktop.sock", "/tmp/nowhere-cli.sock");
    config.detection = DetectionConfig {
        interval: 30,
        cache_ttl: 5,
    };
    let probe = FakeProbe::new(false, false);
    let detector = Detector::new(probe, manager_with(config).await);

    let (handle, mut rx) = detector.watch();

    // One immediate detection plus at least one poll, unchanged results
    // included — consumers are responsible for diffing.
    let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("first snapshot in time")
        .expect("watch alive");
    let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("second snapshot in time")
        .expect("watch alive");
    assert_eq!(first.cli.ipc_connectable, second.cli.ipc_connectable);

    handle.stop();
}

#[cfg(unix)]
mod unix {
    use super::common::{test_config, FakeProbe, PongServer};
    use super::manager_with;
    use claude_bridge::detector::Detector;
    use claude_bridge::target::Target;

    #[tokio::test]
    async fn probe_connects_for_real_not_just_file_existence() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let cli_sock = dir.path().join("cli.sock");
        let desktop_sock = dir.path().join("desktop.sock");
        let server = PongServer::spawn(&cli_sock);

        let mut config = test_config(
            desktop_sock.to_str().unwrap(),
            cli_sock.to_str().unwrap(),
        );
        config.detection.cache_ttl = 5;
        let probe = FakeProbe::new(false, true);
        let detector = Detector::new(probe, manager_with(config).await);

        let status = detector.detect(Target::Cli).await;
        assert!(status.process_running);
        assert!(status.ipc_connectable);
        assert!(status.response_time_ms.is_some());
        assert!(status.error.is_none());

        // Kill the listener. The socket file is still on disk, but nothing
        // answers — a mere existence check would get this wrong.
        server.shutdown();
        assert!(cli_sock.exists());

        detector.clear_cache().await;
        let status = detector.detect(Target::Cli).await;
        assert!(status.process_running);
        assert!(!status.ipc_connectable);
        assert!(status.error.is_some());
    }

    #[tokio::test]
    async fn probe_skips_connection_attempt_when_process_not_running() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let cli_sock = dir.path().join("cli.sock");
        let desktop_sock = dir.path().join("desktop.sock");
        // A live listener, but the process scan says nothing is running:
        // the probe must not even try to connect.
        let _server = PongServer::spawn(&cli_sock);

        let config = test_config(
            desktop_sock.to_str().unwrap(),
            cli_sock.to_str().unwrap(),
        );
        let probe = FakeProbe::new(false, false);
        let detector = Detector::new(probe, manager_with(config).await);

        let status = detector.detect(Target::Cli).await;
        assert!(!status.process_running);
        assert!(!status.ipc_connectable);
        assert!(status.response_time_ms.is_none());
    }
}
