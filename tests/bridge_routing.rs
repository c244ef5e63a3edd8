//! End-to-end scenarios: a bridge over an in-memory extension stream,
//! backends doubled by Unix-socket pong servers.

#![cfg(unix)]

use claude_bridge::bridge::{Bridge, BridgeEvent};
use claude_bridge::config::{ConfigManager, RoutingConfig, TargetChoice};
use claude_bridge::host::Host;
use claude_bridge::protocol::{Frame, FrameBuffer};
use claude_bridge::target::Target;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::{read_frame, test_config, write_frame, FakeProbe, PongServer};

struct Harness {
    bridge: Arc<Bridge>,
    events: tokio::sync::mpsc::Receiver<BridgeEvent>,
    config: Arc<ConfigManager>,
    ext_reader: tokio::io::ReadHalf<tokio::io::DuplexStream>,
    ext_writer: tokio::io::WriteHalf<tokio::io::DuplexStream>,
    ext_buffer: FrameBuffer,
    _dir: tempfile::TempDir,
}

impl Harness {
    async fn start(
        dir: tempfile::TempDir,
        config: RoutingConfig,
        probe: Arc<FakeProbe>,
    ) -> Harness {
        let manager = Arc::new(ConfigManager::new(Some(dir.path().join("config.json"))));
        manager.save(config).await.expect("save config");

        let (host_side, ext_side) = tokio::io::duplex(256 * 1024);
        let (host_reader, host_writer) = tokio::io::split(host_side);
        let (ext_reader, ext_writer) = tokio::io::split(ext_side);

        let (host, host_events) = Host::new(host_reader, host_writer);
        let (bridge, events) = Bridge::with_probe(host, host_events, Arc::clone(&manager), probe);
        bridge.start().await.expect("bridge starts");

        Harness {
            bridge,
            events,
            config: manager,
            ext_reader,
            ext_writer,
            ext_buffer: FrameBuffer::new(),
            _dir: dir,
        }
    }

    async fn send_from_extension(&mut self, frame: &Frame) {
        write_frame(&mut self.ext_writer, frame).await;
    }

    async fn recv_at_extension(&mut self) -> Frame {
        read_frame(&mut self.ext_reader, &mut self.ext_buffer).await
    }

    /// Wait until an error event with this code arrives, skipping others.
    async fn expect_error_code(&mut self, code: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = self.events.recv().await {
                if let BridgeEvent::Error(err) = event {
                    if err.code() == code {
                        return;
                    }
                }
            }
            panic!("event stream ended before error {code}");
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for error {code}"))
    }

    /// Poll the status until the current target matches.
    async fn wait_for_target(&self, target: Target) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if self.bridge.status().current_target == Some(target) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("never switched to {target}"))
    }
}

fn socket_paths(dir: &tempfile::TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
    (dir.path().join("desktop.sock"), dir.path().join("cli.sock"))
}

fn cfg(desktop: &Path, cli: &Path) -> RoutingConfig {
    test_config(desktop.to_str().unwrap(), cli.to_str().unwrap())
}

#[tokio::test]
async fn ping_pong_roundtrip_counts_both_directions() {
    let dir = tempfile::TempDir::new().unwrap();
    let (desktop_sock, cli_sock) = socket_paths(&dir);
    let _server = PongServer::spawn(&cli_sock);

    let mut harness = Harness::start(
        dir,
        cfg(&desktop_sock, &cli_sock),
        FakeProbe::new(false, true),
    )
    .await;

    assert_eq!(harness.bridge.status().current_target, Some(Target::Cli));

    let ping = Frame::new("ping").with_id("r1").with_payload(json!({"n": 1}));
    harness.send_from_extension(&ping).await;

    let reply = harness.recv_at_extension().await;
    assert_eq!(reply.kind, "pong");
    assert_eq!(reply.id.as_deref(), Some("r1"));

    // One increment per direction. The reply count lands moments after the
    // frame reaches the wire, so give the bridge task a beat.
    tokio::time::timeout(Duration::from_secs(2), async {
        while harness.bridge.status().messages_forwarded < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("both directions counted");

    let status = harness.bridge.status();
    assert!(status.running);
    assert_eq!(status.messages_forwarded, 2);
    assert!(status.last_activity_ms.is_some());

    harness.bridge.stop().await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = harness.events.recv().await {
            if matches!(event, BridgeEvent::Stopped) {
                return;
            }
        }
        panic!("no Stopped event");
    })
    .await
    .expect("stops in time");
}

#[tokio::test]
async fn frames_without_an_id_get_one_assigned_before_forwarding() {
    let dir = tempfile::TempDir::new().unwrap();
    let (desktop_sock, cli_sock) = socket_paths(&dir);
    let _server = PongServer::spawn(&cli_sock);

    let mut harness = Harness::start(
        dir,
        cfg(&desktop_sock, &cli_sock),
        FakeProbe::new(false, true),
    )
    .await;

    harness.send_from_extension(&Frame::new("ping")).await;

    // The pong echoes whatever id the bridge tagged the request with.
    let reply = harness.recv_at_extension().await;
    let id = reply.id.expect("bridge assigned an id");
    assert!(id.starts_with("req-"));

    harness.bridge.stop().await;
}

#[tokio::test]
async fn explicit_unreachable_target_starts_on_fallback() {
    let dir = tempfile::TempDir::new().unwrap();
    let (desktop_sock, cli_sock) = socket_paths(&dir);
    let _server = PongServer::spawn(&cli_sock);

    let mut config = cfg(&desktop_sock, &cli_sock);
    config.target = TargetChoice::Desktop;

    // Desktop has no listener; fallback order reaches the CLI.
    let harness = Harness::start(dir, config, FakeProbe::new(true, true)).await;
    assert_eq!(harness.bridge.status().current_target, Some(Target::Cli));

    harness.bridge.stop().await;
}

#[tokio::test]
async fn reconnect_exhaustion_reports_once_and_drops_frames_loudly() {
    let dir = tempfile::TempDir::new().unwrap();
    let (desktop_sock, cli_sock) = socket_paths(&dir);
    let server = PongServer::spawn(&cli_sock);

    let mut harness = Harness::start(
        dir,
        cfg(&desktop_sock, &cli_sock),
        FakeProbe::new(false, true),
    )
    .await;

    // Confirm the pipeline first.
    harness
        .send_from_extension(&Frame::new("ping").with_id("r1"))
        .await;
    harness.recv_at_extension().await;

    // Backend dies; the stale socket file stays behind. Every reconnect
    // attempt re-detects and finds nothing connectable.
    server.shutdown();

    // 3 attempts at 30/60/90ms plus detection time; collect events long
    // enough to catch a duplicate ReconnectFailed if one existed.
    let mut reconnect_failures = 0;
    let window = tokio::time::sleep(Duration::from_millis(1500));
    tokio::pin!(window);
    loop {
        tokio::select! {
            _ = &mut window => break,
            event = harness.events.recv() => {
                if let Some(BridgeEvent::Error(err)) = event {
                    if err.code() == "R030" {
                        reconnect_failures += 1;
                    }
                }
            }
        }
    }
    assert_eq!(reconnect_failures, 1, "ReconnectFailed must fire exactly once");
    assert_eq!(harness.bridge.status().current_target, None);

    // A frame arriving with no connection is dropped with a notification,
    // not queued and not silently discarded.
    harness
        .send_from_extension(&Frame::new("ping").with_id("r2"))
        .await;
    harness.expect_error_code("I002").await;
    assert_eq!(harness.bridge.status().messages_forwarded, 2);

    harness.bridge.stop().await;
}

#[tokio::test]
async fn dropped_backend_switches_to_the_other_target() {
    let dir = tempfile::TempDir::new().unwrap();
    let (desktop_sock, cli_sock) = socket_paths(&dir);
    let _desktop_server = PongServer::spawn(&desktop_sock);
    let cli_server = PongServer::spawn(&cli_sock);

    let mut harness = Harness::start(
        dir,
        cfg(&desktop_sock, &cli_sock),
        FakeProbe::new(true, true),
    )
    .await;

    // Auto with order [cli, desktop] lands on the CLI first.
    assert_eq!(harness.bridge.status().current_target, Some(Target::Cli));

    // CLI dies; recovery re-resolves and comes back on the desktop.
    cli_server.shutdown();
    harness.wait_for_target(Target::Desktop).await;

    harness
        .send_from_extension(&Frame::new("ping").with_id("after-switch"))
        .await;
    let reply = harness.recv_at_extension().await;
    assert_eq!(reply.id.as_deref(), Some("after-switch"));

    harness.bridge.stop().await;
}

#[tokio::test]
async fn config_change_switches_targets_without_a_drop() {
    let dir = tempfile::TempDir::new().unwrap();
    let (desktop_sock, cli_sock) = socket_paths(&dir);
    let _desktop_server = PongServer::spawn(&desktop_sock);
    let _cli_server = PongServer::spawn(&cli_sock);

    let mut harness = Harness::start(
        dir,
        cfg(&desktop_sock, &cli_sock),
        FakeProbe::new(true, true),
    )
    .await;
    assert_eq!(harness.bridge.status().current_target, Some(Target::Cli));

    // Operator pins the desktop explicitly; the router notices the config
    // change and the bridge applies the switch with no connection drop
    // in between.
    let mut pinned = (*harness.config.current()).clone();
    pinned.target = TargetChoice::Desktop;
    harness.config.save(pinned).await.expect("save config");

    harness.wait_for_target(Target::Desktop).await;

    harness
        .send_from_extension(&Frame::new("ping").with_id("pinned"))
        .await;
    let reply = harness.recv_at_extension().await;
    assert_eq!(reply.id.as_deref(), Some("pinned"));

    harness.bridge.stop().await;
}

#[tokio::test]
async fn tracked_request_resolves_through_the_bridge() {
    let dir = tempfile::TempDir::new().unwrap();
    let (desktop_sock, cli_sock) = socket_paths(&dir);
    let _server = PongServer::spawn(&cli_sock);

    let harness = Harness::start(
        dir,
        cfg(&desktop_sock, &cli_sock),
        FakeProbe::new(false, true),
    )
    .await;

    let reply = harness
        .bridge
        .request(Frame::new("ping").with_id("tracked"), Duration::from_secs(5))
        .await
        .expect("tracked reply");
    assert_eq!(reply.kind, "pong");
    assert_eq!(reply.id.as_deref(), Some("tracked"));
    assert!(harness.bridge.tracker().is_empty());

    harness.bridge.stop().await;
}
