#![allow(dead_code)]

use claude_bridge::config::{AdvancedConfig, DetectionConfig, RoutingConfig, TimeoutConfig};
use claude_bridge::detector::{ProcessInfo, ProcessProbe};
use claude_bridge::protocol::{self, Frame, FrameBuffer};
use claude_bridge::target::Target;
use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Env guard that restores previous env vars on drop.
pub struct EnvGuard {
    old: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn set(vars: &[(&str, String)]) -> Self {
        let mut old = HashMap::new();
        for (k, v) in vars {
            old.insert((*k).to_string(), env::var(k).ok());
            env::set_var(k, v);
        }
        Self { old }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (k, prev) in self.old.drain() {
            match prev {
                Some(v) => env::set_var(k, v),
                None => env::remove_var(k),
            }
        }
    }
}

/// Create a temp sandbox and point the per-OS base dirs into it, so manifest
/// installs never touch the real profile.
pub fn sandbox_env() -> (tempfile::TempDir, EnvGuard) {
    let td = tempfile::TempDir::new().expect("tempdir");
    let root = td.path().to_path_buf();

    let home = root.join("home");
    let appdata = root.join("appdata_roaming");
    let localappdata = root.join("appdata_local");
    std::fs::create_dir_all(&home).unwrap();
    std::fs::create_dir_all(&appdata).unwrap();
    std::fs::create_dir_all(&localappdata).unwrap();

    let guard = EnvGuard::set(&[
        ("HOME", home.to_string_lossy().to_string()),
        ("APPDATA", appdata.to_string_lossy().to_string()),
        ("LOCALAPPDATA", localappdata.to_string_lossy().to_string()),
    ]);

    (td, guard)
}

/// Process probe with fixed per-target answers and a call counter.
pub struct FakeProbe {
    pub desktop_running: bool,
    pub cli_running: bool,
    pub calls: AtomicUsize,
}

impl FakeProbe {
    pub fn new(desktop_running: bool, cli_running: bool) -> Arc<Self> {
        Arc::new(FakeProbe {
            desktop_running,
            cli_running,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProcessProbe for FakeProbe {
    fn detect_process(&self, target: Target) -> ProcessInfo {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = match target {
            Target::Desktop => self.desktop_running,
            Target::Cli => self.cli_running,
        };
        ProcessInfo {
            target,
            running,
            pid: running.then_some(4242),
        }
    }
}

/// Config tuned for fast tests, with both targets routed at the given
/// socket paths.
pub fn test_config(desktop_path: &str, cli_path: &str) -> RoutingConfig {
    let mut paths = HashMap::new();
    paths.insert(Target::Desktop, desktop_path.to_string());
    paths.insert(Target::Cli, cli_path.to_string());

    RoutingConfig {
        timeouts: TimeoutConfig {
            connection: 1000,
            health_check: 500,
            reconnect: 30,
        },
        detection: DetectionConfig {
            interval: 100,
            cache_ttl: 25,
        },
        advanced: AdvancedConfig {
            paths,
            ..AdvancedConfig::default()
        },
        ..RoutingConfig::default()
    }
}

/// Write one encoded frame to a raw stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) {
    let bytes = protocol::encode(frame).expect("encode");
    writer.write_all(&bytes).await.expect("write frame");
    writer.flush().await.expect("flush frame");
}

/// Read one frame from a raw stream, with a 5s guard.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, buffer: &mut FrameBuffer) -> Frame {
    tokio::time::timeout(Duration::from_secs(5), async {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(item) = buffer.next() {
                return item.expect("well-formed frame");
            }
            let n = reader.read(&mut chunk).await.expect("read frame");
            assert!(n > 0, "stream closed while waiting for a frame");
            buffer.extend(&chunk[..n]);
        }
    })
    .await
    .expect("timed out waiting for a frame")
}

/// Minimal backend double: accepts connections on a Unix socket and answers
/// every frame with a `pong` carrying the same id.
#[cfg(unix)]
pub struct PongServer {
    accept: tokio::task::JoinHandle<()>,
    connections: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

#[cfg(unix)]
impl PongServer {
    pub fn spawn(path: &std::path::Path) -> Self {
        let listener = tokio::net::UnixListener::bind(path).expect("bind test socket");
        let connections: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let tracked = Arc::clone(&connections);

        let accept = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let handle = tokio::spawn(serve_connection(stream));
                        tracked.lock().unwrap().push(handle);
                    }
                    Err(_) => return,
                }
            }
        });

        PongServer {
            accept,
            connections,
        }
    }

    /// Kill the listener and every open connection. The socket file stays
    /// behind — exactly the stale-file situation real products leave.
    pub fn shutdown(&self) {
        self.accept.abort();
        for handle in self.connections.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(unix)]
impl Drop for PongServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(unix)]
async fn serve_connection(stream: tokio::net::UnixStream) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buffer = FrameBuffer::new();
    let mut chunk = [0u8; 4096];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                buffer.extend(&chunk[..n]);
                while let Some(Ok(frame)) = buffer.next() {
                    let mut reply = Frame::new("pong").with_payload(frame.payload.clone());
                    reply.id = frame.id.clone();
                    let bytes = protocol::encode(&reply).expect("encode reply");
                    if writer.write_all(&bytes).await.is_err() {
                        return;
                    }
                    let _ = writer.flush().await;
                }
            }
        }
    }
}
