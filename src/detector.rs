//! Backend liveness and reachability detection.
//!
//! Each target is probed in two stages: a process scan (is the product
//! running at all?) and, only if it is, a real connection attempt against
//! its IPC channel bounded by the health-check timeout. A stale socket file
//! with no listener therefore reports unreachable; existence checks are not
//! good enough. Results are cached for `detection.cacheTtl` and the watch
//! loop re-polls on `detection.interval`.
//!
//! Probe failures are swallowed into a not-running status; detection must
//! never be fatal to the proxy.

use crate::config::ConfigManager;
use crate::endpoint::{self, Endpoint};
use crate::target::Target;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Result of a process scan for one target.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub target: Target,
    pub running: bool,
    pub pid: Option<u32>,
}

/// Per-target health, as seen at `last_checked_ms`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub target: Target,
    pub process_running: bool,
    pub ipc_connectable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    pub last_checked_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Combined health of every target, probed concurrently.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionSnapshot {
    pub desktop: HealthStatus,
    pub cli: HealthStatus,
}

impl DetectionSnapshot {
    pub fn get(&self, target: Target) -> &HealthStatus {
        match target {
            Target::Desktop => &self.desktop,
            Target::Cli => &self.cli,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    status: HealthStatus,
    expires_at: Instant,
}

/// Platform process scan. One capability; implementations are selected once
/// at startup by [`platform_probe`].
pub trait ProcessProbe: Send + Sync {
    fn detect_process(&self, target: Target) -> ProcessInfo;
}

/// The probe for the current platform.
pub fn platform_probe() -> Arc<dyn ProcessProbe> {
    #[cfg(windows)]
    {
        Arc::new(WindowsProbe)
    }
    #[cfg(not(windows))]
    {
        Arc::new(UnixProbe)
    }
}

/// Scan the process table, applying `matcher` to (name, command line, pid).
/// The detector's own process is always excluded so the bridge never counts
/// itself as a running backend.
fn scan_processes(matcher: impl Fn(&str, &str) -> bool) -> Option<u32> {
    use sysinfo::{ProcessesToUpdate, System};

    let own_pid = std::process::id();
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    for (pid, process) in system.processes() {
        if pid.as_u32() == own_pid {
            continue;
        }
        let name = process.name().to_string_lossy();
        let cmdline = process
            .cmd()
            .iter()
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        if matcher(&name, &cmdline) {
            return Some(pid.as_u32());
        }
    }
    None
}

/// Windows rules: match by exact image name; the CLI runs under node, so it
/// additionally needs "claude" on the command line.
#[cfg(windows)]
pub struct WindowsProbe;

#[cfg(windows)]
impl ProcessProbe for WindowsProbe {
    fn detect_process(&self, target: Target) -> ProcessInfo {
        let pid = match target {
            Target::Desktop => scan_processes(|name, _| name.eq_ignore_ascii_case("Claude.exe")),
            Target::Cli => scan_processes(|name, cmdline| {
                name.eq_ignore_ascii_case("node.exe") && cmdline.to_lowercase().contains("claude")
            }),
        };
        ProcessInfo {
            target,
            running: pid.is_some(),
            pid,
        }
    }
}

/// Unix rules: exact process name for the desktop app, command-line
/// substring for the CLI (whose image name is just the node runtime).
#[cfg(not(windows))]
pub struct UnixProbe;

#[cfg(not(windows))]
impl ProcessProbe for UnixProbe {
    fn detect_process(&self, target: Target) -> ProcessInfo {
        let pid = match target {
            Target::Desktop => scan_processes(|name, _| name == "Claude"),
            Target::Cli => scan_processes(|name, cmdline| {
                (name.contains("node") || cmdline.contains("node")) && cmdline.contains("claude")
            }),
        };
        ProcessInfo {
            target,
            running: pid.is_some(),
            pid,
        }
    }
}

/// Cancellation handle for a spawned watch loop. Aborts the loop when
/// stopped or dropped.
#[derive(Debug)]
pub struct WatchHandle {
    handle: JoinHandle<()>,
}

impl WatchHandle {
    pub fn new(handle: JoinHandle<()>) -> Self {
        WatchHandle { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Cached, polling health detector.
pub struct Detector {
    probe: Arc<dyn ProcessProbe>,
    config: Arc<ConfigManager>,
    cache: tokio::sync::Mutex<HashMap<Target, CacheEntry>>,
}

impl Detector {
    pub fn new(probe: Arc<dyn ProcessProbe>, config: Arc<ConfigManager>) -> Arc<Self> {
        Arc::new(Detector {
            probe,
            config,
            cache: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Health of one target. A fresh cache entry is returned verbatim with
    /// zero probing I/O; otherwise the target is probed and the result
    /// cached until `now + detection.cacheTtl`.
    pub async fn detect(&self, target: Target) -> HealthStatus {
        if let Some(entry) = self.cache.lock().await.get(&target) {
            if entry.expires_at > Instant::now() {
                return entry.status.clone();
            }
        }

        let status = self.probe_target(target).await;

        let ttl = self.config.current().cache_ttl();
        self.cache.lock().await.insert(
            target,
            CacheEntry {
                status: status.clone(),
                expires_at: Instant::now() + ttl,
            },
        );

        status
    }

    /// Probe every target concurrently. A sequential scan would multiply
    /// worst-case latency by the number of targets.
    pub async fn detect_all(&self) -> DetectionSnapshot {
        let (desktop, cli) = tokio::join!(self.detect(Target::Desktop), self.detect(Target::Cli));
        DetectionSnapshot { desktop, cli }
    }

    /// Drop all cached entries; the next `detect` re-probes.
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    /// One immediate detection, then a poll every `detection.interval`.
    /// Every cycle's snapshot is delivered, changed or not; consumers diff.
    pub fn watch(self: &Arc<Self>) -> (WatchHandle, mpsc::Receiver<DetectionSnapshot>) {
        let (tx, rx) = mpsc::channel(16);
        let detector = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let snapshot = detector.detect_all().await;
                if tx.send(snapshot).await.is_err() {
                    return;
                }
                // Interval is re-read each cycle so config changes apply
                // without restarting the loop.
                tokio::time::sleep(detector.config.current().detection_interval()).await;
            }
        });
        (WatchHandle::new(handle), rx)
    }

    async fn probe_target(&self, target: Target) -> HealthStatus {
        let config = self.config.current();

        // Process scan walks the whole process table; keep it off the
        // async workers.
        let probe = Arc::clone(&self.probe);
        let info = tokio::task::spawn_blocking(move || probe.detect_process(target))
            .await
            .unwrap_or(ProcessInfo {
                target,
                running: false,
                pid: None,
            });

        let mut status = HealthStatus {
            target,
            process_running: info.running,
            ipc_connectable: false,
            response_time_ms: None,
            last_checked_ms: epoch_ms(),
            error: None,
        };

        if !info.running {
            return status;
        }

        match endpoint::resolve(target, &config) {
            Endpoint::Ipc(path) => {
                // Probe by actually connecting; existence of the pipe/socket
                // file says nothing about a listener being behind it.
                let started = Instant::now();
                match crate::connector::connect_ipc(target, &path, config.health_check_timeout())
                    .await
                {
                    Ok(connection) => {
                        status.ipc_connectable = true;
                        status.response_time_ms = Some(started.elapsed().as_millis() as u64);
                        connection.close();
                    }
                    Err(err) => {
                        status.error = Some(err.to_string());
                    }
                }
            }
            Endpoint::Process(exe) => {
                // Spawn transport: reachable means the executable exists;
                // spawning a process per health check would leave strays.
                if tokio::fs::metadata(&exe).await.is_ok() {
                    status.ipc_connectable = true;
                } else {
                    status.error = Some(format!("native host not found: {}", exe.display()));
                }
            }
        }

        status
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
