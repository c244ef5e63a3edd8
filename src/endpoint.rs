//! Backend endpoint resolution.
//!
//! Each target is reachable through a platform-specific local channel: a
//! named pipe on Windows, a Unix domain socket elsewhere. Alternatively the
//! backend's own native-messaging executable can be spawned and driven over
//! its stdio. This module resolves the channel identifier / executable path
//! per target; the connector treats the result as an opaque string.

use crate::config::RoutingConfig;
use crate::target::Target;
use std::path::PathBuf;

/// How to reach one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Connect to a named pipe (Windows) or Unix domain socket path.
    Ipc(String),
    /// Spawn this executable and speak the protocol over its stdio.
    Process(PathBuf),
}

/// Default IPC channel identifier for a target on this platform.
pub fn default_ipc_path(target: Target) -> String {
    #[cfg(windows)]
    {
        match target {
            Target::Desktop => r"\\.\pipe\anthropic-claude-desktop".to_string(),
            Target::Cli => r"\\.\pipe\anthropic-claude-code".to_string(),
        }
    }
    #[cfg(not(windows))]
    {
        match target {
            Target::Desktop => "/tmp/anthropic-claude-desktop.sock".to_string(),
            Target::Cli => "/tmp/anthropic-claude-code.sock".to_string(),
        }
    }
}

/// IPC channel identifier for a target, honoring `advanced.paths` overrides.
pub fn ipc_path(target: Target, config: &RoutingConfig) -> String {
    config
        .advanced
        .paths
        .get(&target)
        .cloned()
        .unwrap_or_else(|| default_ipc_path(target))
}

/// Locate the backend's own native-messaging host executable, if installed.
///
/// Used by the process transport (`advanced.spawn`). Returns `None` when the
/// product's install location cannot be determined on this platform.
pub fn native_host_executable(target: Target) -> Option<PathBuf> {
    #[cfg(windows)]
    {
        match target {
            Target::Desktop => {
                // Versioned install dir: pick the newest app-* folder.
                let claude_dir =
                    PathBuf::from(std::env::var_os("LOCALAPPDATA")?).join("AnthropicClaude");
                let mut app_dirs: Vec<PathBuf> = std::fs::read_dir(&claude_dir)
                    .ok()?
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| {
                        p.file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| n.starts_with("app-"))
                    })
                    .collect();
                app_dirs.sort();
                let newest = app_dirs.pop()?;
                Some(newest.join("resources").join("chrome-native-host.exe"))
            }
            Target::Cli => {
                let home = std::env::var_os("USERPROFILE")?;
                Some(
                    PathBuf::from(home)
                        .join(".claude")
                        .join("chrome")
                        .join("chrome-native-host.bat"),
                )
            }
        }
    }
    #[cfg(target_os = "macos")]
    {
        let home = PathBuf::from(std::env::var_os("HOME")?);
        match target {
            Target::Desktop => Some(
                home.join("Library")
                    .join("Application Support")
                    .join("Claude")
                    .join("ChromeNativeHost")
                    .join("chrome-native-host"),
            ),
            Target::Cli => Some(
                home.join(".claude")
                    .join("chrome")
                    .join("chrome-native-host"),
            ),
        }
    }
    #[cfg(all(not(windows), not(target_os = "macos")))]
    {
        let home = PathBuf::from(std::env::var_os("HOME")?);
        match target {
            Target::Desktop => None,
            Target::Cli => Some(
                home.join(".claude")
                    .join("chrome")
                    .join("chrome-native-host"),
            ),
        }
    }
}

/// Resolve the endpoint for a target under the given config.
pub fn resolve(target: Target, config: &RoutingConfig) -> Endpoint {
    if config.advanced.spawn {
        if let Some(exe) = native_host_executable(target) {
            return Endpoint::Process(exe);
        }
    }
    Endpoint::Ipc(ipc_path(target, config))
}
