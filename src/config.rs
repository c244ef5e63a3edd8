//! Bridge configuration: schema, defaults, validation, and the config
//! manager that loads/saves the JSON config file and publishes change
//! notifications.
//!
//! The file lives under the platform config directory
//! (`<config_dir>/claude-bridge/config.json`) with camelCase keys; a partial
//! file is merged over the defaults, and a structurally invalid file is a
//! fatal `R001`; the bridge never guesses defaults mid-operation.

use crate::error::{BridgeError, Result};
use crate::target::Target;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Where to route: an explicit target, or automatic selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetChoice {
    Auto,
    Desktop,
    Cli,
}

impl TargetChoice {
    /// The explicit target, if this is not `auto`.
    pub fn explicit(self) -> Option<Target> {
        match self {
            TargetChoice::Auto => None,
            TargetChoice::Desktop => Some(Target::Desktop),
            TargetChoice::Cli => Some(Target::Cli),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FallbackConfig {
    /// Whether an unreachable explicit target may fall back.
    pub enabled: bool,
    /// Priority order for `auto` selection and fallback scanning.
    pub order: Vec<Target>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        FallbackConfig {
            enabled: true,
            order: vec![Target::Cli, Target::Desktop],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutConfig {
    /// IPC connection timeout (ms).
    pub connection: u64,
    /// Health-check probe timeout (ms).
    pub health_check: u64,
    /// Base reconnection delay (ms); attempt N waits N times this.
    pub reconnect: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            connection: 5000,
            health_check: 2000,
            reconnect: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionConfig {
    /// Polling interval for the detector watch loop (ms).
    pub interval: u64,
    /// How long one detection result stays fresh (ms).
    pub cache_ttl: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            interval: 5000,
            cache_ttl: 3000,
        }
    }
}

/// Power-user settings. All optional.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdvancedConfig {
    /// Per-target IPC path overrides (pipe name / socket path).
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub paths: HashMap<Target, String>,
    /// Reach backends by spawning their native-messaging executable over
    /// stdio instead of connecting to their IPC channel.
    pub spawn: bool,
    /// Extra debug logging.
    pub debug: bool,
}

/// The full routing configuration.
///
/// The core treats a loaded config as an immutable snapshot per resolution
/// cycle; it is re-read (cheaply, via `Arc`) on every `resolve()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingConfig {
    pub target: TargetChoice,
    pub fallback: FallbackConfig,
    pub timeouts: TimeoutConfig,
    pub detection: DetectionConfig,
    pub advanced: AdvancedConfig,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        RoutingConfig {
            target: TargetChoice::Auto,
            fallback: FallbackConfig::default(),
            timeouts: TimeoutConfig::default(),
            detection: DetectionConfig::default(),
            advanced: AdvancedConfig::default(),
        }
    }
}

impl RoutingConfig {
    /// Structural validation beyond what serde already enforces.
    pub fn validate(&self) -> Result<()> {
        if self.fallback.order.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "fallback.order must not be empty".into(),
            ));
        }
        let mut seen = Vec::new();
        for t in &self.fallback.order {
            if seen.contains(t) {
                return Err(BridgeError::InvalidConfig(format!(
                    "fallback.order lists \"{t}\" more than once"
                )));
            }
            seen.push(*t);
        }
        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.connection)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.health_check)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.timeouts.reconnect)
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection.interval)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.detection.cache_ttl)
    }
}

/// Default config file location: `<config_dir>/claude-bridge/config.json`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("claude-bridge")
        .join("config.json")
}

/// Loads, saves and watches the config file.
///
/// Holds the current snapshot in a `watch` channel: readers grab an
/// `Arc<RoutingConfig>` without locking, and the router subscribes to the
/// same channel for change notifications.
pub struct ConfigManager {
    path: PathBuf,
    tx: watch::Sender<Arc<RoutingConfig>>,
}

impl ConfigManager {
    pub fn new(path: Option<PathBuf>) -> Self {
        let (tx, _) = watch::channel(Arc::new(RoutingConfig::default()));
        ConfigManager {
            path: path.unwrap_or_else(default_config_path),
            tx,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current snapshot. Cheap; clones an `Arc`.
    pub fn current(&self) -> Arc<RoutingConfig> {
        self.tx.borrow().clone()
    }

    /// Subscribe to config changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RoutingConfig>> {
        self.tx.subscribe()
    }

    /// Load the config file. A missing file yields the defaults; anything
    /// unreadable or structurally invalid is an `R001` error.
    pub async fn load(&self) -> Result<Arc<RoutingConfig>> {
        let config = match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let parsed: RoutingConfig = serde_json::from_slice(&bytes)
                    .map_err(|e| BridgeError::InvalidConfig(e.to_string()))?;
                parsed.validate()?;
                parsed
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RoutingConfig::default(),
            Err(e) => {
                return Err(BridgeError::InvalidConfig(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };

        let config = Arc::new(config);
        self.tx.send_replace(config.clone());
        Ok(config)
    }

    /// Validate, persist, and publish a new config.
    pub async fn save(&self, config: RoutingConfig) -> Result<()> {
        config.validate()?;

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| BridgeError::InvalidConfig(format!("create config dir: {e}")))?;
        }
        let json = serde_json::to_vec_pretty(&config)
            .map_err(|e| BridgeError::InvalidConfig(e.to_string()))?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| BridgeError::InvalidConfig(format!("write {}: {e}", self.path.display())))?;

        self.tx.send_replace(Arc::new(config));
        Ok(())
    }

    /// Reset to defaults (persisted).
    pub async fn reset(&self) -> Result<()> {
        self.save(RoutingConfig::default()).await
    }

    /// Read one value by dotted path, for the CLI (`config get`).
    pub fn get_value(&self, dotted: &str) -> Option<serde_json::Value> {
        let root = serde_json::to_value(self.current().as_ref()).ok()?;
        let mut cur = &root;
        for part in dotted.split('.') {
            cur = cur.get(part)?;
        }
        Some(cur.clone())
    }

    /// Set one value by dotted path and persist, for the CLI (`config set`).
    pub async fn set_value(&self, dotted: &str, value: serde_json::Value) -> Result<()> {
        let mut root = serde_json::to_value(self.current().as_ref())
            .map_err(|e| BridgeError::InvalidConfig(e.to_string()))?;

        let mut cur = &mut root;
        let parts: Vec<&str> = dotted.split('.').collect();
        for (i, part) in parts.iter().enumerate() {
            if i + 1 == parts.len() {
                match cur.as_object_mut() {
                    Some(map) => {
                        map.insert((*part).to_string(), value.clone());
                    }
                    None => {
                        return Err(BridgeError::InvalidConfig(format!(
                            "\"{dotted}\" does not name a settable field"
                        )))
                    }
                }
            } else {
                cur = cur.get_mut(*part).ok_or_else(|| {
                    BridgeError::InvalidConfig(format!("unknown config path \"{dotted}\""))
                })?;
            }
        }

        let config: RoutingConfig = serde_json::from_value(root)
            .map_err(|e| BridgeError::InvalidConfig(e.to_string()))?;
        self.save(config).await
    }

    /// Poll the config file for external edits and reload on change.
    ///
    /// Returns a handle; dropping or stopping it ends the poll loop. Reload
    /// errors are logged and skipped: a half-written file must not take the
    /// bridge down.
    pub fn watch_file(self: &Arc<Self>, interval: Duration) -> crate::detector::WatchHandle {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut last_mtime = file_mtime(&manager.path).await;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let mtime = file_mtime(&manager.path).await;
                if mtime != last_mtime {
                    last_mtime = mtime;
                    if let Err(err) = manager.load().await {
                        tracing::warn!(code = err.code(), %err, "config reload failed");
                    }
                }
            }
        });
        crate::detector::WatchHandle::new(handle)
    }
}

async fn file_mtime(path: &Path) -> Option<std::time::SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}
