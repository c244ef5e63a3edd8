//! Stateful routing coordinator.
//!
//! Wraps the pure decision rules with the state the bridge needs: the
//! currently chosen target, the last resolution, and a watch loop that
//! re-resolves whenever the configuration changes or the detector delivers
//! a new snapshot.

use crate::config::ConfigManager;
use crate::decision::{self, ResolutionResult};
use crate::detector::{DetectionSnapshot, Detector, WatchHandle};
use crate::error::{BridgeError, Result};
use crate::target::Target;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Signals emitted by the router.
#[derive(Debug)]
pub enum RouterEvent {
    /// The chosen target changed. Not emitted for the very first
    /// resolution; there is no previous target to change from.
    TargetChanged {
        target: Target,
        reason: String,
    },
    /// A resolution cycle found no usable target. Reported, never thrown
    /// across the watch boundary: a transient all-unreachable state must
    /// not kill the watcher loop.
    ResolutionFailed(BridgeError),
    /// A fresh detection snapshot arrived from the watch loop.
    DetectionUpdated(DetectionSnapshot),
}

#[derive(Debug, Default)]
struct RouterState {
    current_target: Option<Target>,
    last_resolution: Option<ResolutionResult>,
}

pub struct Router {
    detector: Arc<Detector>,
    config: Arc<ConfigManager>,
    state: Mutex<RouterState>,
    event_tx: mpsc::Sender<RouterEvent>,
    watch: Mutex<Option<WatchHandle>>,
}

impl Router {
    pub fn new(
        detector: Arc<Detector>,
        config: Arc<ConfigManager>,
    ) -> (Arc<Self>, mpsc::Receiver<RouterEvent>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let router = Arc::new(Router {
            detector,
            config,
            state: Mutex::new(RouterState::default()),
            event_tx,
            watch: Mutex::new(None),
        });
        (router, event_rx)
    }

    /// Re-read config, detect all targets, decide. Emits `TargetChanged`
    /// when the choice differs from an established previous target.
    pub async fn resolve(&self) -> Result<Target> {
        let config = self.config.current();
        let detection = self.detector.detect_all().await;
        let result = decision::decide(&config, &detection)?;

        let changed_from = {
            let mut state = self.state.lock().expect("router state lock");
            let previous = state.current_target;
            state.current_target = Some(result.target);
            state.last_resolution = Some(result.clone());
            match previous {
                Some(old) if old != result.target => Some(old),
                _ => None,
            }
        };

        if let Some(old) = changed_from {
            tracing::info!(
                from = %old,
                to = %result.target,
                reason = %result.reason,
                "target_changed"
            );
            let _ = self
                .event_tx
                .send(RouterEvent::TargetChanged {
                    target: result.target,
                    reason: result.reason.to_string(),
                })
                .await;
        }

        Ok(result.target)
    }

    pub fn current_target(&self) -> Option<Target> {
        self.state.lock().expect("router state lock").current_target
    }

    pub fn last_resolution(&self) -> Option<ResolutionResult> {
        self.state
            .lock()
            .expect("router state lock")
            .last_resolution
            .clone()
    }

    /// React to config changes and detection polls with fresh resolutions.
    /// Idempotent; the loop runs until [`stop_watching`](Router::stop_watching).
    pub fn start_watching(self: &Arc<Self>) {
        let mut watch = self.watch.lock().expect("router watch lock");
        if watch.is_some() {
            return;
        }

        let router = Arc::clone(self);
        let mut config_rx = self.config.subscribe();
        let (detector_watch, mut detection_rx) = self.detector.watch();

        let handle = tokio::spawn(async move {
            // Owns the detector poll for the lifetime of this loop.
            let _detector_watch = detector_watch;
            loop {
                tokio::select! {
                    changed = config_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        router.resolve_reported().await;
                    }
                    snapshot = detection_rx.recv() => {
                        let Some(snapshot) = snapshot else { return };
                        let _ = router
                            .event_tx
                            .send(RouterEvent::DetectionUpdated(snapshot))
                            .await;
                        router.resolve_reported().await;
                    }
                }
            }
        });

        *watch = Some(WatchHandle::new(handle));
    }

    pub fn stop_watching(&self) {
        if let Some(handle) = self.watch.lock().expect("router watch lock").take() {
            handle.stop();
        }
    }

    /// `resolve`, with failures turned into events instead of errors.
    async fn resolve_reported(&self) {
        if let Err(err) = self.resolve().await {
            let _ = self
                .event_tx
                .send(RouterEvent::ResolutionFailed(err))
                .await;
        }
    }
}
