//! The routed bridge.
//!
//! Wires the extension host to the connection manager and keeps the illusion
//! of one stable channel: extension frames flow to whichever backend is
//! currently connected, backend frames flow back unchanged in `type`/`id`,
//! and routing changes, reconnects and failures happen behind the scenes.
//!
//! There is deliberately no store-and-forward queue: a frame arriving while
//! no connection is active is dropped with a `message_dropped` event.
//! Replaying stale user-facing requests against a different backend after a
//! switch would be worse than losing them.

use crate::config::{ConfigManager, RoutingConfig};
use crate::detector::{DetectionSnapshot, Detector, ProcessProbe};
use crate::error::{BridgeError, Result};
use crate::host::{Host, HostEvent};
use crate::manager::{ConnectionManager, ManagerEvent};
use crate::protocol::Frame;
use crate::router::{Router, RouterEvent};
use crate::target::Target;
use crate::tracker::RequestTracker;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Signals emitted by the bridge for the surrounding tooling.
#[derive(Debug)]
pub enum BridgeEvent {
    Started,
    Stopped,
    TargetChanged(Target),
    Error(BridgeError),
}

/// Point-in-time bridge statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub running: bool,
    pub current_target: Option<Target>,
    pub config: RoutingConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection: Option<DetectionSnapshot>,
    pub messages_forwarded: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_ms: Option<u64>,
    pub uptime_ms: u64,
    pub pending_requests: usize,
}

struct EventInputs {
    host_rx: mpsc::Receiver<HostEvent>,
    manager_rx: mpsc::Receiver<ManagerEvent>,
    router_rx: mpsc::Receiver<RouterEvent>,
}

/// Router-integrated message bridge.
pub struct Bridge {
    host: Arc<Host>,
    config: Arc<ConfigManager>,
    detector: Arc<Detector>,
    router: Arc<Router>,
    manager: Arc<ConnectionManager>,
    tracker: Arc<RequestTracker>,

    running: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    messages_forwarded: AtomicU64,
    last_activity_ms: AtomicU64,
    last_detection: Mutex<Option<DetectionSnapshot>>,

    event_tx: mpsc::Sender<BridgeEvent>,
    inputs: Mutex<Option<EventInputs>>,
}

impl Bridge {
    /// Assemble a bridge over the given host with the platform process
    /// probe.
    pub fn new(
        host: Host,
        host_rx: mpsc::Receiver<HostEvent>,
        config: Arc<ConfigManager>,
    ) -> (Arc<Self>, mpsc::Receiver<BridgeEvent>) {
        Self::with_probe(host, host_rx, config, crate::detector::platform_probe())
    }

    /// Assemble a bridge with a custom process probe (tests inject fakes
    /// here).
    pub fn with_probe(
        host: Host,
        host_rx: mpsc::Receiver<HostEvent>,
        config: Arc<ConfigManager>,
        probe: Arc<dyn ProcessProbe>,
    ) -> (Arc<Self>, mpsc::Receiver<BridgeEvent>) {
        let detector = Detector::new(probe, Arc::clone(&config));
        let (router, router_rx) = Router::new(Arc::clone(&detector), Arc::clone(&config));
        let (manager, manager_rx) =
            ConnectionManager::new(Arc::clone(&router), Arc::clone(&config));
        let (event_tx, event_rx) = mpsc::channel(64);

        let bridge = Arc::new(Bridge {
            host: Arc::new(host),
            config,
            detector,
            router,
            manager,
            tracker: Arc::new(RequestTracker::new()),
            running: AtomicBool::new(false),
            started_at: Mutex::new(None),
            messages_forwarded: AtomicU64::new(0),
            last_activity_ms: AtomicU64::new(0),
            last_detection: Mutex::new(None),
            event_tx,
            inputs: Mutex::new(Some(EventInputs {
                host_rx,
                manager_rx,
                router_rx,
            })),
        });

        (bridge, event_rx)
    }

    pub fn tracker(&self) -> &Arc<RequestTracker> {
        &self.tracker
    }

    pub fn detector(&self) -> &Arc<Detector> {
        &self.detector
    }

    /// Load config, establish the first connection, start the host and the
    /// watch loops. Fails when the config is invalid or no backend is
    /// reachable at startup.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = self.start_inner().await;
        if result.is_err() {
            self.running.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn start_inner(self: &Arc<Self>) -> Result<()> {
        self.config.load().await?;

        let target = self.manager.connect().await?;

        self.host.start();
        self.router.start_watching();

        let inputs = self
            .inputs
            .lock()
            .expect("bridge inputs lock")
            .take()
            .expect("bridge inputs present before first start");
        let bridge = Arc::clone(self);
        // The loop ends itself when the host closes or the bridge stops;
        // no handle to keep.
        tokio::spawn(bridge.run(inputs));

        *self.started_at.lock().expect("bridge uptime lock") = Some(Instant::now());
        tracing::info!(backend = %target, "bridge_started");
        let _ = self.event_tx.send(BridgeEvent::Started).await;
        Ok(())
    }

    /// The single shutdown path: stops watching, rejects every pending
    /// request, closes the backend connection, stops the host.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.router.stop_watching();
        self.tracker
            .cancel_all(BridgeError::ConnectionLost("bridge stopped".into()));
        self.manager.disconnect().await;
        self.host.stop().await;

        tracing::info!("bridge_stopped");
        let _ = self.event_tx.send(BridgeEvent::Stopped).await;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Send a frame to the backend and await its correlated reply.
    pub async fn request(&self, mut frame: Frame, timeout: Duration) -> Result<Frame> {
        let handle = self.tracker.register(&mut frame);
        if let Err(err) = self.manager.send(&frame).await {
            self.tracker.cancel(handle.id(), err.clone());
            return Err(err);
        }
        self.tracker.await_reply(handle, timeout).await
    }

    pub fn status(&self) -> BridgeStatus {
        let uptime_ms = self
            .started_at
            .lock()
            .expect("bridge uptime lock")
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let last_activity = self.last_activity_ms.load(Ordering::Relaxed);

        BridgeStatus {
            running: self.is_running(),
            current_target: self.manager.current_target(),
            config: (*self.config.current()).clone(),
            detection: self
                .last_detection
                .lock()
                .expect("bridge detection lock")
                .clone(),
            messages_forwarded: self.messages_forwarded.load(Ordering::Relaxed),
            last_activity_ms: (last_activity > 0).then_some(last_activity),
            uptime_ms,
            pending_requests: self.tracker.len(),
        }
    }

    async fn run(self: Arc<Self>, mut inputs: EventInputs) {
        loop {
            tokio::select! {
                event = inputs.host_rx.recv() => {
                    match event {
                        Some(HostEvent::Message(frame)) => self.forward_to_backend(frame).await,
                        Some(HostEvent::Error(err)) => self.report(err).await,
                        Some(HostEvent::Closed) | None => {
                            // Extension went away; this ends the bridge run.
                            self.stop().await;
                            return;
                        }
                    }
                }
                event = inputs.manager_rx.recv() => {
                    let Some(event) = event else { return };
                    self.handle_manager_event(event).await;
                }
                event = inputs.router_rx.recv() => {
                    let Some(event) = event else { return };
                    self.handle_router_event(event).await;
                }
            }
        }
    }

    /// Extension → backend. Dropped frames are never silent.
    async fn forward_to_backend(&self, mut frame: Frame) {
        if frame.id.is_none() {
            frame.id = Some(self.tracker.generate_id());
        }
        if frame.timestamp.is_none() {
            frame.timestamp = Some(epoch_ms());
        }

        match self.manager.send(&frame).await {
            Ok(()) => {
                self.count_forwarded("extension_to_backend", &frame);
            }
            Err(err) => {
                tracing::warn!(
                    kind = %frame.kind,
                    id = frame.id.as_deref().unwrap_or(""),
                    code = err.code(),
                    "message_dropped"
                );
                let _ = self.event_tx.send(BridgeEvent::Error(err)).await;
            }
        }
    }

    /// Backend → extension, resolving any tracked request on the way.
    async fn forward_to_extension(&self, frame: Frame) {
        self.tracker.resolve(&frame);

        match self.host.send(&frame).await {
            Ok(()) => {
                self.count_forwarded("backend_to_extension", &frame);
            }
            Err(err) => self.report(err).await,
        }
    }

    async fn handle_manager_event(&self, event: ManagerEvent) {
        match event {
            ManagerEvent::BackendMessage(frame) => self.forward_to_extension(frame).await,
            ManagerEvent::Connected(target) => {
                tracing::info!(backend = %target, "backend_connected");
            }
            ManagerEvent::Disconnected { reason } => {
                tracing::warn!(%reason, "backend_disconnected");
                self.tracker
                    .cancel_all(BridgeError::ConnectionLost(reason));
            }
            ManagerEvent::Switched { from, to, reason } => {
                tracing::info!(from = %from, to = %to, %reason, "backend_switched");
            }
            ManagerEvent::Error(err) => self.report(err).await,
        }
    }

    async fn handle_router_event(self: &Arc<Self>, event: RouterEvent) {
        match event {
            RouterEvent::TargetChanged { target, reason } => {
                let _ = self
                    .event_tx
                    .send(BridgeEvent::TargetChanged(target))
                    .await;

                // Apply the new choice unless a recovery cycle is already
                // re-resolving; it will pick the new target up itself.
                if self.manager.current_target() != Some(target)
                    && !self.manager.is_reconnecting()
                {
                    tracing::info!(backend = %target, %reason, "applying target change");
                    let manager = Arc::clone(&self.manager);
                    tokio::spawn(async move {
                        if let Err(err) = manager.reconnect().await {
                            tracing::warn!(code = err.code(), %err, "target switch failed");
                        }
                    });
                }
            }
            RouterEvent::ResolutionFailed(err) => self.report(err).await,
            RouterEvent::DetectionUpdated(snapshot) => {
                *self
                    .last_detection
                    .lock()
                    .expect("bridge detection lock") = Some(snapshot);
            }
        }
    }

    fn count_forwarded(&self, direction: &'static str, frame: &Frame) {
        self.messages_forwarded.fetch_add(1, Ordering::Relaxed);
        self.last_activity_ms.store(epoch_ms(), Ordering::Relaxed);
        tracing::debug!(
            direction,
            kind = %frame.kind,
            id = frame.id.as_deref().unwrap_or(""),
            "message_forwarded"
        );
    }

    async fn report(&self, err: BridgeError) {
        tracing::error!(code = err.code(), recoverable = err.recoverable(), %err, "bridge_error");
        let _ = self.event_tx.send(BridgeEvent::Error(err.clone())).await;
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
