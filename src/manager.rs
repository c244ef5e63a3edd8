//! Connection ownership and recovery.
//!
//! The manager is the sole writer of the active [`Connection`]: it opens
//! connections to the router's chosen target, replaces them on target
//! switches, and runs the reconnection sequence when a connection drops
//! unexpectedly. Backend frames and connection errors are re-emitted as
//! [`ManagerEvent`]s so the bridge consumes a single stream.

use crate::config::ConfigManager;
use crate::connector::{self, Connection, ConnectionEvent};
use crate::error::{BridgeError, Result};
use crate::protocol::Frame;
use crate::router::Router;
use crate::target::Target;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Reconnection attempts per recovery cycle. Internal policy, not config.
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Signals emitted by the connection manager.
#[derive(Debug)]
pub enum ManagerEvent {
    /// A connection to this target is established.
    Connected(Target),
    /// The active connection dropped. A reconnection sequence follows
    /// unless one is already running.
    Disconnected { reason: String },
    /// Reconnection picked a different target than before.
    Switched {
        from: Target,
        to: Target,
        reason: String,
    },
    /// One frame received from the backend.
    BackendMessage(Frame),
    /// A connection-level error, including `ReconnectFailed` after a
    /// recovery cycle is exhausted.
    Error(BridgeError),
}

pub struct ConnectionManager {
    router: Arc<Router>,
    config: Arc<ConfigManager>,
    connection: tokio::sync::Mutex<Option<Connection>>,
    current_target: std::sync::Mutex<Option<Target>>,
    /// Bumped on every connect/disconnect; a pump task whose generation is
    /// stale must not trigger recovery for a connection that was already
    /// replaced on purpose.
    generation: AtomicU64,
    reconnecting: AtomicBool,
    event_tx: mpsc::Sender<ManagerEvent>,
}

impl ConnectionManager {
    pub fn new(
        router: Arc<Router>,
        config: Arc<ConfigManager>,
    ) -> (Arc<Self>, mpsc::Receiver<ManagerEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let manager = Arc::new(ConnectionManager {
            router,
            config,
            connection: tokio::sync::Mutex::new(None),
            current_target: std::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
            reconnecting: AtomicBool::new(false),
            event_tx,
        });
        (manager, event_rx)
    }

    /// Resolve a target through the router and connect to it, replacing any
    /// prior connection.
    pub async fn connect(self: &Arc<Self>) -> Result<Target> {
        let target = self.router.resolve().await?;
        self.connect_to(target).await?;
        Ok(target)
    }

    /// Re-resolve and connect, reporting a target switch distinctly from a
    /// same-target reconnect. Used by the recovery loop and by
    /// target-change triggers.
    pub async fn reconnect(self: &Arc<Self>) -> Result<Target> {
        let target = self.router.resolve().await?;

        let previous = *self.current_target.lock().expect("manager target lock");
        if let Some(from) = previous {
            if from != target {
                let _ = self
                    .event_tx
                    .send(ManagerEvent::Switched {
                        from,
                        to: target,
                        reason: "reconnection".into(),
                    })
                    .await;
            }
        }

        self.connect_to(target).await?;
        Ok(target)
    }

    pub fn current_target(&self) -> Option<Target> {
        *self.current_target.lock().expect("manager target lock")
    }

    /// Whether a recovery cycle is currently running. External reconnect
    /// triggers should coalesce into it rather than stack a second one.
    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| c.is_connected())
    }

    /// Forward one frame to the active connection.
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        let connection = self.connection.lock().await;
        match connection.as_ref() {
            Some(c) if c.is_connected() => c.send(frame).await,
            _ => Err(BridgeError::ConnectionLost("no active connection".into())),
        }
    }

    /// Close the active connection and forget the target.
    pub async fn disconnect(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(connection) = self.connection.lock().await.take() {
            connection.close();
        }
        *self.current_target.lock().expect("manager target lock") = None;
    }

    #[allow(dead_code)]
    fn _assert_sync() {
        fn is_sync<T: Send + Sync>() {}
        is_sync::<ConnectionManager>();
    }

    async fn connect_to(self: &Arc<Self>, target: Target) -> Result<()> {
        // Close the predecessor before opening its replacement; the old
        // pump task is invalidated by the generation bump.
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(old) = self.connection.lock().await.take() {
            old.close();
        }

        let config = self.config.current();
        let connection = connector::connect(target, &config).await?;
        tracing::debug!(backend = %target, endpoint = connection.endpoint(), "backend connected");

        let events = connection
            .take_events()
            .expect("fresh connection has its event stream");

        // Store before the pump runs: an instantly-dying connection must
        // find itself installed when its recovery fires, not race the store.
        *self.connection.lock().await = Some(connection);
        *self.current_target.lock().expect("manager target lock") = Some(target);

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.pump_connection(generation, events).await;
        });

        let _ = self.event_tx.send(ManagerEvent::Connected(target)).await;
        Ok(())
    }

    async fn pump_connection(
        self: Arc<Self>,
        generation: u64,
        mut events: mpsc::Receiver<ConnectionEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                ConnectionEvent::Message(frame) => {
                    let _ = self.event_tx.send(ManagerEvent::BackendMessage(frame)).await;
                }
                ConnectionEvent::Error(err) => {
                    let _ = self.event_tx.send(ManagerEvent::Error(err)).await;
                }
                ConnectionEvent::Closed => {
                    self.handle_disconnection(generation, "connection closed")
                        .await;
                    return;
                }
            }
        }
        // Senders gone without a Closed event: the connection was torn down
        // locally (replacement or disconnect); nothing to recover.
    }

    /// Recovery sequence: bounded retries with linear backoff, target
    /// re-resolved per attempt. Overlapping triggers coalesce into the
    /// running sequence instead of queueing.
    async fn handle_disconnection(self: &Arc<Self>, generation: u64, reason: &str) {
        if generation != self.generation.load(Ordering::SeqCst) {
            return;
        }

        let _ = self
            .event_tx
            .send(ManagerEvent::Disconnected {
                reason: reason.into(),
            })
            .await;

        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        let base_delay = self.config.current().reconnect_delay();
        for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
            tokio::time::sleep(base_delay * attempt).await;

            match self.reconnect().await {
                Ok(target) => {
                    tracing::info!(backend = %target, attempt, "reconnected");
                    self.reconnecting.store(false, Ordering::SeqCst);
                    return;
                }
                Err(err) => {
                    tracing::warn!(attempt, code = err.code(), %err, "reconnect attempt failed");
                }
            }
        }

        self.reconnecting.store(false, Ordering::SeqCst);
        let _ = self
            .event_tx
            .send(ManagerEvent::Error(BridgeError::ReconnectFailed))
            .await;
    }
}
