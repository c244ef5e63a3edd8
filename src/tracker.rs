//! Request/response correlation.
//!
//! Callers can track an outbound frame and await the single reply that
//! carries the same id. Pending entries live in a map owned by the tracker;
//! they leave it on the first matching reply, on cancellation, or when their
//! timeout fires; no caller ever hangs indefinitely.

use crate::error::{BridgeError, Result};
use crate::protocol::Frame;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Default wait for a correlated reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

struct Pending {
    tx: oneshot::Sender<std::result::Result<Frame, BridgeError>>,
    created_at: Instant,
}

/// Pending registration returned by [`RequestTracker::register`].
pub struct ReplyHandle {
    id: String,
    rx: oneshot::Receiver<std::result::Result<Frame, BridgeError>>,
}

impl ReplyHandle {
    /// The (possibly generated) id the reply must carry.
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Correlates requests with responses by frame id.
#[derive(Default)]
pub struct RequestTracker {
    pending: Mutex<HashMap<String, Pending>>,
    id_counter: AtomicU64,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A process-unique request id.
    pub fn generate_id(&self) -> String {
        let n = self.id_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("req-{}-{}", std::process::id(), n)
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.pending.lock().expect("tracker lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a request with this id is outstanding.
    pub fn has(&self, id: &str) -> bool {
        self.pending.lock().expect("tracker lock").contains_key(id)
    }

    /// Register `frame` as awaiting a reply, assigning it a generated id
    /// when absent. Returns the reply channel; registration happens before
    /// the caller sends the frame, so a fast reply cannot slip past the
    /// tracker.
    pub fn register(&self, frame: &mut Frame) -> ReplyHandle {
        let id = match &frame.id {
            Some(id) => id.clone(),
            None => {
                let id = self.generate_id();
                frame.id = Some(id.clone());
                id
            }
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("tracker lock").insert(
            id.clone(),
            Pending {
                tx,
                created_at: Instant::now(),
            },
        );

        ReplyHandle { id, rx }
    }

    /// Await the reply for a registered request. Past `timeout` the entry
    /// is removed and the wait fails with [`BridgeError::Timeout`].
    pub async fn await_reply(&self, handle: ReplyHandle, timeout: Duration) -> Result<Frame> {
        let ReplyHandle { id, rx } = handle;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without a reply; treat like cancellation.
            Ok(Err(_)) => Err(BridgeError::ConnectionLost(format!(
                "request {id} abandoned"
            ))),
            Err(_) => {
                if let Some(entry) = self.pending.lock().expect("tracker lock").remove(&id) {
                    tracing::debug!(
                        id = %id,
                        age_ms = entry.created_at.elapsed().as_millis() as u64,
                        "request timed out"
                    );
                }
                Err(BridgeError::Timeout {
                    what: format!("request {id}"),
                    ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Register `frame` and await its reply in one step.
    pub async fn track(&self, frame: &mut Frame, timeout: Duration) -> Result<Frame> {
        let handle = self.register(frame);
        self.await_reply(handle, timeout).await
    }

    /// Complete the pending request matching this reply's id, if any.
    /// Replies without an id, or with an unknown id, are no-ops.
    pub fn resolve(&self, reply: &Frame) -> bool {
        let Some(id) = reply.id.as_deref() else {
            return false;
        };
        let Some(entry) = self.pending.lock().expect("tracker lock").remove(id) else {
            return false;
        };
        let _ = entry.tx.send(Ok(reply.clone()));
        true
    }

    /// Reject one pending request.
    pub fn cancel(&self, id: &str, error: BridgeError) -> bool {
        let Some(entry) = self.pending.lock().expect("tracker lock").remove(id) else {
            return false;
        };
        let _ = entry.tx.send(Err(error));
        true
    }

    /// Reject every pending request with this error. Invoked whenever the
    /// bridge stops or the backend connection is lost.
    pub fn cancel_all(&self, error: BridgeError) {
        let drained: Vec<Pending> = {
            let mut pending = self.pending.lock().expect("tracker lock");
            pending.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            let _ = entry.tx.send(Err(error.clone()));
        }
    }
}
