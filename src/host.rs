//! Extension-facing transport.
//!
//! Adapts a raw duplex byte stream (stdin/stdout in production, an in-memory
//! duplex in tests) to a frame-level interface. Incoming bytes accumulate in
//! a [`FrameBuffer`] and every complete frame is delivered as a
//! [`HostEvent::Message`]; outgoing frames pass through a single writer task
//! so writes are never interleaved or reordered on the wire.
//!
//! Never write logs to the host's output stream: when the host runs over
//! real stdio, stdout carries protocol frames and anything else corrupts the
//! stream. Logging goes to stderr.

use crate::error::{BridgeError, Result};
use crate::protocol::{self, Frame, FrameBuffer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Signals emitted by a running host.
#[derive(Debug)]
pub enum HostEvent {
    /// One complete decoded frame.
    Message(Frame),
    /// A per-frame codec error or a stream I/O error. The transport keeps
    /// running after codec errors; I/O errors are followed by `Closed`.
    Error(BridgeError),
    /// The peer closed the stream, or `stop()` was called. This is the
    /// dominant way disconnection becomes visible to the rest of the bridge.
    Closed,
}

type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Frame-level transport over one duplex byte stream.
pub struct Host {
    started: AtomicBool,
    running: Arc<AtomicBool>,
    io: Mutex<Option<(BoxedReader, BoxedWriter)>>,
    out_tx: mpsc::Sender<Vec<u8>>,
    out_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    event_tx: mpsc::Sender<HostEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Host {
    /// Host over arbitrary stream halves. Returns the host and the event
    /// stream; events only flow after [`start`](Host::start).
    pub fn new<R, W>(reader: R, writer: W) -> (Self, mpsc::Receiver<HostEvent>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (out_tx, out_rx) = mpsc::channel(64);
        let host = Host {
            started: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
            io: Mutex::new(Some((Box::new(reader), Box::new(writer)))),
            out_tx,
            out_rx: Mutex::new(Some(out_rx)),
            event_tx,
            tasks: Mutex::new(Vec::new()),
        };
        (host, event_rx)
    }

    /// Host over the process's stdin/stdout.
    pub fn stdio() -> (Self, mpsc::Receiver<HostEvent>) {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Attach to the stream and begin pumping frames. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        let (reader, writer) = self
            .io
            .lock()
            .expect("host io lock")
            .take()
            .expect("host streams present before first start");
        let out_rx = self
            .out_rx
            .lock()
            .expect("host queue lock")
            .take()
            .expect("host queue present before first start");

        let mut tasks = self.tasks.lock().expect("host task lock");
        tasks.push(tokio::spawn(read_loop(
            reader,
            self.event_tx.clone(),
            Arc::clone(&self.running),
        )));
        tasks.push(tokio::spawn(write_loop(
            writer,
            out_rx,
            self.event_tx.clone(),
        )));
    }

    /// Queue one frame for sending.
    ///
    /// Encoding happens here, so a [`BridgeError::SizeExceeded`] surfaces to
    /// the caller immediately instead of poisoning the write queue. The send
    /// awaits queue capacity, which is how stream backpressure propagates to
    /// producers.
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(BridgeError::Stdout("host is not running".into()));
        }
        let bytes = protocol::encode(frame)?;
        self.out_tx
            .send(bytes)
            .await
            .map_err(|_| BridgeError::Stdout("host write queue closed".into()))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Detach from the stream: aborts both pump tasks, discards any buffered
    /// and queued data, and emits [`HostEvent::Closed`]. A stopped host does
    /// not restart.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().expect("host task lock").drain(..) {
            task.abort();
        }
        let _ = self.event_tx.send(HostEvent::Closed).await;
    }
}

async fn read_loop(
    mut reader: BoxedReader,
    events: mpsc::Sender<HostEvent>,
    running: Arc<AtomicBool>,
) {
    let mut buffer = FrameBuffer::new();
    let mut chunk = [0u8; 8192];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                running.store(false, Ordering::SeqCst);
                let _ = events.send(HostEvent::Closed).await;
                return;
            }
            Ok(n) => {
                buffer.extend(&chunk[..n]);
                while let Some(item) = buffer.next() {
                    let event = match item {
                        Ok(frame) => HostEvent::Message(frame),
                        Err(err) => HostEvent::Error(err),
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                running.store(false, Ordering::SeqCst);
                let _ = events
                    .send(HostEvent::Error(BridgeError::Stdin(e.to_string())))
                    .await;
                let _ = events.send(HostEvent::Closed).await;
                return;
            }
        }
    }
}

async fn write_loop(
    mut writer: BoxedWriter,
    mut out_rx: mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<HostEvent>,
) {
    // One frame in flight at a time: write_all + flush complete before the
    // next queued frame is taken, so ordering on the wire is the queue order.
    while let Some(bytes) = out_rx.recv().await {
        let result = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            let _ = events
                .send(HostEvent::Error(BridgeError::Stdout(e.to_string())))
                .await;
            return;
        }
    }
}
