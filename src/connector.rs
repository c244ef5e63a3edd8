//! Backend connector.
//!
//! Establishes one duplex byte stream to a chosen target (a Unix domain
//! socket, a Windows named pipe, or a spawned native-host subprocess's
//! stdio) and pumps it through the same codec the extension host uses. The
//! returned [`Connection`] is owned exclusively by the connection manager;
//! closing it immediately invalidates all pending reads and writes.

use crate::config::RoutingConfig;
use crate::endpoint::{self, Endpoint};
use crate::error::{BridgeError, Result};
use crate::protocol::{self, Frame, FrameBuffer};
use crate::target::Target;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Signals emitted by a live connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// One complete decoded frame from the backend.
    Message(Frame),
    /// A per-frame codec error or an I/O error on the stream.
    Error(BridgeError),
    /// The backend closed the stream (or the spawned process exited).
    Closed,
}

/// One live duplex connection to one target.
pub struct Connection {
    target: Target,
    endpoint: String,
    connected: Arc<AtomicBool>,
    out_tx: mpsc::Sender<Vec<u8>>,
    events: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    fn spawn<R, W>(target: Target, endpoint: String, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (out_tx, out_rx) = mpsc::channel(64);
        let connected = Arc::new(AtomicBool::new(true));

        let tasks = vec![
            tokio::spawn(read_loop(
                reader,
                event_tx.clone(),
                Arc::clone(&connected),
            )),
            tokio::spawn(write_loop(writer, out_rx, event_tx)),
        ];

        Connection {
            target,
            endpoint,
            connected,
            out_tx,
            events: Mutex::new(Some(event_rx)),
            tasks,
        }
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// The channel identifier this connection was opened against.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Take the event stream. Yields `None` once per connection; the
    /// connection manager's pump task is the single consumer.
    pub fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.events.lock().expect("connection event lock").take()
    }

    /// Encode and queue one frame for the backend.
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        if !self.is_connected() {
            return Err(BridgeError::SendFailed("not connected".into()));
        }
        let bytes = protocol::encode(frame)?;
        self.out_tx
            .send(bytes)
            .await
            .map_err(|_| BridgeError::SendFailed("connection write queue closed".into()))
    }

    /// Tear the connection down. Pending reads and writes are invalidated
    /// immediately; a spawned backend process is killed on drop of its
    /// monitor task.
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_loop<R>(
    mut reader: R,
    events: mpsc::Sender<ConnectionEvent>,
    connected: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buffer = FrameBuffer::new();
    let mut chunk = [0u8; 8192];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                connected.store(false, Ordering::SeqCst);
                let _ = events.send(ConnectionEvent::Closed).await;
                return;
            }
            Ok(n) => {
                buffer.extend(&chunk[..n]);
                while let Some(item) = buffer.next() {
                    let event = match item {
                        Ok(frame) => ConnectionEvent::Message(frame),
                        Err(err) => ConnectionEvent::Error(err),
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                connected.store(false, Ordering::SeqCst);
                let _ = events
                    .send(ConnectionEvent::Error(BridgeError::ConnectionLost(
                        e.to_string(),
                    )))
                    .await;
                let _ = events.send(ConnectionEvent::Closed).await;
                return;
            }
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut out_rx: mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<ConnectionEvent>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(bytes) = out_rx.recv().await {
        let result = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            let _ = events
                .send(ConnectionEvent::Error(BridgeError::SendFailed(
                    e.to_string(),
                )))
                .await;
            return;
        }
    }
}

/// Open a connection to `target` under the given config.
///
/// Resolves the endpoint (honoring `advanced.paths` / `advanced.spawn`) and
/// bounds the attempt by `timeouts.connection`.
pub async fn connect(target: Target, config: &RoutingConfig) -> Result<Connection> {
    let timeout = config.connection_timeout();
    match endpoint::resolve(target, config) {
        Endpoint::Ipc(path) => connect_ipc(target, &path, timeout).await,
        Endpoint::Process(exe) => connect_process(target, &exe, timeout).await,
    }
}

/// Connect to the target's IPC channel (socket / named pipe).
pub async fn connect_ipc(target: Target, path: &str, timeout: Duration) -> Result<Connection> {
    let stream = open_ipc_stream(path, timeout).await?;
    let (reader, writer) = tokio::io::split(stream);
    Ok(Connection::spawn(target, path.to_string(), reader, writer))
}

#[cfg(unix)]
async fn open_ipc_stream(path: &str, timeout: Duration) -> Result<tokio::net::UnixStream> {
    match tokio::time::timeout(timeout, tokio::net::UnixStream::connect(path)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(BridgeError::ConnectionFailed {
            path: path.to_string(),
            detail: e.to_string(),
        }),
        Err(_) => Err(BridgeError::Timeout {
            what: format!("connect to {path}"),
            ms: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(windows)]
async fn open_ipc_stream(
    path: &str,
    timeout: Duration,
) -> Result<tokio::net::windows::named_pipe::NamedPipeClient> {
    use tokio::net::windows::named_pipe::ClientOptions;

    const ERROR_PIPE_BUSY: i32 = 231;

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match ClientOptions::new().open(path) {
            Ok(client) => return Ok(client),
            // All pipe instances busy: retry until the connect deadline.
            Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(BridgeError::Timeout {
                        what: format!("connect to {path}"),
                        ms: timeout.as_millis() as u64,
                    });
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(e) => {
                return Err(BridgeError::ConnectionFailed {
                    path: path.to_string(),
                    detail: e.to_string(),
                })
            }
        }
    }
}

/// Spawn the target's native-host executable and connect over its stdio.
pub async fn connect_process(target: Target, exe: &Path, _timeout: Duration) -> Result<Connection> {
    if tokio::fs::metadata(exe).await.is_err() {
        return Err(BridgeError::ConnectionFailed {
            path: exe.display().to_string(),
            detail: "native host executable not found".into(),
        });
    }

    let mut command = native_host_command(exe);
    command
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| BridgeError::ConnectionFailed {
        path: exe.display().to_string(),
        detail: e.to_string(),
    })?;

    let stdin = child.stdin.take().ok_or_else(|| BridgeError::ConnectionFailed {
        path: exe.display().to_string(),
        detail: "child stdin unavailable".into(),
    })?;
    let stdout = child.stdout.take().ok_or_else(|| BridgeError::ConnectionFailed {
        path: exe.display().to_string(),
        detail: "child stdout unavailable".into(),
    })?;
    let stderr = child.stderr.take();

    let mut connection =
        Connection::spawn(target, exe.display().to_string(), stdout, stdin);

    // Drain the child's stderr into the log so backend diagnostics are not
    // lost; it must never mix into the framed streams.
    if let Some(stderr) = stderr {
        connection.tasks.push(tokio::spawn(async move {
            use tokio::io::AsyncBufReadExt;
            let mut lines = tokio::io::BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(backend = %target, "{line}");
            }
        }));
    }

    // Holding the child inside this task ties its lifetime to the
    // connection: aborting the task drops the child and kill_on_drop
    // reaps the process.
    let connected = Arc::clone(&connection.connected);
    connection.tasks.push(tokio::spawn(async move {
        let _ = child.wait().await;
        connected.store(false, Ordering::SeqCst);
    }));

    Ok(connection)
}

#[cfg(windows)]
fn native_host_command(exe: &Path) -> tokio::process::Command {
    // Batch launchers need the shell.
    let is_batch = exe
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("bat"));
    if is_batch {
        let mut cmd = tokio::process::Command::new("cmd.exe");
        cmd.arg("/c").arg(exe);
        cmd
    } else {
        tokio::process::Command::new(exe)
    }
}

#[cfg(not(windows))]
fn native_host_command(exe: &Path) -> tokio::process::Command {
    tokio::process::Command::new(exe)
}
