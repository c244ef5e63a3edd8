use crate::target::Target;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors produced anywhere in the bridge.
///
/// Every variant carries a stable error code (`code()`) so log consumers and
/// the status tooling can match on failures without parsing messages:
///
/// - `N0xx` — native messaging framing / stdio
/// - `I0xx` — IPC connection to a backend
/// - `R0xx` — routing (config, resolution, reconnection)
/// - `C0xx` — everything else
///
/// `recoverable()` tells callers whether retrying (reconnect, fallback,
/// config change) can fix the condition, or whether the current bridge run
/// is done for.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// A frame body was complete but not valid JSON.
    #[error("failed to parse frame: {0}")]
    Parse(String),

    /// A frame body exceeds [`crate::protocol::MAX_MESSAGE_SIZE`].
    #[error("message size {size} exceeds maximum {max}")]
    SizeExceeded { size: usize, max: usize },

    /// Read failure on the extension-facing input stream.
    #[error("stdin error: {0}")]
    Stdin(String),

    /// Write failure on the extension-facing output stream.
    #[error("stdout error: {0}")]
    Stdout(String),

    /// Could not establish a connection to a backend channel.
    #[error("connection failed to {path}: {detail}")]
    ConnectionFailed { path: String, detail: String },

    /// An established backend connection dropped or is absent.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A write on an established connection failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// A bounded wait (connect, health check, tracked request) expired.
    #[error("timeout after {ms}ms: {what}")]
    Timeout { what: String, ms: u64 },

    /// The configuration snapshot is structurally invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No backend is reachable under the current config and detection state.
    #[error("no available target{}", no_target_detail(.configured))]
    NoAvailableTarget { configured: Option<Target> },

    /// All reconnection attempts for one recovery cycle were exhausted.
    #[error("max reconnection retries exceeded")]
    ReconnectFailed,
}

fn no_target_detail(configured: &Option<Target>) -> String {
    match configured {
        Some(t) => format!(" (configured target \"{t}\" unreachable, no fallback)"),
        None => String::new(),
    }
}

impl BridgeError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Parse(_) => "N001",
            BridgeError::SizeExceeded { .. } => "N002",
            BridgeError::Stdin(_) => "N003",
            BridgeError::Stdout(_) => "N004",
            BridgeError::ConnectionFailed { .. } => "I001",
            BridgeError::ConnectionLost(_) => "I002",
            BridgeError::SendFailed(_) => "I003",
            BridgeError::Timeout { .. } => "I004",
            BridgeError::InvalidConfig(_) => "R001",
            BridgeError::NoAvailableTarget { .. } => "R020",
            BridgeError::ReconnectFailed => "R030",
        }
    }

    /// Whether a retry / fallback / external state change can fix this.
    pub fn recoverable(&self) -> bool {
        match self {
            // Framing violations are final for the offending frame, and
            // stdio failures end the current bridge run.
            BridgeError::Parse(_)
            | BridgeError::SizeExceeded { .. }
            | BridgeError::Stdin(_)
            | BridgeError::Stdout(_)
            | BridgeError::ReconnectFailed => false,

            BridgeError::ConnectionFailed { .. }
            | BridgeError::ConnectionLost(_)
            | BridgeError::SendFailed(_)
            | BridgeError::Timeout { .. }
            | BridgeError::InvalidConfig(_)
            | BridgeError::NoAvailableTarget { .. } => true,
        }
    }
}
