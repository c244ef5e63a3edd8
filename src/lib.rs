//! # claude-bridge
//!
//! A routing **native messaging** proxy. It sits between a browser extension
//! (speaking the length-prefixed JSON protocol over stdin/stdout) and
//! whichever Claude backend is actually reachable (the Desktop app or the
//! CLI agent) and keeps the extension on one stable channel while backends
//! come, go, and fight over the same IPC name.
//!
//! Both products try to claim the same native-messaging registration, so at
//! most one of them is reliably reachable at a time. The bridge decides,
//! continuously and automatically, which one that is:
//!
//! 1. the [`detector`] probes each backend (process scan, then a real
//!    connection attempt against its IPC channel; existence of a stale
//!    socket file proves nothing);
//! 2. the [`decision`] rules pick a target from the config and the probe
//!    snapshot (explicit choice wins when reachable, otherwise fallback
//!    order applies);
//! 3. the [`manager`] owns the live connection and reconnects with bounded,
//!    linearly backed-off retries when it drops;
//! 4. the [`bridge`] forwards frames in both directions, correlating
//!    request/response pairs by id.
//!
//! ## Wire protocol
//!
//! Both sides speak the same framing: a **4-byte little-endian `u32`
//! length** followed by that many bytes of UTF-8 JSON, bodies capped at
//! **1 MiB** ([`protocol::MAX_MESSAGE_SIZE`]). Frames carry a `type` tag and
//! an optional `id`; the bridge never interprets anything else.
//!
//! ## Most important gotchas
//!
//! - **Never log to stdout.** When the bridge runs as a native host, stdout
//!   carries protocol frames; a single stray print corrupts the stream. All
//!   logging goes to stderr (`tracing` with a stderr writer).
//! - **Disconnect is normal.** The browser closing stdin is the regular end
//!   of a host's life. [`host::HostEvent::Closed`] is how every part of the
//!   bridge learns about it.
//! - **Frames are dropped, not queued, when no backend is connected.**
//!   Buffering user-facing requests across a backend switch would replay
//!   them against the wrong product; a drop plus a `message_dropped` event
//!   is the honest behavior.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use claude_bridge::bridge::Bridge;
//! use claude_bridge::config::ConfigManager;
//! use claude_bridge::host::Host;
//!
//! #[tokio::main]
//! async fn main() -> claude_bridge::error::Result<()> {
//!     let config = Arc::new(ConfigManager::new(None));
//!     let (host, host_events) = Host::stdio();
//!     let (bridge, mut events) = Bridge::new(host, host_events, config);
//!
//!     bridge.start().await?;
//!
//!     // The bridge runs in its own tasks; wait for it to finish.
//!     while let Some(event) = events.recv().await {
//!         if matches!(event, claude_bridge::bridge::BridgeEvent::Stopped) {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Crate layout
//!
//! - [`protocol`] — frame type + codec + streaming buffer.
//! - [`host`] — extension-facing transport (also used for subprocess stdio).
//! - [`endpoint`] / [`connector`] — backend channel resolution and
//!   connections (socket / named pipe / spawned process).
//! - [`detector`] — cached liveness + reachability probing.
//! - [`decision`] / [`router`] — target resolution rules and the stateful
//!   coordinator around them.
//! - [`manager`] — connection ownership and reconnection policy.
//! - [`tracker`] / [`bridge`] — request correlation and the assembled proxy.
//! - [`config`] — the routing config file and its change notifications.
//! - [`install`] — browser manifest install/verify/remove (feature
//!   `install`, on by default).

pub mod bridge;
pub mod config;
pub mod connector;
pub mod decision;
pub mod detector;
pub mod endpoint;
pub mod error;
pub mod host;
pub mod manager;
pub mod protocol;
pub mod router;
pub mod target;
pub mod tracker;

#[cfg(feature = "install")]
pub mod install;

#[doc(inline)]
pub use bridge::{Bridge, BridgeEvent, BridgeStatus};
#[doc(inline)]
pub use error::{BridgeError, Result};
#[doc(inline)]
pub use protocol::{Frame, MAX_MESSAGE_SIZE};
#[doc(inline)]
pub use target::Target;
