//! Native messaging wire protocol.
//!
//! Both sides of the bridge (extension over stdio, backend over its IPC
//! channel) speak the same framing: a 4-byte **little-endian** `u32` length
//! prefix followed by that many bytes of UTF-8 JSON. The JSON body is opaque
//! to the bridge beyond the envelope fields carried by [`Frame`].

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum JSON body size in bytes (1 MiB). Applies in both directions.
pub const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// One unit of the wire protocol.
///
/// `type` routes the message, `id` correlates requests with responses, and
/// everything else rides in `payload` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl Frame {
    /// Frame with just a type tag, no payload.
    pub fn new(kind: impl Into<String>) -> Self {
        Frame {
            kind: kind.into(),
            payload: Value::Null,
            id: None,
            timestamp: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Encode a frame: length prefix + JSON body.
///
/// Fails with [`BridgeError::SizeExceeded`] when the JSON body is larger than
/// [`MAX_MESSAGE_SIZE`]: that is a caller bug (the bridge never constructs
/// oversized frames itself) and is surfaced immediately rather than written.
pub fn encode(frame: &Frame) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(frame).map_err(|e| BridgeError::Parse(e.to_string()))?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(BridgeError::SizeExceeded {
            size: json.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + json.len());
    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(&json);
    Ok(out)
}

/// Try to decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when fewer than `4 + length` bytes are available;
/// that is the normal streaming state, never an error. On success returns the
/// frame and the number of bytes consumed, so callers can drain their buffer.
///
/// Fails with [`BridgeError::SizeExceeded`] as soon as the declared length
/// exceeds [`MAX_MESSAGE_SIZE`] (before the body is read), and with
/// [`BridgeError::Parse`] when a complete body is not valid JSON.
pub fn decode(buf: &[u8]) -> Result<Option<(Frame, usize)>> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(BridgeError::SizeExceeded {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let total = LENGTH_PREFIX_SIZE + len;
    if buf.len() < total {
        return Ok(None);
    }

    let frame: Frame = serde_json::from_slice(&buf[LENGTH_PREFIX_SIZE..total])
        .map_err(|e| BridgeError::Parse(e.to_string()))?;
    Ok(Some((frame, total)))
}

/// Streaming accumulation buffer.
///
/// Transport reads rarely align on frame boundaries; a `FrameBuffer` retains
/// the undecoded tail across reads. Feed raw chunks with [`extend`] and drain
/// complete frames with [`next`]. A bad frame does not poison the stream:
/// a parse failure consumes exactly the offending frame, and an oversized
/// frame's bytes are skipped as they arrive, so decoding resumes at the next
/// frame boundary either way.
///
/// [`extend`]: FrameBuffer::extend
/// [`next`]: FrameBuffer::next
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    /// Bytes of an oversized frame still to be discarded.
    skip: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw chunk read from the transport.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes currently buffered (undecoded tail).
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Next complete frame, if any.
    ///
    /// `None` means more data is needed. `Some(Err(_))` reports a framing
    /// violation for one frame; calling `next` again continues with the
    /// rest of the stream.
    pub fn next(&mut self) -> Option<Result<Frame>> {
        // Finish discarding an oversized frame before looking at new data.
        if self.skip > 0 {
            let n = self.skip.min(self.buf.len());
            self.buf.drain(..n);
            self.skip -= n;
            if self.skip > 0 {
                return None;
            }
        }

        match decode(&self.buf) {
            Ok(Some((frame, consumed))) => {
                self.buf.drain(..consumed);
                Some(Ok(frame))
            }
            Ok(None) => None,
            Err(err @ BridgeError::SizeExceeded { size, .. }) => {
                // Schedule the whole frame (prefix + declared body) for
                // discard; the bytes may not all have arrived yet.
                self.skip = LENGTH_PREFIX_SIZE + size;
                let n = self.skip.min(self.buf.len());
                self.buf.drain(..n);
                self.skip -= n;
                Some(Err(err))
            }
            Err(err) => {
                // Parse error: the frame is complete (decode saw the full
                // body), so drop exactly that frame and keep going.
                let len = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
                    as usize;
                self.buf.drain(..LENGTH_PREFIX_SIZE + len);
                Some(Err(err))
            }
        }
    }

    /// Drain every currently complete frame, collecting per-frame errors.
    pub fn drain_frames(&mut self) -> Vec<Result<Frame>> {
        let mut out = Vec::new();
        while let Some(item) = self.next() {
            out.push(item);
        }
        out
    }
}
