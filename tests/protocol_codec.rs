use claude_bridge::error::BridgeError;
use claude_bridge::protocol::{
    decode, encode, Frame, FrameBuffer, LENGTH_PREFIX_SIZE, MAX_MESSAGE_SIZE,
};
use serde_json::json;

fn sample_frame() -> Frame {
    Frame::new("ping")
        .with_payload(json!({ "key": "value", "n": 42, "unicode": "héllo 🌍" }))
        .with_id("r1")
}

#[test]
fn encode_then_decode_roundtrip() {
    let frame = sample_frame();
    let bytes = encode(&frame).expect("encode");

    // First 4 bytes = little-endian body length.
    let len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    assert_eq!(len, bytes.len() - LENGTH_PREFIX_SIZE);
    assert_eq!(bytes[0..4], (len as u32).to_le_bytes());

    let (decoded, consumed) = decode(&bytes).expect("decode").expect("complete frame");
    assert_eq!(decoded, frame);
    assert_eq!(consumed, bytes.len());
}

#[test]
fn decode_reports_needs_more_data_not_an_error() {
    let bytes = encode(&sample_frame()).expect("encode");

    // Empty, partial prefix, and partial body are all "wait for more".
    assert!(decode(&[]).expect("empty").is_none());
    assert!(decode(&bytes[..3]).expect("partial prefix").is_none());
    assert!(decode(&bytes[..bytes.len() - 1]).expect("partial body").is_none());
}

#[test]
fn streaming_split_at_every_boundary() {
    let frame = sample_frame();
    let bytes = encode(&frame).expect("encode");

    for split in 0..=bytes.len() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(&bytes[..split]);
        let early: Vec<_> = buffer.drain_frames();
        buffer.extend(&bytes[split..]);
        let late: Vec<_> = buffer.drain_frames();

        let mut decoded = early;
        decoded.extend(late);
        assert_eq!(decoded.len(), 1, "split at {split}");
        assert_eq!(decoded[0].as_ref().expect("frame"), &frame);
        assert!(buffer.is_empty(), "split at {split} left bytes behind");
    }
}

#[test]
fn decode_all_drains_multiple_frames_and_keeps_partial_tail() {
    let a = Frame::new("a").with_id("1");
    let b = Frame::new("b").with_id("2");
    let c = Frame::new("c").with_id("3");

    let mut bytes = encode(&a).expect("encode a");
    bytes.extend(encode(&b).expect("encode b"));
    let c_bytes = encode(&c).expect("encode c");
    bytes.extend(&c_bytes[..c_bytes.len() / 2]);

    let mut buffer = FrameBuffer::new();
    buffer.extend(&bytes);
    let frames: Vec<Frame> = buffer.drain_frames().into_iter().map(|f| f.unwrap()).collect();
    assert_eq!(frames, vec![a, b]);
    assert_eq!(buffer.len(), c_bytes.len() / 2);

    buffer.extend(&c_bytes[c_bytes.len() / 2..]);
    let rest: Vec<Frame> = buffer.drain_frames().into_iter().map(|f| f.unwrap()).collect();
    assert_eq!(rest, vec![c]);
    assert!(buffer.is_empty());
}

/// Frame whose encoded JSON body is exactly `body_len` bytes.
fn frame_with_body_len(body_len: usize) -> Frame {
    let probe = Frame::new("x").with_payload(json!(""));
    let overhead = serde_json::to_vec(&probe).unwrap().len();
    let frame = Frame::new("x").with_payload(json!("y".repeat(body_len - overhead)));
    assert_eq!(serde_json::to_vec(&frame).unwrap().len(), body_len);
    frame
}

#[test]
fn encode_size_boundary() {
    let at_limit = frame_with_body_len(MAX_MESSAGE_SIZE);
    assert!(encode(&at_limit).is_ok());

    let over_limit = frame_with_body_len(MAX_MESSAGE_SIZE + 1);
    match encode(&over_limit) {
        Err(BridgeError::SizeExceeded { size, max }) => {
            assert_eq!(size, MAX_MESSAGE_SIZE + 1);
            assert_eq!(max, MAX_MESSAGE_SIZE);
        }
        other => panic!("expected SizeExceeded, got {other:?}"),
    }
}

#[test]
fn decode_rejects_oversized_declared_length_before_body_arrives() {
    // Only the prefix claiming MAX+1; no body bytes at all.
    let bytes = ((MAX_MESSAGE_SIZE + 1) as u32).to_le_bytes();
    match decode(&bytes) {
        Err(BridgeError::SizeExceeded { size, .. }) => assert_eq!(size, MAX_MESSAGE_SIZE + 1),
        other => panic!("expected SizeExceeded, got {other:?}"),
    }
}

#[test]
fn parse_error_consumes_only_the_bad_frame() {
    let bad_body = b"this is not json";
    let mut bytes = Vec::new();
    bytes.extend((bad_body.len() as u32).to_le_bytes());
    bytes.extend(bad_body);
    let good = Frame::new("after").with_id("ok");
    bytes.extend(encode(&good).expect("encode"));

    let mut buffer = FrameBuffer::new();
    buffer.extend(&bytes);

    match buffer.next() {
        Some(Err(BridgeError::Parse(_))) => {}
        other => panic!("expected Parse error, got {other:?}"),
    }
    match buffer.next() {
        Some(Ok(frame)) => assert_eq!(frame, good),
        other => panic!("expected the following frame, got {other:?}"),
    }
    assert!(buffer.is_empty());
}

#[test]
fn oversized_frame_is_skipped_and_stream_continues() {
    let oversized_len = MAX_MESSAGE_SIZE + 10;
    let mut first_half = Vec::new();
    first_half.extend((oversized_len as u32).to_le_bytes());
    first_half.extend(vec![b'x'; oversized_len / 2]);

    let mut buffer = FrameBuffer::new();
    buffer.extend(&first_half);

    match buffer.next() {
        Some(Err(BridgeError::SizeExceeded { .. })) => {}
        other => panic!("expected SizeExceeded, got {other:?}"),
    }
    // Error is reported once; the remainder of the frame just drains.
    assert!(buffer.next().is_none());

    let good = Frame::new("after").with_id("ok");
    let mut rest = vec![b'x'; oversized_len - oversized_len / 2];
    rest.extend(encode(&good).expect("encode"));
    buffer.extend(&rest);

    match buffer.next() {
        Some(Ok(frame)) => assert_eq!(frame, good),
        other => panic!("expected the frame after the oversized one, got {other:?}"),
    }
}

#[test]
fn frame_envelope_fields_survive_roundtrip() {
    let frame = Frame {
        kind: "response".into(),
        payload: json!({ "ok": true }),
        id: Some("req-1".into()),
        timestamp: Some(1_700_000_000_000),
    };
    let bytes = encode(&frame).expect("encode");
    let (decoded, _) = decode(&bytes).expect("decode").expect("complete");
    assert_eq!(decoded, frame);

    // A frame without optional fields stays without them on the wire.
    let bare = Frame::new("ping");
    let bytes = encode(&bare).expect("encode");
    let body: serde_json::Value =
        serde_json::from_slice(&bytes[LENGTH_PREFIX_SIZE..]).expect("body json");
    assert_eq!(body, json!({ "type": "ping" }));
}
