//! Tests for line framing and event parsing over chunked input.

use claude_bridge::agent::{parse_line, LineFramer, ProtocolEvent};

/// A well-formed event stream with multi-byte text, exactly as it would
/// appear on the agent's stdout.
fn sample_stream() -> Vec<u8> {
    let lines = [
        r#"{"type":"system","subtype":"init","session_id":"s1"}"#,
        r#"{"type":"assistant","message":{"content":[{"type":"text","text":"검색 결과: café"}]}}"#,
        r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Grep","input":{"pattern":"café"}}]}}"#,
        r#"{"type":"result","is_error":false}"#,
    ];
    let mut bytes = Vec::new();
    for line in lines {
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
    }
    bytes
}

fn events_from(framer: &mut LineFramer, chunks: &[&[u8]]) -> Vec<ProtocolEvent> {
    let mut events = Vec::new();
    for chunk in chunks {
        for line in framer.push(chunk) {
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
    }
    if let Some(tail) = framer.flush() {
        if let Some(event) = parse_line(&tail) {
            events.push(event);
        }
    }
    events
}

#[test]
fn every_two_chunk_split_yields_identical_events() {
    let stream = sample_stream();
    let expected = events_from(&mut LineFramer::new(), &[&stream]);
    assert_eq!(expected.len(), 4);

    for split in 0..=stream.len() {
        let mut framer = LineFramer::new();
        let events = events_from(&mut framer, &[&stream[..split], &stream[split..]]);
        assert_eq!(events, expected, "split at byte {split}");
    }
}

#[test]
fn byte_at_a_time_feed_yields_identical_events() {
    let stream = sample_stream();
    let expected = events_from(&mut LineFramer::new(), &[&stream]);

    let mut framer = LineFramer::new();
    let mut events = Vec::new();
    for byte in &stream {
        for line in framer.push(std::slice::from_ref(byte)) {
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
    }
    assert_eq!(events, expected);
}

#[test]
fn noise_interleaved_with_events_is_dropped() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"starting up...\n");
    bytes.extend_from_slice(br#"{"type":"system","subtype":"init","session_id":"s1"}"#);
    bytes.extend_from_slice(b"\nnot json\n");
    bytes.extend_from_slice(br#"{"type":"result","is_error":false}"#);
    bytes.push(b'\n');

    let events = events_from(&mut LineFramer::new(), &[&bytes]);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].session_id(), Some("s1"));
    assert!(events[1].is_terminal());
}

#[test]
fn final_record_without_newline_is_recovered_by_flush() {
    let bytes = br#"{"type":"result","is_error":false}"#;
    let events = events_from(&mut LineFramer::new(), &[bytes]);
    assert_eq!(events.len(), 1);
    assert!(events[0].is_terminal());
}
