//! Frame classification and the relay's JSON control vocabulary.
//!
//! Classification looks at the leading byte only: `{` marks a JSON control
//! frame (sequenced, replayable), anything else — including an empty payload
//! — is binary data. The relay never validates payloads beyond this.

use serde_json::{json, Value};

/// Close reason broadcast when a session idles out.
pub const REASON_IDLE_TIMEOUT: &str = "idle_timeout";
/// Close reason broadcast when the process shuts down.
pub const REASON_SHUTDOWN: &str = "shutdown";
/// Close reason broadcast when a session outlives its TTL.
pub const REASON_TTL_EXPIRED: &str = "ttl_expired";
/// Error message sent to a client whose resume position was evicted.
pub const MSG_OUT_OF_HISTORY: &str = "out_of_history";
/// Error message sent to the host when a client sends binary data.
pub const MSG_BINARY_FROM_CLIENT: &str = "binary not expected from client";

/// How the relay treats a frame, derived from its leading byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Payload begins with `{`: sequenced and recorded for replay.
    Json,
    /// Anything else: rate-limited terminal bytes, never replayed.
    Binary,
}

/// Classify a payload by its leading byte.
pub fn classify(payload: &[u8]) -> FrameKind {
    if payload.first() == Some(&b'{') {
        FrameKind::Json
    } else {
        FrameKind::Binary
    }
}

/// Inject the assigned `seq` into a JSON object payload that lacks one.
///
/// Payloads that fail to parse, are not objects, or already carry a `seq`
/// field are returned unchanged; the assigned seq then lives only in the
/// ring's bookkeeping.
pub fn inject_seq(payload: &[u8], seq: u64) -> Vec<u8> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(mut map)) if !map.contains_key("seq") => {
            map.insert("seq".to_string(), json!(seq));
            serde_json::to_vec(&Value::Object(map)).unwrap_or_else(|_| payload.to_vec())
        }
        _ => payload.to_vec(),
    }
}

/// Build an `err` control frame: `{"t":"err","message":…,"sid":…}`.
pub fn peer_error(sid: &str, message: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "t": "err",
        "message": message,
        "sid": sid,
    }))
    .unwrap_or_default()
}

/// Build a throttle notice: `{"t":"evt","kind":"throttle","bps":…,"sid":…,"seq":…}`.
///
/// `bps` is the configured rate, not the current bucket fill.
pub fn throttle_event(sid: &str, bps: u64, seq: u64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "t": "evt",
        "kind": "throttle",
        "bps": bps,
        "sid": sid,
        "seq": seq,
    }))
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_leading_byte() {
        assert_eq!(classify(b"{\"a\":1}"), FrameKind::Json);
        assert_eq!(classify(b"\x1b[2Jhello"), FrameKind::Binary);
        assert_eq!(classify(b""), FrameKind::Binary);
        // Invalid JSON with a leading brace is still a JSON frame.
        assert_eq!(classify(b"{not json"), FrameKind::Json);
    }

    #[test]
    fn inject_seq_into_object() {
        let out = inject_seq(b"{\"hello\":1}", 7);
        let v: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v["hello"], 1);
        assert_eq!(v["seq"], 7);
    }

    #[test]
    fn inject_seq_preserves_existing() {
        let out = inject_seq(b"{\"seq\":3,\"x\":true}", 9);
        let v: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v["seq"], 3);
    }

    #[test]
    fn inject_seq_leaves_unparseable_payloads_alone() {
        assert_eq!(inject_seq(b"{broken", 1), b"{broken".to_vec());
        assert_eq!(inject_seq(b"[1,2,3]", 1), b"[1,2,3]".to_vec());
    }

    #[test]
    fn control_frames_parse() {
        let v: Value = serde_json::from_slice(&peer_error("s1", MSG_OUT_OF_HISTORY)).unwrap();
        assert_eq!(v["t"], "err");
        assert_eq!(v["message"], "out_of_history");
        assert_eq!(v["sid"], "s1");

        let v: Value = serde_json::from_slice(&throttle_event("s1", 65536, 12)).unwrap();
        assert_eq!(v["t"], "evt");
        assert_eq!(v["kind"], "throttle");
        assert_eq!(v["bps"], 65536);
        assert_eq!(v["seq"], 12);
    }
}
