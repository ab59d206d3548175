//! Metrics surface: counters and gauges for the relay's hot paths.
//!
//! Built on the `metrics` facade with a Prometheus recorder; the exposition
//! string is rendered on demand by the guarded `/metrics` endpoint.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

const ACTIVE_SESSIONS: &str = "active_sessions";
const WS_HOST_CONNECTED: &str = "ws_host_connected_total";
const WS_CLIENT_CONNECTED: &str = "ws_client_connected_total";
const BYTES_HOST_TO_CLIENT: &str = "bytes_host_to_client_total";
const FRAMES_JSON_RING_REPLAYED: &str = "frames_json_ring_replayed_total";
const THROTTLE_EVENTS: &str = "throttle_events_total";
const FRAMES_BINARY_DROPPED: &str = "frames_binary_dropped_total";

/// Install the process-wide Prometheus recorder (idempotent) and return
/// the handle used to render the exposition text.
pub fn recorder() -> &'static PrometheusHandle {
    static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
    HANDLE.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install metrics recorder");
        describe_gauge!(ACTIVE_SESSIONS, "Number of active sessions");
        describe_counter!(WS_HOST_CONNECTED, "Total host WebSocket attaches");
        describe_counter!(WS_CLIENT_CONNECTED, "Total client WebSocket attaches");
        describe_counter!(
            BYTES_HOST_TO_CLIENT,
            "Total binary bytes forwarded from host to client"
        );
        describe_counter!(
            FRAMES_JSON_RING_REPLAYED,
            "Total JSON frames replayed from the ring on client resume"
        );
        describe_counter!(THROTTLE_EVENTS, "Total throttle events emitted");
        describe_counter!(
            FRAMES_BINARY_DROPPED,
            "Total binary frames dropped on a full client egress channel"
        );
        handle
    })
}

pub fn session_opened() {
    gauge!(ACTIVE_SESSIONS).increment(1.0);
}

pub fn sessions_closed(count: usize) {
    gauge!(ACTIVE_SESSIONS).decrement(count as f64);
}

pub fn host_connected() {
    counter!(WS_HOST_CONNECTED).increment(1);
}

pub fn client_connected() {
    counter!(WS_CLIENT_CONNECTED).increment(1);
}

pub fn bytes_host_to_client(n: u64) {
    counter!(BYTES_HOST_TO_CLIENT).increment(n);
}

pub fn frames_replayed(n: u64) {
    counter!(FRAMES_JSON_RING_REPLAYED).increment(n);
}

pub fn throttle_event() {
    counter!(THROTTLE_EVENTS).increment(1);
}

pub fn binary_frame_dropped() {
    counter!(FRAMES_BINARY_DROPPED).increment(1);
}
