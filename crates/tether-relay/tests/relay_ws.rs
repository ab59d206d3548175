//! End-to-end relay tests: real listener, real WebSocket peers.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use tether_relay::config::RelayConfig;
use tether_relay::hub::{Hub, HubConfig};
use tether_relay::metrics;
use tether_relay::server::{self, AppState};

const SECRET: &[u8] = b"test-secret";

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestRelay {
    addr: SocketAddr,
    hub: Arc<Hub>,
}

impl TestRelay {
    fn http(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    fn ws_url(&self, path: &str, sid: &str, token: &str, resume: Option<&str>) -> String {
        let mut url = format!("ws://{}{path}?sessionId={sid}&token={token}", self.addr);
        if let Some(r) = resume {
            url.push_str("&resumeSeq=");
            url.push_str(r);
        }
        url
    }
}

async fn start_relay(mutate: impl FnOnce(&mut RelayConfig)) -> TestRelay {
    let mut cfg = RelayConfig {
        port: 0,
        jwt_secret: SECRET.to_vec(),
        session_ttl: Duration::from_secs(3600),
        idle_timeout: Duration::from_secs(600),
        ring_buffer_bytes: 128 * 1024,
        rate_limit_bps: 64 * 1024,
        cors_origins: Vec::new(),
        redis_url: None,
        mint_enabled: false,
        admin_token: None,
    };
    mutate(&mut cfg);

    let hub = Hub::new(
        HubConfig {
            session_ttl: cfg.session_ttl,
            idle_timeout: cfg.idle_timeout,
            ring_buffer_bytes: cfg.ring_buffer_bytes,
            rate_limit_bps: cfg.rate_limit_bps,
        },
        None,
    );
    hub.spawn_reaper();

    let state = AppState {
        hub: Arc::clone(&hub),
        cfg: Arc::new(cfg),
        prometheus: metrics::recorder().clone(),
    };
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestRelay { addr, hub }
}

fn mint(sid: &str) -> String {
    tether_core::mint_token(SECRET, sid, "tenant-a", Duration::from_secs(600)).unwrap()
}

async fn connect(url: &str) -> Ws {
    let (ws, _) = connect_async(url).await.expect("websocket connect");
    ws
}

async fn connect_status(url: &str) -> u16 {
    match connect_async(url).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(resp)) => resp.status().as_u16(),
        other => panic!("expected http rejection, got {other:?}"),
    }
}

/// Next data frame (text or binary), skipping pings/pongs. `None` on close.
async fn recv_data(ws: &mut Ws) -> Option<Message> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")?;
        match msg.expect("websocket read") {
            m @ (Message::Text(_) | Message::Binary(_)) => return Some(m),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

async fn recv_json(ws: &mut Ws) -> Value {
    match recv_data(ws).await {
        Some(Message::Text(text)) => serde_json::from_str(text.as_str()).expect("json frame"),
        other => panic!("expected text frame, got {other:?}"),
    }
}

/// Assert nothing arrives within a short window.
async fn assert_silent(ws: &mut Ws, window: Duration) {
    let result = tokio::time::timeout(window, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                other => return other,
            }
        }
    })
    .await;
    if let Ok(frame) = result {
        panic!("expected silence, got {frame:?}");
    }
}

// --- HTTP surface ---------------------------------------------------------

#[tokio::test]
async fn healthz_always_ok() {
    let relay = start_relay(|_| {}).await;
    let resp = reqwest::get(relay.http("/healthz")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn metrics_hidden_without_admin_token() {
    let relay = start_relay(|_| {}).await;
    let resp = reqwest::get(relay.http("/metrics")).await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn metrics_gated_by_admin_bearer() {
    let relay = start_relay(|cfg| cfg.admin_token = Some("admin-1".into())).await;
    let client = reqwest::Client::new();

    let resp = client.get(relay.http("/metrics")).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(relay.http("/metrics"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = client
        .get(relay.http("/metrics"))
        .bearer_auth("admin-1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn mint_disabled_by_default() {
    let relay = start_relay(|_| {}).await;
    let resp = reqwest::Client::new()
        .post(relay.http("/api/session"))
        .json(&serde_json::json!({"tenantId": "t1", "ttlSeconds": 600}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn mint_round_trips_through_the_verifier() {
    let relay = start_relay(|cfg| cfg.mint_enabled = true).await;
    let resp = reqwest::Client::new()
        .post(relay.http("/api/session"))
        .json(&serde_json::json!({"tenantId": "t1", "ttlSeconds": 600}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();

    let sid = body["sessionId"].as_str().unwrap();
    assert!(sid.starts_with("sess_"));
    let claims = tether_core::verify_token(SECRET, body["token"].as_str().unwrap()).unwrap();
    assert_eq!(claims.sid, sid);
    assert_eq!(claims.tid, "t1");
    assert!(body["ws"]["host"].as_str().unwrap().ends_with("/ws/host"));
    assert!(body["ws"]["client"].as_str().unwrap().ends_with("/ws/client"));
}

#[tokio::test]
async fn mint_rejects_bad_requests() {
    let relay = start_relay(|cfg| cfg.mint_enabled = true).await;
    let resp = reqwest::Client::new()
        .post(relay.http("/api/session"))
        .json(&serde_json::json!({"tenantId": "", "ttlSeconds": 600}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn ws_upgrade_rejections() {
    let relay = start_relay(|_| {}).await;
    let token = mint("s1");

    // Missing parameters.
    let url = format!("ws://{}/ws/host", relay.addr);
    assert_eq!(connect_status(&url).await, 400);

    // Garbage token.
    let url = relay.ws_url("/ws/host", "s1", "garbage", None);
    assert_eq!(connect_status(&url).await, 401);

    // Token minted for a different session.
    let url = relay.ws_url("/ws/host", "s2", &token, None);
    assert_eq!(connect_status(&url).await, 401);

    // Malformed resumeSeq.
    let url = relay.ws_url("/ws/client", "s1", &token, Some("nope"));
    assert_eq!(connect_status(&url).await, 400);
}

// --- End-to-end scenarios -------------------------------------------------

#[tokio::test]
async fn happy_pair_forwards_json_then_binary() {
    let relay = start_relay(|_| {}).await;
    let token = mint("s1");

    let mut host = connect(&relay.ws_url("/ws/host", "s1", &token, None)).await;
    let mut client = connect(&relay.ws_url("/ws/client", "s1", &token, None)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    host.send(Message::Text(r#"{"hello":1}"#.into())).await.unwrap();
    host.send(Message::Binary(vec![0x61, 0x62].into())).await.unwrap();

    let json = recv_json(&mut client).await;
    assert_eq!(json["hello"], 1);
    assert_eq!(json["seq"], 1);

    match recv_data(&mut client).await {
        Some(Message::Binary(data)) => assert_eq!(data.as_ref(), b"ab"),
        other => panic!("expected binary frame, got {other:?}"),
    }
}

#[tokio::test]
async fn client_reconnect_replays_missed_frames() {
    let relay = start_relay(|_| {}).await;
    let token = mint("s1");

    let mut host = connect(&relay.ws_url("/ws/host", "s1", &token, None)).await;
    let mut client = connect(&relay.ws_url("/ws/client", "s1", &token, None)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    for n in 1..=3 {
        host.send(Message::Text(format!(r#"{{"n":{n}}}"#).into()))
            .await
            .unwrap();
    }

    // See n=1 and n=2, then drop off recording resumeSeq=2.
    assert_eq!(recv_json(&mut client).await["n"], 1);
    assert_eq!(recv_json(&mut client).await["n"], 2);
    client.close(None).await.unwrap();
    drop(client);

    let mut client = connect(&relay.ws_url("/ws/client", "s1", &token, Some("2"))).await;
    let json = recv_json(&mut client).await;
    assert_eq!(json["n"], 3);
    assert_eq!(json["seq"], 3);
}

#[tokio::test]
async fn resume_beyond_retained_history_errors() {
    let relay = start_relay(|cfg| cfg.ring_buffer_bytes = 32).await;
    let token = mint("s1");

    let mut host = connect(&relay.ws_url("/ws/host", "s1", &token, None)).await;
    let payload = format!(r#"{{"x":"{}"}}"#, "a".repeat(20));
    host.send(Message::Text(payload.clone().into())).await.unwrap();
    host.send(Message::Text(payload.into())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Frame 1 has been evicted; only seq=2 is retained.
    let mut client = connect(&relay.ws_url("/ws/client", "s1", &token, Some("1"))).await;
    let json = recv_json(&mut client).await;
    assert_eq!(json["t"], "err");
    assert_eq!(json["message"], "out_of_history");
    assert_eq!(json["sid"], "s1");

    assert_silent(&mut client, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn throttled_binary_is_dropped_with_notice() {
    let relay = start_relay(|cfg| cfg.rate_limit_bps = 10).await;
    let token = mint("s1");

    let mut host = connect(&relay.ws_url("/ws/host", "s1", &token, None)).await;
    let mut client = connect(&relay.ws_url("/ws/client", "s1", &token, None)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    host.send(Message::Binary(vec![0u8; 100].into())).await.unwrap();

    let json = recv_json(&mut client).await;
    assert_eq!(json["t"], "evt");
    assert_eq!(json["kind"], "throttle");
    assert_eq!(json["bps"], 10);
    assert_eq!(json["sid"], "s1");

    // The binary frame itself never arrives.
    assert_silent(&mut client, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn binary_from_client_is_a_violation() {
    let relay = start_relay(|_| {}).await;
    let token = mint("s1");

    let mut host = connect(&relay.ws_url("/ws/host", "s1", &token, None)).await;
    let mut client = connect(&relay.ws_url("/ws/client", "s1", &token, None)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    client.send(Message::Binary(vec![0xFF].into())).await.unwrap();

    let json = recv_json(&mut host).await;
    assert_eq!(json["t"], "err");
    assert_eq!(json["message"], "binary not expected from client");
    assert_eq!(json["sid"], "s1");

    // The session survives: control traffic still flows both ways.
    client.send(Message::Text(r#"{"cmd":"ls"}"#.into())).await.unwrap();
    let json = recv_json(&mut host).await;
    assert_eq!(json["cmd"], "ls");

    host.send(Message::Text(r#"{"ack":true}"#.into())).await.unwrap();
    let json = recv_json(&mut client).await;
    assert_eq!(json["ack"], true);
}

#[tokio::test]
async fn idle_session_closes_both_peers() {
    let relay = start_relay(|cfg| cfg.idle_timeout = Duration::from_secs(1)).await;
    let token = mint("s1");

    let mut host = connect(&relay.ws_url("/ws/host", "s1", &token, None)).await;
    let mut client = connect(&relay.ws_url("/ws/client", "s1", &token, None)).await;
    assert_eq!(relay.hub.count().await, 1);

    // Silence until the reaper fires.
    let json = recv_json(&mut client).await;
    assert_eq!(json["t"], "err");
    assert_eq!(json["message"], "idle_timeout");

    let json = recv_json(&mut host).await;
    assert_eq!(json["message"], "idle_timeout");

    // Both sockets close and the hub forgets the session.
    assert!(recv_data(&mut client).await.is_none());
    assert!(recv_data(&mut host).await.is_none());

    for _ in 0..20 {
        if relay.hub.count().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(relay.hub.count().await, 0);
}

#[tokio::test]
async fn host_reattach_is_last_write_wins() {
    let relay = start_relay(|_| {}).await;
    let token = mint("s1");

    let mut first = connect(&relay.ws_url("/ws/host", "s1", &token, None)).await;
    let mut second = connect(&relay.ws_url("/ws/host", "s1", &token, None)).await;
    let mut client = connect(&relay.ws_url("/ws/client", "s1", &token, None)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The displaced host's socket is closed by the relay.
    assert!(recv_data(&mut first).await.is_none());

    second.send(Message::Text(r#"{"from":"second"}"#.into())).await.unwrap();
    let json = recv_json(&mut client).await;
    assert_eq!(json["from"], "second");
    assert_eq!(relay.hub.count().await, 1);
}
