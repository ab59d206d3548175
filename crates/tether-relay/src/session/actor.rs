//! Session actor: peer slots, sequencing, forwarding, replay, throttling.
//!
//! One actor per session. It owns the host and client slots, the replay
//! ring, the rate limiter, and the sequence counter. Each attached socket is
//! driven by a single task that multiplexes the slot's egress channel, the
//! inbound stream, keepalive pings, and a read deadline.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tether_core::frame::{self, FrameKind};
use tether_core::{RelayError, RelayResult};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep_until, Instant as TokioInstant};
use tracing::{debug, info, warn};

use crate::metrics;
use crate::session::{RateLimiter, Ring};
use crate::store::SideStore;

/// Egress channel depth per peer slot.
const EGRESS_BUFFER: usize = 256;
/// Largest accepted inbound frame (512 KiB).
const MAX_FRAME_BYTES: usize = 512 << 10;
/// Read deadline, refreshed by any inbound frame (pongs included).
const READ_DEADLINE: Duration = Duration::from_secs(60);
/// Outbound keepalive ping period.
const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Bounded wait for a JSON enqueue before the peer is deemed stalled.
const JSON_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Which slot a connection occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Client,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Client => "client",
        }
    }
}

/// A live connection installed in a slot. Dropping the last clone closes the
/// egress channel and winds down the peer task.
#[derive(Clone)]
struct Peer {
    tx: mpsc::Sender<Message>,
    id: u64,
}

#[derive(Default)]
struct Slots {
    host: Option<Peer>,
    client: Option<Peer>,
}

/// Per-session state machine pairing one host and one client connection.
pub struct SessionActor {
    sid: String,
    tid: String,
    created_at: Instant,
    ttl: Duration,
    idle_timeout: Duration,
    seq: AtomicU64,
    /// Milliseconds since `created_at` of the last processed activity.
    last_active_ms: AtomicU64,
    closed: AtomicBool,
    next_peer_id: AtomicU64,
    slots: Mutex<Slots>,
    ring: Ring,
    rate: RateLimiter,
    store: Option<SideStore>,
}

impl SessionActor {
    pub fn new(
        sid: String,
        tid: String,
        ttl: Duration,
        idle_timeout: Duration,
        ring_bytes: usize,
        rate_bps: u64,
        store: Option<SideStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sid,
            tid,
            created_at: Instant::now(),
            ttl,
            idle_timeout,
            seq: AtomicU64::new(0),
            last_active_ms: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            next_peer_id: AtomicU64::new(1),
            slots: Mutex::new(Slots::default()),
            ring: Ring::new(ring_bytes),
            rate: RateLimiter::new(rate_bps),
            store,
        })
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn tid(&self) -> &str {
        &self.tid
    }

    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Time since the last processed frame or attach.
    pub fn idle_for(&self, now: Instant) -> Duration {
        let last = self.created_at + Duration::from_millis(self.last_active_ms.load(Ordering::Relaxed));
        now.saturating_duration_since(last)
    }

    pub fn is_idle(&self, now: Instant) -> bool {
        self.idle_for(now) > self.idle_timeout
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    fn touch(&self) {
        self.last_active_ms
            .store(self.created_at.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// Install a host connection, replacing (and thereby closing) any prior one.
    pub async fn attach_host(self: &Arc<Self>, socket: WebSocket) -> RelayResult<()> {
        if self.is_closed() {
            return Err(RelayError::SessionClosed);
        }

        let (tx, rx) = mpsc::channel(EGRESS_BUFFER);
        let peer = Peer {
            tx,
            id: self.next_peer_id.fetch_add(1, Ordering::Relaxed),
        };
        tokio::spawn(run_peer(Arc::clone(self), Role::Host, socket, rx, peer.id));

        {
            let mut slots = self.slots.lock().await;
            if self.is_closed() {
                return Err(RelayError::SessionClosed);
            }
            slots.host = Some(peer);
        }

        self.touch();
        metrics::host_connected();
        info!(session_id = %self.sid, "host attached");
        Ok(())
    }

    /// Install a client connection, replaying missed frames first when the
    /// client resumes from a prior position.
    pub async fn attach_client(self: &Arc<Self>, socket: WebSocket, resume_seq: u64) -> RelayResult<()> {
        if self.is_closed() {
            return Err(RelayError::SessionClosed);
        }

        let (tx, rx) = mpsc::channel(EGRESS_BUFFER);
        let peer = Peer {
            tx,
            id: self.next_peer_id.fetch_add(1, Ordering::Relaxed),
        };
        tokio::spawn(run_peer(Arc::clone(self), Role::Client, socket, rx, peer.id));

        // Replay is enqueued before the peer enters the slot, so it precedes
        // any post-resume traffic.
        if resume_seq > 0 {
            match self.ring.oldest_seq() {
                Some(oldest) if resume_seq < oldest => {
                    debug!(session_id = %self.sid, resume_seq, oldest, "resume position evicted");
                    let err = frame::peer_error(&self.sid, frame::MSG_OUT_OF_HISTORY);
                    let _ = peer.tx.send(json_message(err)).await;
                }
                _ => {
                    let frames = self.ring.replay_from(resume_seq);
                    if !frames.is_empty() {
                        let count = frames.len() as u64;
                        for payload in frames {
                            if peer.tx.send(json_message(payload)).await.is_err() {
                                break;
                            }
                        }
                        metrics::frames_replayed(count);
                        debug!(session_id = %self.sid, resume_seq, count, "replayed ring frames");
                    }
                }
            }
        }

        {
            let mut slots = self.slots.lock().await;
            if self.is_closed() {
                return Err(RelayError::SessionClosed);
            }
            slots.client = Some(peer);
        }

        self.touch();
        metrics::client_connected();
        info!(session_id = %self.sid, resume_seq, "client attached");
        Ok(())
    }

    async fn process_inbound(&self, role: Role, payload: Vec<u8>) {
        if self.is_closed() {
            return;
        }
        self.touch();
        match role {
            Role::Host => self.forward_host_to_client(payload).await,
            Role::Client => self.forward_client_to_host(payload).await,
        }
    }

    async fn forward_host_to_client(&self, payload: Vec<u8>) {
        match frame::classify(&payload) {
            FrameKind::Json => {
                let mut slots = self.slots.lock().await;
                let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
                let out = frame::inject_seq(&payload, seq);
                // Recorded even with no client attached, so a resuming
                // client can catch up on what it missed.
                self.ring.push(seq, &out);
                self.send_json(&mut slots.client, out).await;
            }
            FrameKind::Binary => {
                let mut slots = self.slots.lock().await;
                if slots.client.is_none() {
                    return;
                }
                if self.rate.allow(payload.len()) {
                    let n = payload.len() as u64;
                    let Some(tx) = slots.client.as_ref().map(|p| p.tx.clone()) else {
                        return;
                    };
                    match tx.try_send(Message::Binary(payload.into())) {
                        Ok(()) => metrics::bytes_host_to_client(n),
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            metrics::binary_frame_dropped();
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            slots.client = None;
                        }
                    }
                } else {
                    let evt = frame::throttle_event(
                        &self.sid,
                        self.rate.capacity(),
                        self.seq.load(Ordering::SeqCst),
                    );
                    metrics::throttle_event();
                    self.send_json(&mut slots.client, evt).await;
                }
            }
        }
    }

    async fn forward_client_to_host(&self, payload: Vec<u8>) {
        match frame::classify(&payload) {
            FrameKind::Json => {
                let mut slots = self.slots.lock().await;
                let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
                let out = frame::inject_seq(&payload, seq);
                self.ring.push(seq, &out);
                self.send_json(&mut slots.host, out).await;
            }
            FrameKind::Binary => {
                // Protocol violation: the offending frame is dropped and the
                // host is told, but the session survives.
                warn!(session_id = %self.sid, "binary frame from client");
                let mut slots = self.slots.lock().await;
                let err = frame::peer_error(&self.sid, frame::MSG_BINARY_FROM_CLIENT);
                self.send_json(&mut slots.host, err).await;
            }
        }
    }

    /// Enqueue a JSON frame on a slot. A peer that is gone or cannot drain
    /// within the bounded window loses its slot.
    async fn send_json(&self, slot: &mut Option<Peer>, payload: Vec<u8>) {
        let Some(tx) = slot.as_ref().map(|p| p.tx.clone()) else {
            return;
        };
        match tokio::time::timeout(JSON_SEND_TIMEOUT, tx.send(json_message(payload))).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                *slot = None;
            }
            Err(_) => {
                warn!(session_id = %self.sid, "json enqueue stalled, dropping peer");
                *slot = None;
            }
        }
    }

    /// Orderly close. Idempotent: subsequent calls produce no new frames.
    pub async fn close(&self, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(session_id = %self.sid, reason, "closing session");

        let notice = frame::peer_error(&self.sid, reason);
        let mut slots = self.slots.lock().await;
        if let Some(host) = slots.host.take() {
            let _ = host.tx.try_send(json_message(notice.clone()));
        }
        if let Some(client) = slots.client.take() {
            let _ = client.tx.try_send(json_message(notice));
        }
        drop(slots);

        self.persist_metadata().await;
    }

    /// Write `{tenantId, lastSeq, expiresAt}` to the side-store, if configured.
    pub async fn persist_metadata(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.sid, &self.tid, self.last_seq()).await {
                warn!(session_id = %self.sid, error = %e, "failed to persist session metadata");
            }
        }
    }

    async fn detach(&self, role: Role, peer_id: u64) {
        let mut slots = self.slots.lock().await;
        let slot = match role {
            Role::Host => &mut slots.host,
            Role::Client => &mut slots.client,
        };
        if slot.as_ref().is_some_and(|p| p.id == peer_id) {
            *slot = None;
            debug!(session_id = %self.sid, peer = role.as_str(), "peer detached");
        }
    }
}

/// Drive one attached socket: egress channel to the sink, inbound frames to
/// the actor, periodic pings, and a read deadline. Ends when the socket
/// fails, the deadline lapses, or the slot is replaced (egress closes).
async fn run_peer(
    actor: Arc<SessionActor>,
    role: Role,
    socket: WebSocket,
    mut rx: mpsc::Receiver<Message>,
    peer_id: u64,
) {
    let (mut sink, mut stream) = socket.split();
    let mut ping = tokio::time::interval(PING_INTERVAL);
    let mut deadline = TokioInstant::now() + READ_DEADLINE;

    loop {
        tokio::select! {
            out = rx.recv() => match out {
                Some(msg) => {
                    if sink.send(msg).await.is_err() {
                        break;
                    }
                }
                None => {
                    // Slot replaced or session closed.
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(msg)) => {
                    deadline = TokioInstant::now() + READ_DEADLINE;
                    match msg {
                        Message::Text(text) => {
                            let data = text.as_str().as_bytes().to_vec();
                            if data.len() > MAX_FRAME_BYTES {
                                warn!(session_id = %actor.sid, peer = role.as_str(), "inbound frame too large");
                                break;
                            }
                            actor.process_inbound(role, data).await;
                        }
                        Message::Binary(data) => {
                            if data.len() > MAX_FRAME_BYTES {
                                warn!(session_id = %actor.sid, peer = role.as_str(), "inbound frame too large");
                                break;
                            }
                            actor.process_inbound(role, data.to_vec()).await;
                        }
                        Message::Ping(_) | Message::Pong(_) => {}
                        Message::Close(_) => break,
                    }
                }
                Some(Err(e)) => {
                    debug!(session_id = %actor.sid, peer = role.as_str(), error = %e, "socket error");
                    break;
                }
                None => break,
            },
            _ = sleep_until(deadline) => {
                debug!(session_id = %actor.sid, peer = role.as_str(), "read deadline exceeded");
                break;
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    actor.detach(role, peer_id).await;
    debug!(session_id = %actor.sid, peer = role.as_str(), "peer task ended");
}

/// Wrap a relay-originated JSON payload as a text frame. Payloads that are
/// not valid UTF-8 go out as binary, matching how they were classified.
fn json_message(payload: Vec<u8>) -> Message {
    match String::from_utf8(payload) {
        Ok(text) => Message::Text(text.into()),
        Err(e) => Message::Binary(e.into_bytes().into()),
    }
}
