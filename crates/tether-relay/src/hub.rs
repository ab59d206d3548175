//! Session registry: create-or-lookup by id, lifecycle reaping, shutdown.
//!
//! The hub owns the map from session id to actor and keeps the
//! `active_sessions` gauge consistent with it under the map lock. A single
//! reaper task closes sessions past their idle timeout or TTL and refreshes
//! side-store metadata for open sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tether_core::frame;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::metrics;
use crate::session::SessionActor;
use crate::store::SideStore;

/// Reaper granularity. Idle and TTL deadlines are observed within one tick.
const REAP_INTERVAL: Duration = Duration::from_secs(1);
/// Side-store refresh period for open sessions, in reaper ticks.
const PERSIST_EVERY_TICKS: u64 = 30;

/// Per-session settings handed to every new actor.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub session_ttl: Duration,
    pub idle_timeout: Duration,
    pub ring_buffer_bytes: usize,
    pub rate_limit_bps: u64,
}

/// Registry of live session actors.
pub struct Hub {
    sessions: RwLock<HashMap<String, Arc<SessionActor>>>,
    config: HubConfig,
    store: Option<SideStore>,
}

impl Hub {
    pub fn new(config: HubConfig, store: Option<SideStore>) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            store,
        })
    }

    /// Return the actor for `sid`, creating it on first connect. An actor
    /// that outlived its TTL is closed and replaced.
    pub async fn get_or_create(&self, sid: &str, tid: &str) -> Arc<SessionActor> {
        let mut sessions = self.sessions.write().await;

        match sessions.get(sid) {
            Some(actor) if !actor.is_expired(Instant::now()) => return Arc::clone(actor),
            Some(_) => {
                // Stale entry: session outlived its TTL, replace it.
                if let Some(expired) = sessions.remove(sid) {
                    metrics::sessions_closed(1);
                    tokio::spawn(async move {
                        expired.close(frame::REASON_TTL_EXPIRED).await;
                    });
                }
            }
            None => {}
        }

        let actor = SessionActor::new(
            sid.to_string(),
            tid.to_string(),
            self.config.session_ttl,
            self.config.idle_timeout,
            self.config.ring_buffer_bytes,
            self.config.rate_limit_bps,
            self.store.clone(),
        );
        sessions.insert(sid.to_string(), Arc::clone(&actor));
        metrics::session_opened();
        info!(session_id = %sid, tenant_id = %tid, "session created");
        actor
    }

    /// Remove and close a session. No-op for unknown ids.
    pub async fn close(&self, sid: &str, reason: &str) {
        let actor = {
            let mut sessions = self.sessions.write().await;
            let actor = sessions.remove(sid);
            if actor.is_some() {
                metrics::sessions_closed(1);
            }
            actor
        };
        if let Some(actor) = actor {
            actor.close(reason).await;
        }
    }

    /// Close every session with reason `shutdown`. Used on process exit.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<SessionActor>> = {
            let mut sessions = self.sessions.write().await;
            let drained = sessions.drain().map(|(_, actor)| actor).collect::<Vec<_>>();
            metrics::sessions_closed(drained.len());
            drained
        };
        info!(count = drained.len(), "closing all sessions");
        for actor in drained {
            actor.close(frame::REASON_SHUTDOWN).await;
        }
    }

    /// Number of live sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Start the lifecycle reaper. Aborted by the caller on shutdown.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(REAP_INTERVAL);
            let mut ticks: u64 = 0;
            loop {
                tick.tick().await;
                ticks += 1;

                let now = Instant::now();
                let expired: Vec<(String, &'static str)> = {
                    let sessions = hub.sessions.read().await;
                    sessions
                        .values()
                        .filter_map(|actor| {
                            if actor.is_expired(now) {
                                Some((actor.sid().to_string(), frame::REASON_TTL_EXPIRED))
                            } else if actor.is_idle(now) {
                                Some((actor.sid().to_string(), frame::REASON_IDLE_TIMEOUT))
                            } else {
                                None
                            }
                        })
                        .collect()
                };
                for (sid, reason) in expired {
                    debug!(session_id = %sid, reason, "reaping session");
                    hub.close(&sid, reason).await;
                }

                if hub.store.is_some() && ticks % PERSIST_EVERY_TICKS == 0 {
                    let actors: Vec<Arc<SessionActor>> =
                        hub.sessions.read().await.values().cloned().collect();
                    for actor in actors {
                        actor.persist_metadata().await;
                    }
                }
            }
        })
    }
}
