//! Optional redis side-store for resume metadata.
//!
//! Persists `{tenantId, lastSeq, expiresAt}` per session so observability
//! tooling (and a future durable-resume path) can see where a session left
//! off. Replay payloads never leave the in-memory ring.

use redis::AsyncCommands;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tether_core::{RelayError, RelayResult};

/// Handle to the metadata side-store.
#[derive(Clone)]
pub struct SideStore {
    client: Arc<redis::Client>,
    ttl: Duration,
}

impl SideStore {
    /// Open a side-store from a redis URL. Validates the URL only; the
    /// connection is established lazily per write.
    pub fn open(url: &str, ttl: Duration) -> RelayResult<Self> {
        let client = redis::Client::open(url).map_err(|e| RelayError::Store(e.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
            ttl,
        })
    }

    /// Persist session metadata under `relay:sess:<sid>` with the session TTL.
    pub async fn save(&self, sid: &str, tid: &str, last_seq: u64) -> RelayResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RelayError::Store(e.to_string()))?;

        let expires_at = unix_now() + self.ttl.as_secs();
        let value = json!({
            "tenantId": tid,
            "lastSeq": last_seq,
            "expiresAt": expires_at,
        })
        .to_string();

        let _: () = conn
            .set_ex(format!("relay:sess:{sid}"), value, self.ttl.as_secs())
            .await
            .map_err(|e| RelayError::Store(e.to_string()))?;
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
