//! Signed session tokens for the relay.
//!
//! Tokens bind a session id and tenant id to an expiry time and are
//! HMAC-signed (HS256) with the relay's shared secret. The relay verifies
//! tokens minted elsewhere; in dev deployments it can mint them itself.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{RelayError, RelayResult};

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Session id the token grants access to.
    pub sid: String,
    /// Tenant tag copied into the session on creation.
    pub tid: String,
    /// Expiry as Unix seconds.
    pub exp: u64,
}

/// Mint a session token valid for `ttl` from now.
pub fn mint_token(
    secret: &[u8],
    session_id: &str,
    tenant_id: &str,
    ttl: Duration,
) -> RelayResult<String> {
    let claims = Claims {
        sid: session_id.to_string(),
        tid: tenant_id.to_string(),
        exp: unix_now() + ttl.as_secs(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| RelayError::Token(e.to_string()))
}

/// Verify a session token and return its claims.
///
/// Rejects tokens signed with any algorithm other than HS256, bad
/// signatures, missing claims, and expired tokens (no leeway).
pub fn verify_token(secret: &[u8], token: &str) -> RelayResult<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp"]);

    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .map_err(|e| RelayError::Token(e.to_string()))?;
    Ok(data.claims)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
