//! HTTP frontend: routing, WebSocket upgrades, CORS, health, guarded
//! metrics, and the optional dev mint endpoint.
//!
//! Authentication happens before the upgrade: a request with a missing or
//! bad token is refused with 400/401 and never reaches a session actor.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tether_core::token::{mint_token, verify_token, Claims};
use thiserror::Error;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, warn};

use crate::config::RelayConfig;
use crate::hub::Hub;

/// Shared state threaded through every handler.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub cfg: Arc<RelayConfig>,
    pub prometheus: PrometheusHandle,
}

/// Build the relay's router.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.cfg.cors_origins);
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_scrape))
        .route("/api/session", post(mint_session))
        .route("/ws/host", get(ws_host))
        .route("/ws/client", get(ws_client))
        .layer(cors)
        .with_state(state)
}

/// HTTP-facing error with a status code mapping.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true}))
}

/// Prometheus exposition, gated by the admin bearer. Without a configured
/// admin token the route does not exist as far as callers can tell.
async fn metrics_scrape(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(admin) = state.cfg.admin_token.as_deref() else {
        return ApiError::NotFound("not found".into()).into_response();
    };
    match bearer_token(&headers) {
        None => ApiError::Unauthorized("unauthorized".into()).into_response(),
        Some(token) if token != admin => ApiError::Forbidden("forbidden".into()).into_response(),
        Some(_) => state.prometheus.render().into_response(),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MintRequest {
    tenant_id: String,
    ttl_seconds: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MintResponse {
    session_id: String,
    token: String,
    ws: WsEndpoints,
    expires_at: String,
}

#[derive(Debug, Serialize)]
struct WsEndpoints {
    host: String,
    client: String,
}

/// Dev-only session mint. Production deployments leave this disabled and
/// mint tokens in the application backend.
async fn mint_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<MintRequest>,
) -> Result<Json<MintResponse>, ApiError> {
    if !state.cfg.mint_enabled {
        return Err(ApiError::BadRequest(
            "minting disabled; create sessions through the application backend".into(),
        ));
    }
    if req.tenant_id.is_empty() || req.ttl_seconds <= 0 {
        return Err(ApiError::BadRequest("invalid tenantId or ttlSeconds".into()));
    }

    let sid = format!("sess_{}", random_session_id());
    let ttl = Duration::from_secs(req.ttl_seconds as u64);
    let token = mint_token(&state.cfg.jwt_secret, &sid, &req.tenant_id, ttl).map_err(|e| {
        error!(error = %e, "token mint failed");
        ApiError::Internal("failed to mint token".into())
    })?;

    let base = ws_base_url(&headers, state.cfg.port);
    let expires_at = (Utc::now() + chrono::Duration::seconds(req.ttl_seconds)).to_rfc3339();

    Ok(Json(MintResponse {
        session_id: sid,
        token,
        ws: WsEndpoints {
            host: format!("{base}/ws/host"),
            client: format!("{base}/ws/client"),
        },
        expires_at,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsQuery {
    session_id: Option<String>,
    token: Option<String>,
    resume_seq: Option<String>,
}

async fn ws_host(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match authorize(&state.cfg, &query) {
        Ok(claims) => claims,
        Err(e) => return e.into_response(),
    };
    let actor = state.hub.get_or_create(&claims.sid, &claims.tid).await;
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = actor.attach_host(socket).await {
            warn!(session_id = %actor.sid(), error = %e, "host attach failed");
        }
    })
}

async fn ws_client(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let resume_seq = match query.resume_seq.as_deref() {
        None | Some("") => 0,
        Some(raw) => match raw.parse::<u64>() {
            Ok(v) => v,
            Err(_) => return ApiError::BadRequest("invalid resumeSeq".into()).into_response(),
        },
    };
    let claims = match authorize(&state.cfg, &query) {
        Ok(claims) => claims,
        Err(e) => return e.into_response(),
    };
    let actor = state.hub.get_or_create(&claims.sid, &claims.tid).await;
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = actor.attach_client(socket, resume_seq).await {
            warn!(session_id = %actor.sid(), error = %e, "client attach failed");
        }
    })
}

/// Check the bearer token and its binding to the requested session.
fn authorize(cfg: &RelayConfig, query: &WsQuery) -> Result<Claims, ApiError> {
    let sid = query.session_id.as_deref().unwrap_or("");
    let token = query.token.as_deref().unwrap_or("");
    if sid.is_empty() || token.is_empty() {
        return Err(ApiError::BadRequest("missing sessionId or token".into()));
    }

    let claims = verify_token(&cfg.jwt_secret, token).map_err(|e| {
        warn!(error = %e, "token verification failed");
        ApiError::Unauthorized("invalid token".into())
    })?;

    if claims.sid != sid {
        // Logged distinctly from a bad signature; callers see the same 401.
        warn!(session_id = %sid, token_sid = %claims.sid, "token session mismatch");
        return Err(ApiError::Unauthorized("invalid token".into()));
    }

    Ok(claims)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        let list: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(AllowOrigin::list(list))
    }
}

fn ws_base_url(headers: &HeaderMap, port: u16) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| format!("localhost:{port}"));
    let scheme = if headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        == Some("https")
    {
        "wss"
    } else {
        "ws"
    };
    format!("{scheme}://{host}")
}

/// Random session id suffix (8 bytes, hex-encoded).
fn random_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..8).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}
