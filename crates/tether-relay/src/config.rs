//! Relay configuration: environment variables with CLI overrides.
//!
//! Every setting is an environment variable first (the deployment surface)
//! and a CLI flag second; clap binds the two. The signing secret is the one
//! hard requirement — the relay refuses to start without it.

use clap::Parser;
use std::time::Duration;
use tether_core::{RelayError, RelayResult};

/// tether-relay — WebSocket pairing relay
#[derive(Parser, Debug)]
#[command(name = "tether-relay", version, about = "WebSocket pairing relay")]
pub struct Cli {
    /// Listen port
    #[arg(long, env = "PORT", default_value_t = 8081)]
    pub port: u16,

    /// HMAC secret for verifying session tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// Hard upper bound on session lifetime, in seconds
    #[arg(long, env = "SESSION_TTL_SECONDS", default_value_t = 86_400)]
    pub session_ttl: u64,

    /// Idle close threshold, in seconds
    #[arg(long, env = "IDLE_TIMEOUT_SECONDS", default_value_t = 1_800)]
    pub idle_timeout: u64,

    /// Per-session JSON replay capacity, in bytes
    #[arg(long, env = "RING_BUFFER_BYTES", default_value_t = 131_072)]
    pub ring_buffer_bytes: usize,

    /// Host→client byte rate cap, in bytes per second
    #[arg(long, env = "RATE_LIMIT_BPS", default_value_t = 65_536)]
    pub rate_limit_bps: u64,

    /// Comma-separated CORS origin allow list (empty allows any origin)
    #[arg(long, env = "CORS_ORIGINS", default_value = "")]
    pub cors_origins: String,

    /// Optional redis URL for the resume-metadata side-store
    #[arg(long, env = "REDIS_URL", default_value = "")]
    pub redis_url: String,

    /// Enable the dev-only POST /api/session mint endpoint
    #[arg(long, env = "RELAY_MINT")]
    pub relay_mint: bool,

    /// Admin bearer for /metrics; when empty the endpoint is not served
    #[arg(long, env = "ADMIN_TOKEN", default_value = "")]
    pub admin_token: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Resolved relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    pub jwt_secret: Vec<u8>,
    pub session_ttl: Duration,
    pub idle_timeout: Duration,
    pub ring_buffer_bytes: usize,
    pub rate_limit_bps: u64,
    pub cors_origins: Vec<String>,
    pub redis_url: Option<String>,
    pub mint_enabled: bool,
    pub admin_token: Option<String>,
}

impl RelayConfig {
    /// Validate and resolve the parsed CLI/environment values.
    pub fn from_cli(cli: &Cli) -> RelayResult<Self> {
        if cli.jwt_secret.is_empty() {
            return Err(RelayError::Config("JWT_SECRET must not be empty".into()));
        }
        if cli.ring_buffer_bytes == 0 {
            return Err(RelayError::Config("RING_BUFFER_BYTES must be positive".into()));
        }
        if cli.rate_limit_bps == 0 {
            return Err(RelayError::Config("RATE_LIMIT_BPS must be positive".into()));
        }

        Ok(Self {
            port: cli.port,
            jwt_secret: cli.jwt_secret.clone().into_bytes(),
            session_ttl: Duration::from_secs(cli.session_ttl),
            idle_timeout: Duration::from_secs(cli.idle_timeout),
            ring_buffer_bytes: cli.ring_buffer_bytes,
            rate_limit_bps: cli.rate_limit_bps,
            cors_origins: parse_origins(&cli.cors_origins),
            redis_url: non_empty(&cli.redis_url),
            mint_enabled: cli.relay_mint,
            admin_token: non_empty(&cli.admin_token),
        })
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(raw: &str) -> Option<String> {
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}
