//! tether-relay entry point: configuration, startup logging, signal-driven
//! shutdown.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use tether_relay::config::{Cli, RelayConfig};
use tether_relay::hub::{Hub, HubConfig};
use tether_relay::server::{self, AppState};
use tether_relay::metrics;
use tether_relay::store::SideStore;

/// Grace window for draining sessions after the listener stops.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let cfg = match RelayConfig::from_cli(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = cfg.port,
        "starting tether-relay"
    );
    info!(
        session_ttl_secs = cfg.session_ttl.as_secs(),
        idle_timeout_secs = cfg.idle_timeout.as_secs(),
        ring_buffer_bytes = cfg.ring_buffer_bytes,
        rate_limit_bps = cfg.rate_limit_bps,
        "session limits"
    );
    if cfg.cors_origins.is_empty() {
        info!("CORS: any origin");
    } else {
        info!(origins = ?cfg.cors_origins, "CORS allow list");
    }
    info!(
        side_store = cfg.redis_url.is_some(),
        mint = cfg.mint_enabled,
        metrics = cfg.admin_token.is_some(),
        "optional features"
    );

    let store = match &cfg.redis_url {
        Some(url) => match SideStore::open(url, cfg.session_ttl) {
            Ok(store) => Some(store),
            Err(e) => {
                error!(error = %e, "invalid REDIS_URL");
                std::process::exit(1);
            }
        },
        None => None,
    };

    let prometheus = metrics::recorder().clone();

    let hub = Hub::new(
        HubConfig {
            session_ttl: cfg.session_ttl,
            idle_timeout: cfg.idle_timeout,
            ring_buffer_bytes: cfg.ring_buffer_bytes,
            rate_limit_bps: cfg.rate_limit_bps,
        },
        store,
    );
    let reaper = hub.spawn_reaper();

    let state = AppState {
        hub: Arc::clone(&hub),
        cfg: Arc::new(cfg.clone()),
        prometheus,
    };
    let app = server::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, %addr, "failed to bind listen port");
            std::process::exit(1);
        }
    };
    info!(%addr, "listening");

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = serve.await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("draining sessions");
    reaper.abort();
    if tokio::time::timeout(SHUTDOWN_GRACE, hub.close_all())
        .await
        .is_err()
    {
        error!("session drain exceeded grace window");
    }

    info!("tether-relay stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
