//! Vaultify server entry point.
//!
//! Loads configuration, connects to Postgres, wires the core components
//! into shared state, starts the reaper and HMAC rotator background
//! loops, and serves the HTTP API with graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use vaultify_core::audit::AuditLog;
use vaultify_core::cipher::SecretCipher;
use vaultify_core::hmac_keys::HmacKeyRegistry;
use vaultify_core::rate_limiter::RateLimiter;
use vaultify_core::secret_store::SecretStore;
use vaultify_core::sharing::SharingRuleStore;
use vaultify_core::user::UserStore;
use vaultify_core::{reaper, rotator};

use vaultify_server::auth::PasetoMaker;
use vaultify_server::config::ServerConfig;
use vaultify_server::routes;
use vaultify_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.env)),
        )
        .json()
        .init();

    info!(env = %config.env, "vaultify starting");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url())
        .await
        .context("failed to connect to postgres")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run database migrations")?;

    let state = build_app_state(&config, pool.clone())?;

    state
        .hmac_keys
        .ensure_active_key()
        .await
        .context("failed to ensure an active hmac key exists")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let rotator_interval = config.expiration_check_interval;
    let rotator_staleness = config.hmac_key_staleness;
    let rotator_pool = pool.clone();
    let mut rotator_shutdown = shutdown_rx.clone();
    let rotator_handle = tokio::spawn(async move {
        let registry = HmacKeyRegistry::new(rotator_pool);
        rotator::run(&registry, rotator_interval, rotator_staleness, &mut rotator_shutdown).await;
    });

    let reaper_interval = config.expiration_check_interval;
    let reaper_pool = pool.clone();
    let mut reaper_shutdown = shutdown_rx.clone();
    let reaper_handle = tokio::spawn(async move {
        let secrets = SecretStore::new(reaper_pool.clone());
        let sharing = SharingRuleStore::new(reaper_pool);
        reaper::run(&secrets, &sharing, reaper_interval, &mut reaper_shutdown).await;
    });

    let app = routes::router(Arc::clone(&state)).layer(TraceLayer::new_for_http());

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;

    info!(addr = %bind_addr, "vaultify server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server error")?;

    info!("waiting for background workers to stop");
    let _ = tokio::time::timeout(Duration::from_secs(10), rotator_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(10), reaper_handle).await;

    info!("vaultify server stopped");
    Ok(())
}

fn build_app_state(config: &ServerConfig, pool: sqlx::PgPool) -> anyhow::Result<Arc<AppState>> {
    let cipher = SecretCipher::new(&config.secrets_symmetric_key)
        .map_err(|e| anyhow::anyhow!("failed to build secret cipher: {e}"))?;
    let hmac_keys = HmacKeyRegistry::new(pool.clone());
    let secrets = SecretStore::new(pool.clone());
    let sharing = SharingRuleStore::new(pool.clone());
    let audit = AuditLog::new(pool.clone());
    let users = UserStore::new(pool.clone());
    let rate_limiter = RateLimiter::new(
        &config.redis_addr,
        config.rate_limit_tokens,
        config.rate_limit_refill,
    )
    .map_err(|e| anyhow::anyhow!("failed to build rate limiter: {e}"))?;
    let token_maker = PasetoMaker::new(&config.token_symmetric_key)
        .map_err(|e| anyhow::anyhow!("failed to build token maker: {e}"))?;
    let access_token_duration = chrono::Duration::from_std(config.access_token_duration)
        .map_err(|e| anyhow::anyhow!("invalid access token duration: {e}"))?;

    Ok(Arc::new(AppState {
        cipher,
        hmac_keys,
        secrets,
        sharing,
        audit,
        users,
        rate_limiter,
        token_maker,
        access_token_duration,
    }))
}

/// Waits for SIGINT or SIGTERM, then broadcasts shutdown to background
/// workers.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
    let _ = shutdown_tx.send(true);
}
