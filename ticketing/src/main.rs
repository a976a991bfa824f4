//! Payment reconciliation HTTP server.
//!
//! Starts checkouts with PaySuite and reconciles their outcome from webhooks
//! and from payers returning to the site.

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use ticketing::{
    config::Config,
    initiation::InitiationSettings,
    metrics,
    provider::PaySuiteClient,
    server::{build_router, AppState},
    store::PostgresPaymentStore,
};
use ticketing_core::environment::SystemClock;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ticketing=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting payment reconciliation server");

    // Load configuration
    let config = Config::from_env().context("invalid configuration")?;
    info!(
        public_base_url = %config.server.public_base_url,
        provider = ?config.provider,
        "Configuration loaded"
    );
    if config.provider.webhook_secret.is_none() {
        warn!("PAYSUITE_WEBHOOK_SECRET is not set; all webhooks will be rejected");
    }

    // Setup metrics
    metrics::register_business_metrics();
    let metrics_addr: SocketAddr =
        format!("{}:{}", config.server.metrics_host, config.server.metrics_port).parse()
            .context("invalid metrics address")?;
    metrics::install_prometheus(metrics_addr).context("failed to install Prometheus exporter")?;

    // Setup database
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
        .connect(&config.postgres.url)
        .await
        .context("failed to connect to database")?;
    let store = PostgresPaymentStore::new(pool);
    store.migrate().await.context("failed to run migrations")?;
    info!("Database ready");

    // Setup provider client
    let provider = PaySuiteClient::new(config.provider.clone()).context("failed to build PaySuite client")?;

    let state = AppState::new(
        Arc::new(store),
        Arc::new(provider),
        Arc::new(SystemClock),
        InitiationSettings::from_config(&config),
        config.provider.webhook_secret.clone(),
    );
    let app = build_router(state);

    // Create server address
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "Server listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Graceful shutdown signal handler.
///
/// Waits for:
/// - Ctrl+C (SIGINT)
/// - SIGTERM (in production environments)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
