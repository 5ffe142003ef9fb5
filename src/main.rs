//! School Payment Server - Main Application Entry Point
//!
//! REST API for paying school fees and donations through the Midtrans
//! gateway, with webhook reconciliation and a background sweeper.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Gateway**: Midtrans Snap and Core API over reqwest
//! - **Authentication**: bearer tokens with SHA-256 hashing
//!
//! # Startup Flow
//!
//! 1. Load and validate configuration from environment variables
//! 2. Create database connection pool
//! 3. Run database migrations
//! 4. Wire repository, gateway and signature verifier
//! 5. Start the reconciliation sweeper
//! 6. Start server on configured port

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use school_payment_server::app::{AppState, build_router};
use school_payment_server::config::Config;
use school_payment_server::db;
use school_payment_server::gateway::midtrans::MidtransGateway;
use school_payment_server::gateway::signature::Sha512Signature;
use school_payment_server::repository::postgres::PgRepository;
use school_payment_server::services::notification_service::LogNotifier;
use school_payment_server::services::reconciliation_service;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let repo = Arc::new(PgRepository::new(pool));
    let gateway = MidtransGateway::new(config.midtrans()?, repo.clone())?;

    let state = AppState {
        repo,
        gateway: Arc::new(gateway),
        verifier: Arc::new(Sha512Signature::new(config.midtrans_server_key.clone())),
        notifier: Arc::new(LogNotifier),
        settings: config.engine()?,
    };

    let sweeper = reconciliation_service::spawn_sweeper(state.clone(), config.reconcile_interval());
    tracing::info!(
        interval_secs = config.reconcile_interval_secs,
        "Reconciliation sweeper started"
    );

    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    sweeper.abort();
    Ok(())
}
