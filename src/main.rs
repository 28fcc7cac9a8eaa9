//! hookcatch webhook intake service.
//!
//! Loads configuration, connects to PostgreSQL, starts the delivery engine
//! and serves HTTP until a shutdown signal arrives.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use hookcatch_api::{create_router_with_timeout, start_server, AppState, Config};
use hookcatch_core::{storage::Storage, Clock, RealClock};
use hookcatch_delivery::{
    DeliveryEngine, DeliveryProcessor, DeliveryStore, InProcessQueue, PostgresDeliveryStore,
    RetryScheduler,
};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

const MAX_CONNECT_RETRIES: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting hookcatch");

    let config = Config::load()?;
    let addr = config.parse_server_addr()?;
    info!(
        database_url = %config.database_url_masked(),
        %addr,
        worker_count = config.worker_count,
        "configuration loaded"
    );

    let pool = create_database_pool(&config).await?;
    sqlx::migrate!("./migrations").run(&pool).await.context("failed to run migrations")?;
    info!("database migrations applied");

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let store: Arc<dyn DeliveryStore> =
        Arc::new(PostgresDeliveryStore::new(Arc::new(Storage::new(pool.clone()))));
    let (queue, receiver) = InProcessQueue::new(clock.clone());
    let queue = Arc::new(queue);

    let processor = DeliveryProcessor::with_default_handlers();
    info!(routes = processor.route_count(), "handler table loaded");

    let scheduler = Arc::new(RetryScheduler::new(
        store.clone(),
        Arc::new(processor),
        queue.clone(),
        config.to_retry_policy(),
        clock.clone(),
    ));

    let mut engine = DeliveryEngine::new(
        store.clone(),
        queue.clone(),
        receiver,
        scheduler.clone(),
        config.to_engine_config(),
        clock.clone(),
    );
    engine.start().await;

    if config.jwt_secret.is_empty() {
        warn!("JWT_SECRET is empty, admin endpoints will reject every request");
    }

    let state = AppState::new(
        store,
        queue.clone(),
        scheduler,
        config.provider_secrets(),
        &config.jwt_secret,
        clock,
    );
    let app = create_router_with_timeout(state, Duration::from_secs(config.request_timeout_secs));

    if let Err(e) = start_server(app, addr).await {
        error!(error = %e, "HTTP server failed");
    }

    info!("HTTP server stopped, draining delivery workers");
    queue.close();
    if let Err(e) = engine.shutdown().await {
        warn!(error = %e, "delivery engine did not stop cleanly");
    }

    pool.close().await;
    info!("hookcatch shutdown complete");
    Ok(())
}

/// Installs the fmt subscriber, filtered by `RUST_LOG`.
fn init_tracing() -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,hookcatch=debug,tower_http=debug,sqlx=warn"))
        .context("invalid RUST_LOG filter")?;

    let fmt_layer = fmt::layer().with_target(true).with_thread_ids(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Connects to PostgreSQL, retrying while the database comes up.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    let mut retries = 0;

    loop {
        let connected = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&config.database_url)
            .await;

        match connected {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .execute(&pool)
                    .await
                    .context("failed to verify database connection")?;
                info!("database connection pool established");
                return Ok(pool);
            },
            Err(e) if retries < MAX_CONNECT_RETRIES => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries = MAX_CONNECT_RETRIES,
                    error = %e,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to connect to database after retries");
            },
        }
    }
}
