//! HTTP server configuration and request routing.
//!
//! Requests flow through middleware in order:
//! 1. Request ID injection
//! 2. Request/response logging
//! 3. Timeout enforcement (30s default)
//! 4. Body size limit (10 MiB)
//! 5. Admin authentication (admin routes only)
//! 6. Handler execution
//!
//! # Graceful Shutdown
//!
//! The server handles SIGTERM and CTRL+C by refusing new connections and
//! letting in-flight requests finish. The caller then stops the delivery
//! engine.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use hookcatch_core::Clock;
use hookcatch_delivery::{DeliveryStore, JobQueue, RetryScheduler};
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    handlers,
    intake::IntakeService,
    middleware::{auth::auth_middleware, auth::AdminAuth, request_id::inject_request_id},
    providers::{ProviderRegistry, ProviderSecrets},
};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Request timeout when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    /// Webhook acceptance path.
    pub intake: IntakeService,
    /// Delivery persistence.
    pub store: Arc<dyn DeliveryStore>,
    /// State machine, used for replay.
    pub scheduler: Arc<RetryScheduler>,
    /// Admin token verifier.
    pub admin_auth: AdminAuth,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wires intake and admin services over one store and queue.
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        queue: Arc<dyn JobQueue>,
        scheduler: Arc<RetryScheduler>,
        secrets: ProviderSecrets,
        jwt_secret: &str,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let providers = ProviderRegistry::from_secrets(secrets, clock.clone());
        Self {
            intake: IntakeService::new(providers, store.clone(), queue, clock.clone()),
            store,
            scheduler,
            admin_auth: AdminAuth::new(jwt_secret, clock.clone()),
            clock,
        }
    }
}

/// Creates the router with the default request timeout.
pub fn create_router(state: AppState) -> Router {
    create_router_with_timeout(state, DEFAULT_REQUEST_TIMEOUT)
}

/// Creates the Axum router with all routes and middleware.
pub fn create_router_with_timeout(state: AppState, request_timeout: Duration) -> Router {
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check));

    let intake_routes = Router::new().route("/webhooks/{provider}", post(handlers::receive_webhook));

    let admin_routes = Router::new()
        .route("/webhooks/deliveries", get(handlers::list_deliveries))
        .route("/webhooks/deliveries/{id}", get(handlers::show_delivery))
        .route("/webhooks/deliveries/{id}/replay", post(handlers::replay_delivery))
        .route("/webhooks/dead_letters", get(handlers::list_dead_letters))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(health_routes)
        .merge(intake_routes)
        .merge(admin_routes)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Serves `app` on `addr` until a shutdown signal arrives.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound.
pub async fn start_server(app: Router, addr: SocketAddr) -> Result<(), std::io::Error> {
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("HTTP server listening on {}", actual_addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    warn!("Draining in-flight requests");
}
