//! Channelstore REST API
//!
//! HTTP API layer for channelstore, built with Axum.
//!
//! # Endpoints
//!
//! ## Root
//! - `GET /` - Endpoint discovery (name → absolute URL)
//!
//! ## Catalog
//! - `GET/POST/DELETE /source/`, `/measure/`, `/channel/`, `/chunk/`
//! - `GET/PUT/DELETE /{resource}/:key/`
//!
//! ## Timeserie
//! - `GET /timeserie/` - Query samples
//! - `POST /timeserie/` - Bulk ingest
//!
//! ## Partitioning
//! - `GET /timescale-config/` - Chunk interval and retention
//! - `POST /timescale-config/` - Change them
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,ignore
//! use channelstore::api::{serve, ApiConfig, AppState, AuthConfig};
//! use channelstore::storage::{Store, StoreConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(Store::open(StoreConfig::default())?);
//!     let config = ApiConfig::default();
//!
//!     let state = AppState::new(store, config.clone(), AuthConfig::default());
//!     serve(state, &config).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod dto;
pub mod error;
pub mod pagination;
pub mod routes;
pub mod state;

pub use auth::{AuthConfig, Caller, JwtManager, Permission, Role};
pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use std::future::Future;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use routes::resource::{ChannelResource, ChunkResource, MeasureResource, SourceResource};

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let max_body_size = state.config.max_body_size;

    let mut api_routes = Router::new()
        .route("/", get(routes::root::api_root))
        .route(
            "/timeserie/",
            get(routes::timeserie::query_timeserie).post(routes::timeserie::ingest_timeserie),
        )
        .route(
            "/timescale-config/",
            get(routes::timescale_config::get_config).post(routes::timescale_config::set_config),
        );
    api_routes = routes::resource::routes::<SourceResource>(api_routes);
    api_routes = routes::resource::routes::<MeasureResource>(api_routes);
    api_routes = routes::resource::routes::<ChannelResource>(api_routes);
    api_routes = routes::resource::routes::<ChunkResource>(api_routes);

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    // Create shared state
    let shared_state = Arc::new(state);

    api_routes
        .nest("/health", health_routes)
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(shared_state)
}

/// Start the API server
pub async fn serve(state: AppState, config: &ApiConfig) -> Result<(), ApiError> {
    serve_until(state, config, shutdown_signal()).await
}

/// Start the API server and stop when `shutdown` resolves
pub async fn serve_until(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ApiError> {
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Channelstore API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Channelstore API shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
