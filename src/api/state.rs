//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use std::sync::Arc;
use std::time::Instant;

use crate::api::auth::{AuthConfig, JwtManager};
use crate::api::error::{ApiError, ApiResult};
use crate::storage::Store;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Catalog and sample store
    pub store: Arc<Store>,
    /// API configuration
    pub config: Arc<ApiConfig>,
    /// Token validation
    pub jwt: Arc<JwtManager>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(store: Arc<Store>, config: ApiConfig, auth: AuthConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
            jwt: Arc::new(JwtManager::new(auth)),
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Run a store call on the blocking pool.
    ///
    /// The store serialises on one connection mutex, so handlers never take
    /// it on a runtime worker.
    pub async fn with_store<T, E, F>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Store) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Into<ApiError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| ApiError::Internal(format!("Store task failed: {}", e)))?
            .map_err(Into::into)
    }
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Base URL used in pagination links and the API root.
    /// Derived from the Host header when unset.
    pub public_url: Option<String>,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// Page size for catalog lists and chunk-grouped queries
    pub page_size: u64,
    /// Page size for sample queries
    pub timeserie_page_size: u64,
    /// Upper bound for a client-provided `page_size`
    pub max_page_size: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            public_url: None,
            max_body_size: 100 * 1024 * 1024, // 100MB
            page_size: 16,
            timeserie_page_size: 1024,
            max_page_size: 10_000,
        }
    }
}

impl ApiConfig {
    /// Create config with custom host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
