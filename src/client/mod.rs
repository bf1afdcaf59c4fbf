//! Async API client
//!
//! Discovers endpoints from the API root and wraps them with paginated and
//! batched helpers.
//!
//! ```rust,ignore
//! let api = ApiClient::connect(ClientConfig::new("http://localhost:8000").with_token(token)).await?;
//! let pages = api.endpoint("timeserie")?.get_all(&params).await?;
//! let trials = collect_trials(&pages);
//! ```

pub mod http;
pub mod trials;

pub use http::{
    adjust_page_size, batches, split_payload, ApiClient, ClientConfig, ClientError, Endpoint,
    INVALID_PAGE,
};
pub use trials::{collect_trials, Trials};
