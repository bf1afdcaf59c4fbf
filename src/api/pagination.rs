//! Page-number pagination
//!
//! Every list endpoint answers with `{count, next, previous, results}` where
//! `next`/`previous` are absolute URLs that repeat the request's query string
//! with `page` swapped.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::HOST, request::Parts},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;

use crate::api::state::AppState;

/// `page` / `page_size` query parameters
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

impl PageParams {
    /// Resolve to (page, page_size) with defaults and bounds applied
    pub fn resolve(&self, default_size: u64, max_size: u64) -> (u64, u64) {
        let page = self.page.unwrap_or(1).max(1);
        let size = self.page_size.unwrap_or(default_size).clamp(1, max_size.max(1));
        (page, size)
    }
}

/// Pagination envelope
#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub count: i64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: T,
}

impl<T> Paginated<T> {
    pub fn new(results: T, count: i64, page: u64, page_size: u64, url: &RequestUrl) -> Self {
        let has_next = (page.saturating_mul(page_size) as i64) < count;
        Self {
            count,
            next: has_next.then(|| url.with_page(page + 1)),
            previous: (page > 1).then(|| url.with_page(page - 1)),
            results,
        }
    }
}

/// Absolute URL of the current request, used to build page links
#[derive(Debug, Clone)]
pub struct RequestUrl {
    pub base: String,
    pub path: String,
    pub query: Option<String>,
}

impl RequestUrl {
    /// The request URL with `page` set (page 1 drops the parameter)
    pub fn with_page(&self, page: u64) -> String {
        let mut pairs: Vec<String> = self
            .query
            .as_deref()
            .unwrap_or("")
            .split('&')
            .filter(|p| !p.is_empty() && !p.starts_with("page=") && *p != "page")
            .map(str::to_string)
            .collect();
        if page > 1 {
            pairs.push(format!("page={}", page));
        }

        let mut url = format!("{}{}", self.base, self.path);
        if !pairs.is_empty() {
            url.push('?');
            url.push_str(&pairs.join("&"));
        }
        url
    }

    /// Absolute URL for another path on the same server
    pub fn join(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

/// Base URL from configuration, else from the Host header
pub fn base_url(state: &AppState, parts: &Parts) -> String {
    if let Some(url) = &state.config.public_url {
        return url.trim_end_matches('/').to_string();
    }
    let host = parts
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| state.config.addr());
    format!("http://{}", host)
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequestUrl {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(RequestUrl {
            base: base_url(state, parts),
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
        })
    }
}
