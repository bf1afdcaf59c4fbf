//! API Root
//!
//! - GET / - Map of endpoint name to absolute URL, used by clients for discovery

use axum::Json;
use serde_json::{Map, Value};

use crate::api::auth::Caller;
use crate::api::pagination::RequestUrl;

/// Endpoint names in the order they are listed
pub const ENDPOINTS: &[&str] = &[
    "source",
    "measure",
    "channel",
    "chunk",
    "timeserie",
    "timescale-config",
];

/// GET /
///
/// Any valid token may list the endpoints, whatever its roles.
pub async fn api_root(_caller: Caller, url: RequestUrl) -> Json<Map<String, Value>> {
    let endpoints = ENDPOINTS
        .iter()
        .map(|name| {
            (
                name.to_string(),
                Value::String(url.join(&format!("/{}/", name))),
            )
        })
        .collect();

    Json(endpoints)
}
