//! Partitioning Routes
//!
//! Reads and changes the partition width and the retention policy.
//!
//! - GET /timescale-config/ - Current chunk interval and retention
//! - POST /timescale-config/ - Set chunk interval and/or replace retention
//!
//! Every failure here is reported as a 500 carrying the error text.

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::auth::{Caller, Permission};
use crate::api::dto::{TimescaleConfigRequest, TimescaleConfigResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::storage::{format_interval, parse_interval, StorageResult, Store};

const NOT_ENOUGH_DATA: &str = "not enough data";

/// GET /timescale-config/
pub async fn get_config(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> ApiResult<Json<TimescaleConfigResponse>> {
    caller.require(Permission::Read)?;
    let report = state
        .with_store(|store| report(store).map_err(internal))
        .await?;
    Ok(Json(report))
}

/// POST /timescale-config/
///
/// Steps run independently: a failing retention update leaves an already
/// applied chunk interval in place.
pub async fn set_config(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<TimescaleConfigRequest>,
) -> ApiResult<Json<TimescaleConfigResponse>> {
    caller.require(Permission::Admin)?;

    let update = req.clone();
    state
        .with_store(move |store| apply(store, &update))
        .await?;

    tracing::info!(
        subject = %caller.subject,
        chunk_interval = ?req.chunk_interval,
        retention_interval = ?req.retention_interval,
        "Partitioning configuration updated"
    );

    let report = state
        .with_store(|store| report(store).map_err(internal))
        .await?;
    Ok(Json(report))
}

fn apply(store: &Store, req: &TimescaleConfigRequest) -> ApiResult<()> {
    if let Some(raw) = req.chunk_interval.as_deref() {
        let interval = parse_interval(raw).map_err(internal)?;
        store.set_chunk_interval(interval).map_err(internal)?;
    }

    if let Some(raw) = req.retention_interval.as_deref() {
        store.remove_retention_policy().map_err(internal)?;
        if !matches!(raw.trim().to_lowercase().as_str(), "" | "none" | "null") {
            let retention = parse_interval(raw).map_err(internal)?;
            store.add_retention_policy(retention).map_err(internal)?;
        }
    }
    Ok(())
}

fn report(store: &Store) -> StorageResult<TimescaleConfigResponse> {
    let settings = store.settings()?;
    let recent = store.recent_partitions(2)?;

    let chunk_interval = match recent.as_slice() {
        [newest, previous] => format_interval(chrono::Duration::microseconds(
            newest.range_start - previous.range_start,
        )),
        _ => NOT_ENOUGH_DATA.to_string(),
    };

    Ok(TimescaleConfigResponse {
        chunk_interval,
        configured_chunk_interval: format_interval(settings.chunk_interval),
        retention_interval: settings.retention.map(format_interval),
    })
}

fn internal(err: impl std::fmt::Display) -> ApiError {
    ApiError::Internal(err.to_string())
}
