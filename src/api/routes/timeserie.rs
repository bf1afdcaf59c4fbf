//! Timeserie Routes
//!
//! Bulk ingestion and aggregated queries.
//!
//! - GET /timeserie/ - Query samples (paginated, optional stats)
//! - POST /timeserie/ - Bulk ingest

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::auth::{Caller, Permission};
use crate::api::dto::IngestResponse;
use crate::api::error::ApiResult;
use crate::api::pagination::{PageParams, Paginated, RequestUrl};
use crate::api::state::AppState;
use crate::timeserie::{self, IngestRequest, QueryParams, QueryResults, TimeserieQuery};

/// GET /timeserie/
///
/// Query one measure's channels. Pages over distinct sample keys, or over
/// whole chunks when `chunks` is given.
pub async fn query_timeserie(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    url: RequestUrl,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Paginated<QueryResults>>> {
    caller.require(Permission::Read)?;

    let query = TimeserieQuery::from_params(&params)?;
    let default_size = if query.grouped_by_chunk() {
        state.config.page_size
    } else {
        state.config.timeserie_page_size
    };
    let (page, page_size) = PageParams {
        page: params.page,
        page_size: params.page_size,
    }
    .resolve(default_size, state.config.max_page_size);

    let result = state
        .with_store(move |store| timeserie::run(store, &query, page, page_size))
        .await?;

    Ok(Json(Paginated::new(
        result.results,
        result.count,
        page,
        page_size,
        &url,
    )))
}

/// POST /timeserie/
///
/// Ingest a `{source, measure, chunk?, timestamps, values}` payload in one
/// transaction.
pub async fn ingest_timeserie(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(req): Json<IngestRequest>,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    caller.require(Permission::Produce)?;

    let summary = state
        .with_store(move |store| timeserie::ingest(store, &req))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(IngestResponse::success(summary.objects_created)),
    ))
}
