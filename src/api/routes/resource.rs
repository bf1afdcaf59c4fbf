//! Catalog Routes
//!
//! One generic set of CRUD handlers shared by every catalog record.
//!
//! - GET /{resource}/ - List with exact-match filters (paginated)
//! - POST /{resource}/ - Create
//! - DELETE /{resource}/ - Bulk delete by filter
//! - GET /{resource}/:key/ - Retrieve
//! - PUT /{resource}/:key/ - Update
//! - DELETE /{resource}/:key/ - Delete
//!
//! Sources are keyed by label, everything else by integer id.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use std::sync::Arc;

use crate::api::auth::{Caller, Permission};
use crate::api::error::{ApiError, ApiResult};
use crate::api::pagination::{PageParams, Paginated, RequestUrl};
use crate::api::state::AppState;
use crate::storage::{
    Channel, ChannelFilter, Chunk, ChunkFilter, Filter, Measure, MeasureFilter, NewChannel,
    NewChunk, NewMeasure, NewSource, Source, SourceFilter, StorageResult, Store, Window,
};

/// A catalog record exposed through the generic handlers
pub trait Resource: Send + Sync + 'static {
    /// Path segment and name in the API root
    const NAME: &'static str;
    /// Permission needed to create a record
    const CREATE: Permission = Permission::Admin;

    type Item: Serialize + Send + 'static;
    type Key: DeserializeOwned + Display + Send + 'static;
    type Filter: Filter + DeserializeOwned + Send + 'static;
    type Payload: DeserializeOwned + Send + 'static;

    fn list(
        store: &Store,
        filter: &Self::Filter,
        window: Window,
    ) -> StorageResult<(Vec<Self::Item>, i64)>;
    fn create(store: &Store, payload: Self::Payload) -> StorageResult<Self::Item>;
    fn get(store: &Store, key: &Self::Key) -> StorageResult<Self::Item>;
    fn update(store: &Store, key: &Self::Key, payload: Self::Payload) -> StorageResult<Self::Item>;
    fn delete(store: &Store, key: &Self::Key) -> StorageResult<usize>;
    fn delete_matching(store: &Store, filter: &Self::Filter) -> StorageResult<usize>;
}

/// Mount the list and item routes of a resource
pub fn routes<R: Resource>(router: Router<Arc<AppState>>) -> Router<Arc<AppState>> {
    router
        .route(
            &format!("/{}/", R::NAME),
            get(list::<R>).post(create::<R>).delete(delete_matching::<R>),
        )
        .route(
            &format!("/{}/:key/", R::NAME),
            get(retrieve::<R>).put(update::<R>).delete(destroy::<R>),
        )
}

/// GET /{resource}/
pub async fn list<R: Resource>(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    url: RequestUrl,
    Query(filter): Query<R::Filter>,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<Paginated<Vec<R::Item>>>> {
    caller.require(Permission::Read)?;

    let (page, page_size) = params.resolve(state.config.page_size, state.config.max_page_size);
    let window = Window::page(page, page_size).ok_or(ApiError::InvalidPage)?;
    let (items, count) = state.with_store(move |store| R::list(store, &filter, window)).await?;

    if page > 1 && window.offset >= count {
        return Err(ApiError::InvalidPage);
    }

    Ok(Json(Paginated::new(items, count, page, page_size, &url)))
}

/// POST /{resource}/
pub async fn create<R: Resource>(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(payload): Json<R::Payload>,
) -> ApiResult<(StatusCode, Json<R::Item>)> {
    caller.require(R::CREATE)?;

    let item = state.with_store(move |store| R::create(store, payload)).await?;
    tracing::info!(resource = R::NAME, subject = %caller.subject, "Created record");

    Ok((StatusCode::CREATED, Json(item)))
}

/// GET /{resource}/:key/
pub async fn retrieve<R: Resource>(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(key): Path<R::Key>,
) -> ApiResult<Json<R::Item>> {
    caller.require(Permission::Read)?;
    Ok(Json(state.with_store(move |store| R::get(store, &key)).await?))
}

/// PUT /{resource}/:key/
pub async fn update<R: Resource>(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(key): Path<R::Key>,
    Json(payload): Json<R::Payload>,
) -> ApiResult<Json<R::Item>> {
    caller.require(Permission::Admin)?;

    let name = key.to_string();
    let item = state.with_store(move |store| R::update(store, &key, payload)).await?;
    tracing::info!(resource = R::NAME, key = %name, "Updated record");

    Ok(Json(item))
}

/// DELETE /{resource}/:key/
pub async fn destroy<R: Resource>(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(key): Path<R::Key>,
) -> ApiResult<StatusCode> {
    caller.require(Permission::Admin)?;

    let name = key.to_string();
    if state.with_store(move |store| R::delete(store, &key)).await? == 0 {
        return Err(ApiError::NotFound(format!("{} {}", R::NAME, name)));
    }
    tracing::info!(resource = R::NAME, key = %name, "Deleted record");

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /{resource}/
///
/// Deletes every record matching the filter. An empty filter is refused and a
/// filter matching nothing is a 404.
pub async fn delete_matching<R: Resource>(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Query(filter): Query<R::Filter>,
) -> ApiResult<StatusCode> {
    caller.require(Permission::Admin)?;

    if filter.is_empty() {
        return Err(ApiError::BadRequest(
            "At least one filter is required for bulk delete".to_string(),
        ));
    }

    let deleted = state.with_store(move |store| R::delete_matching(store, &filter)).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound(format!(
            "No {} matches the given filter",
            R::NAME
        )));
    }
    tracing::info!(resource = R::NAME, deleted, "Bulk deleted records");

    Ok(StatusCode::NO_CONTENT)
}

// ============================================
// Resources
// ============================================

pub struct SourceResource;

impl Resource for SourceResource {
    const NAME: &'static str = "source";
    type Item = Source;
    type Key = String;
    type Filter = SourceFilter;
    type Payload = NewSource;

    fn list(
        store: &Store,
        filter: &SourceFilter,
        window: Window,
    ) -> StorageResult<(Vec<Source>, i64)> {
        store.list_sources(filter, window)
    }
    fn create(store: &Store, payload: NewSource) -> StorageResult<Source> {
        store.create_source(payload)
    }
    fn get(store: &Store, key: &String) -> StorageResult<Source> {
        store.get_source(key)
    }
    fn update(store: &Store, key: &String, payload: NewSource) -> StorageResult<Source> {
        store.update_source(key, payload)
    }
    fn delete(store: &Store, key: &String) -> StorageResult<usize> {
        store.delete_source(key)
    }
    fn delete_matching(store: &Store, filter: &SourceFilter) -> StorageResult<usize> {
        store.delete_sources(filter)
    }
}

pub struct MeasureResource;

impl Resource for MeasureResource {
    const NAME: &'static str = "measure";
    type Item = Measure;
    type Key = i64;
    type Filter = MeasureFilter;
    type Payload = NewMeasure;

    fn list(
        store: &Store,
        filter: &MeasureFilter,
        window: Window,
    ) -> StorageResult<(Vec<Measure>, i64)> {
        store.list_measures(filter, window)
    }
    fn create(store: &Store, payload: NewMeasure) -> StorageResult<Measure> {
        store.create_measure(payload)
    }
    fn get(store: &Store, key: &i64) -> StorageResult<Measure> {
        store.get_measure(*key)
    }
    fn update(store: &Store, key: &i64, payload: NewMeasure) -> StorageResult<Measure> {
        store.update_measure(*key, payload)
    }
    fn delete(store: &Store, key: &i64) -> StorageResult<usize> {
        store.delete_measure(*key)
    }
    fn delete_matching(store: &Store, filter: &MeasureFilter) -> StorageResult<usize> {
        store.delete_measures(filter)
    }
}

pub struct ChannelResource;

impl Resource for ChannelResource {
    const NAME: &'static str = "channel";
    type Item = Channel;
    type Key = i64;
    type Filter = ChannelFilter;
    type Payload = NewChannel;

    fn list(
        store: &Store,
        filter: &ChannelFilter,
        window: Window,
    ) -> StorageResult<(Vec<Channel>, i64)> {
        store.list_channels(filter, window)
    }
    fn create(store: &Store, payload: NewChannel) -> StorageResult<Channel> {
        store.create_channel(payload)
    }
    fn get(store: &Store, key: &i64) -> StorageResult<Channel> {
        store.get_channel(*key)
    }
    fn update(store: &Store, key: &i64, payload: NewChannel) -> StorageResult<Channel> {
        store.update_channel(*key, payload)
    }
    fn delete(store: &Store, key: &i64) -> StorageResult<usize> {
        store.delete_channel(*key)
    }
    fn delete_matching(store: &Store, filter: &ChannelFilter) -> StorageResult<usize> {
        store.delete_channels(filter)
    }
}

pub struct ChunkResource;

impl Resource for ChunkResource {
    const NAME: &'static str = "chunk";
    const CREATE: Permission = Permission::Produce;
    type Item = Chunk;
    type Key = i64;
    type Filter = ChunkFilter;
    type Payload = NewChunk;

    fn list(
        store: &Store,
        filter: &ChunkFilter,
        window: Window,
    ) -> StorageResult<(Vec<Chunk>, i64)> {
        store.list_chunks(filter, window)
    }
    fn create(store: &Store, payload: NewChunk) -> StorageResult<Chunk> {
        store.create_chunk(payload)
    }
    fn get(store: &Store, key: &i64) -> StorageResult<Chunk> {
        store.get_chunk(*key)
    }
    fn update(store: &Store, key: &i64, payload: NewChunk) -> StorageResult<Chunk> {
        store.update_chunk(*key, payload)
    }
    fn delete(store: &Store, key: &i64) -> StorageResult<usize> {
        store.delete_chunk(*key)
    }
    fn delete_matching(store: &Store, filter: &ChunkFilter) -> StorageResult<usize> {
        store.delete_chunks(filter)
    }
}
