//! Channelstore REST API Client
//!
//! Async HTTP client that discovers the API's endpoints from its root and
//! exposes each one by name.

use futures_util::stream::{self, StreamExt};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Error message the server uses for pages past the end
pub const INVALID_PAGE: &str = "Invalid page.";

/// Configuration for the API client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the API (e.g., "http://localhost:8000")
    pub base_url: String,
    /// Bearer token sent with every request
    pub token: Option<String>,
    /// Upper bound on in-flight requests for batched calls, unbounded when `None`
    pub max_concurrency: Option<usize>,
    /// Timeout for GET, PUT and DELETE requests in seconds
    pub request_timeout_secs: u64,
    /// Timeout for POST requests in seconds
    pub post_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            token: None,
            max_concurrency: None,
            request_timeout_secs: 5 * 60,
            post_timeout_secs: 100 * 60,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }
}

/// Client bound to one API deployment
pub struct ApiClient {
    client: Client,
    config: ClientConfig,
    endpoints: BTreeMap<String, String>,
}

impl ApiClient {
    /// Connect and discover the endpoint map from `GET /`
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder().build()?;
        let mut api = Self {
            client,
            config,
            endpoints: BTreeMap::new(),
        };

        let root = format!("{}/", api.config.base_url.trim_end_matches('/'));
        let listing = api.send(Method::GET, &root, None, None).await?;

        let endpoints: BTreeMap<String, String> = listing
            .as_object()
            .map(|map| {
                map.iter()
                    .filter_map(|(name, url)| Some((name.clone(), url.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        if endpoints.is_empty() {
            return Err(ClientError::NoEndpoints);
        }

        tracing::debug!(count = endpoints.len(), "Discovered API endpoints");
        api.endpoints = endpoints;
        Ok(api)
    }

    /// Get the current configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Discovered endpoints, name to absolute URL
    pub fn endpoints(&self) -> &BTreeMap<String, String> {
        &self.endpoints
    }

    /// Look up an endpoint by the name the API root lists it under
    pub fn endpoint(&self, name: &str) -> Result<Endpoint<'_>, ClientError> {
        let url = self
            .endpoints
            .get(name)
            .ok_or_else(|| ClientError::UnknownEndpoint(name.to_string()))?;
        Ok(Endpoint {
            api: self,
            name: name.to_string(),
            url: url.clone(),
        })
    }

    fn timeout(&self, method: &Method) -> Duration {
        if method == Method::POST {
            Duration::from_secs(self.config.post_timeout_secs)
        } else {
            Duration::from_secs(self.config.request_timeout_secs)
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let timeout = self.timeout(&method);
        let mut builder = self.client.request(method, url).timeout(timeout);
        if let Some(token) = &self.config.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    /// Send one request. `Null` stands for an empty 204 body.
    async fn send(
        &self,
        method: Method,
        url: &str,
        query: Option<&[(String, String)]>,
        body: Option<&Value>,
    ) -> Result<Value, ClientError> {
        let mut builder = self.request(method, url);
        if let Some(query) = query {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();

        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        if status.is_success() {
            return response.json().await.map_err(ClientError::Request);
        }

        let text = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), url, "API request failed");
        Err(ClientError::Api {
            status: status.as_u16(),
            message: text,
        })
    }

    /// Run futures with the configured concurrency, keeping input order
    async fn fan_out<F>(&self, futures: Vec<F>) -> Vec<F::Output>
    where
        F: Future,
    {
        let limit = self.config.max_concurrency.unwrap_or(futures.len()).max(1);
        stream::iter(futures).buffered(limit).collect().await
    }
}

/// One named endpoint of a connected client
pub struct Endpoint<'a> {
    api: &'a ApiClient,
    name: String,
    url: String,
}

impl Endpoint<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// GET with query parameters, one page
    pub async fn get(&self, params: &Map<String, Value>) -> Result<Value, ClientError> {
        let query = query_pairs(params);
        self.api
            .send(Method::GET, &self.url, Some(&query), None)
            .await
    }

    /// GET and follow `next` links until the last page
    pub async fn get_all(&self, params: &Map<String, Value>) -> Result<Vec<Value>, ClientError> {
        let mut pages = vec![self.get(params).await?];

        while let Some(next) = pages
            .last()
            .and_then(|page| page.get("next"))
            .and_then(Value::as_str)
            .map(str::to_string)
        {
            pages.push(self.api.send(Method::GET, &next, None, None).await?);
        }

        Ok(pages)
    }

    /// Fetch one logical `(page, page_size)` window as several smaller pages
    /// of `batch_size`, concurrently.
    ///
    /// Pages past the end come back as their `Invalid page.` error body so
    /// the result lines up with the requested pages.
    pub async fn get_in_batches(
        &self,
        params: &Map<String, Value>,
        batch_size: u64,
    ) -> Result<Vec<Value>, ClientError> {
        let requests = adjust_page_size(params, batch_size)?;

        let fetches = requests
            .iter()
            .map(|request| async move {
                match self.get(request).await {
                    Err(ClientError::Api { status: 404, message }) if message.contains(INVALID_PAGE) => {
                        Ok(serde_json::from_str(&message).unwrap_or(Value::Null))
                    }
                    other => other,
                }
            })
            .collect();

        self.api.fan_out(fetches).await.into_iter().collect()
    }

    /// POST one JSON body
    pub async fn post(&self, body: &Value) -> Result<Value, ClientError> {
        self.api
            .send(Method::POST, &self.url, None, Some(body))
            .await
    }

    /// POST several bodies concurrently, responses in input order
    pub async fn post_many(&self, bodies: &[Value]) -> Result<Vec<Value>, ClientError> {
        let posts = bodies.iter().map(|body| self.post(body)).collect();
        self.api.fan_out(posts).await.into_iter().collect()
    }

    /// Split an ingestion payload into `batch_size` timestamps per request
    /// and POST the pieces concurrently.
    ///
    /// An explicit `chunk` label creates a new chunk per request, so batched
    /// ingestion is meant for payloads that go to the default chunk.
    pub async fn post_in_batches(
        &self,
        payload: &Value,
        batch_size: usize,
    ) -> Result<Vec<Value>, ClientError> {
        let pieces = split_payload(payload, batch_size)?;
        tracing::debug!(endpoint = %self.name, requests = pieces.len(), "Posting in batches");
        self.post_many(&pieces).await
    }

    /// PUT to the item named by `data["id"]` (or `data["label"]` for sources)
    pub async fn put(&self, data: &Value) -> Result<Value, ClientError> {
        let url = self.item_url(data)?;
        self.api.send(Method::PUT, &url, None, Some(data)).await
    }

    /// DELETE the item named by `data["id"]` (or `data["label"]`)
    pub async fn delete(&self, data: &Value) -> Result<(), ClientError> {
        let url = self.item_url(data)?;
        self.api.send(Method::DELETE, &url, None, None).await?;
        Ok(())
    }

    /// DELETE every record matching the filter
    pub async fn delete_matching(&self, filter: &Map<String, Value>) -> Result<(), ClientError> {
        let query = query_pairs(filter);
        self.api
            .send(Method::DELETE, &self.url, Some(&query), None)
            .await?;
        Ok(())
    }

    fn item_url(&self, data: &Value) -> Result<String, ClientError> {
        let key = match data.get("id").or_else(|| data.get("label")) {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => return Err(ClientError::MissingKey),
        };
        Ok(format!("{}/{}/", self.url.trim_end_matches('/'), key))
    }
}

/// Split `seq` into consecutive batches of `batch_size` (the last may be shorter)
pub fn batches<T: Clone>(seq: &[T], batch_size: usize) -> Vec<Vec<T>> {
    seq.chunks(batch_size.max(1)).map(<[T]>::to_vec).collect()
}

/// Rewrite one `(page, page_size)` request as consecutive requests of
/// `batch_size`. Without a `page_size` the request is returned unchanged.
pub fn adjust_page_size(
    params: &Map<String, Value>,
    batch_size: u64,
) -> Result<Vec<Map<String, Value>>, ClientError> {
    let batch_size = batch_size.max(1);
    let Some(page_size) = params.get("page_size").and_then(as_u64) else {
        return Ok(vec![params.clone()]);
    };
    let page = params.get("page").and_then(as_u64).unwrap_or(1).max(1);
    let out_of_range = || ClientError::PageOutOfRange { page, page_size };

    let request_count = page_size.div_ceil(batch_size);
    let initial_index = (page - 1).checked_mul(page_size).ok_or_else(out_of_range)?;
    let first_page = initial_index
        .div_ceil(batch_size)
        .checked_add(1)
        .ok_or_else(out_of_range)?;
    let end = first_page.checked_add(request_count).ok_or_else(out_of_range)?;

    Ok((first_page..end)
        .map(|page| {
            let mut request = params.clone();
            request.insert("page_size".to_string(), Value::from(batch_size));
            request.insert("page".to_string(), Value::from(page));
            request
        })
        .collect())
}

/// Cut an ingestion payload into pieces of at most `batch_size` timestamps,
/// slicing every channel's values the same way.
pub fn split_payload(payload: &Value, batch_size: usize) -> Result<Vec<Value>, ClientError> {
    let invalid = |reason: &str| ClientError::InvalidPayload(reason.to_string());

    let object = payload.as_object().ok_or_else(|| invalid("payload must be an object"))?;
    let timestamps = object
        .get("timestamps")
        .ok_or_else(|| invalid("missing timestamps"))?;
    let values = object
        .get("values")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("missing values"))?;

    let time_pieces = split_sequence(timestamps, batch_size)
        .ok_or_else(|| invalid("timestamps must be a list or a mapping"))?;

    let mut value_pieces = Map::new();
    for (label, series) in values {
        let pieces = split_sequence(series, batch_size)
            .ok_or_else(|| invalid("values must be lists or mappings"))?;
        if pieces.len() != time_pieces.len() {
            return Err(invalid(&format!("values.{} does not match timestamps", label)));
        }
        value_pieces.insert(label.clone(), Value::Array(pieces));
    }

    let pieces = time_pieces
        .into_iter()
        .enumerate()
        .map(|(i, timestamps)| {
            let mut piece = object.clone();
            piece.insert("timestamps".to_string(), timestamps);
            let values = value_pieces
                .iter()
                .map(|(label, pieces)| (label.clone(), pieces[i].clone()))
                .collect();
            piece.insert("values".to_string(), Value::Object(values));
            Value::Object(piece)
        })
        .collect();

    Ok(pieces)
}

fn split_sequence(value: &Value, batch_size: usize) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(
            batches(items, batch_size)
                .into_iter()
                .map(Value::Array)
                .collect(),
        ),
        Value::Object(map) => {
            let entries: Vec<(String, Value)> =
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            Some(
                batches(&entries, batch_size)
                    .into_iter()
                    .map(|batch| Value::Object(batch.into_iter().collect()))
                    .collect(),
            )
        }
        _ => None,
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn query_pairs(params: &Map<String, Value>) -> Vec<(String, String)> {
    params
        .iter()
        .filter_map(|(key, value)| {
            let rendered = match value {
                Value::Null => return None,
                Value::String(s) => s.clone(),
                Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(","),
                other => other.to_string(),
            };
            Some((key.clone(), rendered))
        })
        .collect()
}

fn classify(e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::Timeout
    } else if e.is_connect() {
        ClientError::Unavailable
    } else {
        ClientError::Request(e)
    }
}

// ============================================
// Errors
// ============================================

/// Errors that can occur when talking to the API
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("API unavailable")]
    Unavailable,

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Request timeout")]
    Timeout,

    #[error("No endpoints detected. Please ensure the API is operational.")]
    NoEndpoints,

    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("Record has neither an id nor a label")]
    MissingKey,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Page {page} of size {page_size} is out of range")]
    PageOutOfRange { page: u64, page_size: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{build_router, ApiConfig, AppState, AuthConfig};
    use crate::client::collect_trials;
    use crate::storage::{Store, StoreConfig};
    use serde_json::json;
    use std::sync::Arc;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:8000");
        assert_eq!(config.request_timeout_secs, 300);
        assert_eq!(config.post_timeout_secs, 6000);
        assert!(config.max_concurrency.is_none());
    }

    #[test]
    fn test_batches() {
        assert_eq!(batches(&[1, 2, 3, 4, 5], 2), vec![vec![1, 2], vec![3, 4], vec![5]]);
        assert!(batches::<u8>(&[], 3).is_empty());
    }

    #[test]
    fn test_adjust_page_size() {
        let requests =
            adjust_page_size(&params(json!({"page": 1, "page_size": 10, "measure": "eeg"})), 4)
                .unwrap();
        let pages: Vec<u64> = requests.iter().map(|r| r["page"].as_u64().unwrap()).collect();
        assert_eq!(pages, vec![1, 2, 3]);
        assert!(requests.iter().all(|r| r["page_size"] == 4 && r["measure"] == "eeg"));

        let requests = adjust_page_size(&params(json!({"page": 2, "page_size": 10})), 4).unwrap();
        let pages: Vec<u64> = requests.iter().map(|r| r["page"].as_u64().unwrap()).collect();
        assert_eq!(pages, vec![4, 5, 6]);

        let untouched = adjust_page_size(&params(json!({"measure": "eeg"})), 4).unwrap();
        assert_eq!(untouched, vec![params(json!({"measure": "eeg"}))]);
    }

    #[test]
    fn test_adjust_page_size_out_of_range() {
        let huge = params(json!({"page": u64::MAX, "page_size": 10}));
        assert!(matches!(
            adjust_page_size(&huge, 4),
            Err(ClientError::PageOutOfRange { page: u64::MAX, page_size: 10 })
        ));

        let edge = params(json!({"page": 2, "page_size": u64::MAX}));
        assert!(matches!(
            adjust_page_size(&edge, 1),
            Err(ClientError::PageOutOfRange { .. })
        ));
    }

    #[test]
    fn test_split_payload() {
        let payload = json!({
            "source": "openbci",
            "measure": "eeg",
            "timestamps": [1, 2, 3, 4, 5],
            "values": {"c3": [1, 2, 3, 4, 5], "c4": {"a": 5, "b": 4, "c": 3, "d": 2, "e": 1}}
        });
        let pieces = split_payload(&payload, 2).unwrap();

        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0]["timestamps"], json!([1, 2]));
        assert_eq!(pieces[2]["values"]["c3"], json!([5]));
        assert_eq!(pieces[1]["values"]["c4"], json!({"c": 3, "d": 2}));
        assert_eq!(pieces[1]["measure"], "eeg");

        let short = json!({"timestamps": [1, 2, 3], "values": {"c3": [1]}});
        assert!(matches!(
            split_payload(&short, 2),
            Err(ClientError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_query_pairs() {
        let pairs = query_pairs(&params(json!({
            "channels": ["c3", "c4"], "stats": true, "page": 2, "chunk": null
        })));
        assert_eq!(
            pairs,
            vec![
                ("channels".to_string(), "c3,c4".to_string()),
                ("stats".to_string(), "true".to_string()),
                ("page".to_string(), "2".to_string()),
            ]
        );
    }

    async fn spawn_server() -> (String, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(StoreConfig::new(dir.path().join("client.db"))).unwrap());
        let auth = AuthConfig {
            enabled: false,
            ..Default::default()
        };
        let router = build_router(AppState::new(store, ApiConfig::default(), auth));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        (format!("http://{}", addr), dir)
    }

    #[tokio::test]
    async fn test_client_against_live_server() {
        let (base_url, _dir) = spawn_server().await;
        let api = ApiClient::connect(ClientConfig::new(base_url).with_max_concurrency(2))
            .await
            .unwrap();

        assert!(api.endpoints().contains_key("timeserie"));
        assert!(matches!(
            api.endpoint("teleport"),
            Err(ClientError::UnknownEndpoint(_))
        ));

        api.endpoint("source")
            .unwrap()
            .post(&json!({"label": "openbci", "name": "OpenBCI"}))
            .await
            .unwrap();
        api.endpoint("measure")
            .unwrap()
            .post(&json!({"source": "openbci", "label": "eeg"}))
            .await
            .unwrap();
        let channel = api.endpoint("channel").unwrap();
        channel
            .post_many(&[
                json!({"source": "openbci", "measure": "eeg", "label": "c3"}),
                json!({"source": "openbci", "measure": "eeg", "label": "c4"}),
            ])
            .await
            .unwrap();

        let timeserie = api.endpoint("timeserie").unwrap();
        let responses = timeserie
            .post_in_batches(
                &json!({
                    "source": "openbci",
                    "measure": "eeg",
                    "timestamps": [1.0, 2.0, 3.0, 4.0, 5.0],
                    "values": {"c3": [1, 2, 3, 4, 5], "c4": [5, 4, 3, 2, 1]}
                }),
                2,
            )
            .await
            .unwrap();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["objects_created"], 4);
        assert_eq!(responses[2]["objects_created"], 2);

        let query = params(json!({"source": "openbci", "measure": "eeg", "page_size": 2}));
        let pages = timeserie.get_all(&query).await.unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[2]["results"]["values"]["c3"], json!([5.0]));

        let window = params(json!({"source": "openbci", "measure": "eeg", "page": 1, "page_size": 8}));
        let pages = timeserie.get_in_batches(&window, 2).await.unwrap();
        assert_eq!(pages.len(), 4);
        assert_eq!(pages[3]["error"]["message"], INVALID_PAGE);
        let trials = collect_trials(&pages);
        assert_eq!(trials.data.len(), 3);
        assert!(trials.classes.is_empty());

        let c3 = channel
            .get(&params(json!({"label": "c3"})))
            .await
            .unwrap();
        assert_eq!(c3["results"][0]["count"], 5);

        let mut record = c3["results"][0].clone();
        record["unit"] = json!("uV");
        let updated = channel.put(&record).await.unwrap();
        assert_eq!(updated["unit"], "uV");

        channel.delete(&record).await.unwrap();
        let missing = channel.delete_matching(&params(json!({"label": "c3"}))).await;
        assert!(matches!(missing, Err(ClientError::Api { status: 404, .. })));
    }
}
