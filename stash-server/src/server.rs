use crate::config::Config;
use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::TryStreamExt;
use serde::Deserialize;
use stash_core::storage::http::MOVE_TO_QUERY;
use stash_core::{
    Content, Key, LoggingStorage, Result, StashError, Storage, StorageConfig, StorageRegistry,
    StoragesCache,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Storage served by the HTTP front end, resolved once and kept for the
/// server's lifetime.
#[derive(Clone)]
pub struct ServerState {
    storage: Arc<LoggingStorage>,
}

impl ServerState {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage: Arc::new(LoggingStorage::new(storage)),
        }
    }

    /// Builds the configured backend through the storage cache.
    pub async fn resolve(cache: &StoragesCache, config: &StorageConfig) -> Result<Self> {
        Ok(Self::new(cache.storage(config).await?))
    }
}

#[derive(Debug, Default, Deserialize)]
struct KeyQuery {
    #[serde(default)]
    list: Option<String>,
    #[serde(default)]
    move_to: Option<String>,
}

struct ApiError(StashError);

impl From<StashError> for ApiError {
    fn from(error: StashError) -> Self {
        ApiError(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StashError::NotFound(_) => StatusCode::NOT_FOUND,
            StashError::LockBusy(_) => StatusCode::CONFLICT,
            StashError::InvalidOperation(_) | StashError::InvalidKey(_) => StatusCode::BAD_REQUEST,
            StashError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            StashError::Config(_) | StashError::Io(_) | StashError::Backend(_) => {
                tracing::error!("Storage request failed: {}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.0.to_string()).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(get_root))
        .route(
            "/*key",
            get(get_key)
                .head(head_key)
                .put(put_key)
                .delete(delete_key)
                .post(post_key),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: Config) -> Result<()> {
    let cache = StoragesCache::new(StorageRegistry::with_defaults(), config.cache_settings()?);
    let state = ServerState::resolve(&cache, &config.storage).await?;
    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(
        "Serving {} on {}",
        state.storage.identifier(),
        config.bind_addr
    );

    serve(listener, state).await
}

pub async fn serve(listener: TcpListener, state: ServerState) -> Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn parse_key(raw: &str) -> ApiResult<Key> {
    Ok(Key::parse(raw)?)
}

async fn get_root(
    State(state): State<ServerState>,
    Query(query): Query<KeyQuery>,
) -> ApiResult<Response> {
    read(&state, Key::root(), query).await
}

async fn get_key(
    State(state): State<ServerState>,
    Path(raw): Path<String>,
    Query(query): Query<KeyQuery>,
) -> ApiResult<Response> {
    read(&state, parse_key(&raw)?, query).await
}

async fn read(state: &ServerState, key: Key, query: KeyQuery) -> ApiResult<Response> {
    let storage = &state.storage;
    if query.list.is_some() {
        let keys: Vec<String> = storage
            .list(&key)
            .await?
            .iter()
            .map(ToString::to_string)
            .collect();
        return Ok(Json(keys).into_response());
    }

    let content = storage.value(&key).await?;
    let mut headers = HeaderMap::new();
    if let Some(size) = content.size() {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    }
    let body = Body::from_stream(content.into_stream());
    Ok((headers, body).into_response())
}

async fn head_key(
    State(state): State<ServerState>,
    Path(raw): Path<String>,
) -> ApiResult<Response> {
    let key = parse_key(&raw)?;
    let metadata = state.storage.metadata(&key).await?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.size));
    if let Some(modified) = metadata.last_modified {
        let rendered = modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        if let Ok(value) = HeaderValue::from_str(&rendered) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
    Ok((StatusCode::OK, headers).into_response())
}

async fn put_key(
    State(state): State<ServerState>,
    Path(raw): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<StatusCode> {
    let key = parse_key(&raw)?;
    let size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok());
    let stream = body
        .into_data_stream()
        .map_err(|e| StashError::Backend(format!("request body: {}", e)));

    state
        .storage
        .save(&key, Content::from_stream(stream, size))
        .await?;
    Ok(StatusCode::CREATED)
}

async fn delete_key(
    State(state): State<ServerState>,
    Path(raw): Path<String>,
) -> ApiResult<StatusCode> {
    let key = parse_key(&raw)?;
    state.storage.delete(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn post_key(
    State(state): State<ServerState>,
    Path(raw): Path<String>,
    Query(query): Query<KeyQuery>,
) -> ApiResult<StatusCode> {
    let source = parse_key(&raw)?;
    let destination = query.move_to.ok_or_else(|| {
        StashError::InvalidOperation(format!("'{}' query parameter is required", MOVE_TO_QUERY))
    })?;
    let destination = parse_key(&destination)?;

    state
        .storage
        .move_key(&source, &destination)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
