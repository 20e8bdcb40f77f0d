//! HTTP collector service

use crate::collector::{self, ProcessCollector};
use crate::error::StoreError;
use crate::protocol::{CollectBody, MessageBody, MSG_CLEARED, MSG_COLLECTED, MSG_LOCKED, MSG_SAVED};
use crate::record::ProcessRecord;
use crate::store::SnapshotStore;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SnapshotStore>,
    pub collector: Arc<dyn ProcessCollector>,
    /// Host that `collect` snapshots are stored under.
    pub hostname: String,
}

impl AppState {
    pub fn new(store: Arc<SnapshotStore>, collector: Arc<dyn ProcessCollector>, hostname: impl Into<String>) -> Self {
        Self { store, collector, hostname: hostname.into() }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/processes/", get(handle_list).delete(handle_clear))
        .route("/api/processes/collect/", post(handle_collect))
        .route("/api/processes/upload/", post(handle_upload))
        .route("/api/processes/clear/", delete(handle_clear))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            StoreError::Validation(errors) => {
                warn!(invalid = errors.invalid_count(), "rejected batch");
                (StatusCode::BAD_REQUEST, Json(errors)).into_response()
            }
            StoreError::Unavailable { .. } | StoreError::Contention(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, Json(MessageBody::new(MSG_LOCKED))).into_response()
            }
            e => {
                error!(error = %e, "store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(MessageBody::new(e.to_string()))).into_response()
            }
        }
    }
}

/// Store calls block (SQLite I/O, retry sleeps), so they run off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError(StoreError::Backend(format!("store task failed: {}", e))))?
        .map_err(ApiError)
}

async fn handle_health() -> &'static str {
    "ok"
}

async fn handle_list(State(state): State<AppState>) -> Result<Json<Vec<ProcessRecord>>, ApiError> {
    let store = state.store;
    let records = blocking(move || store.list_all()).await?;
    Ok(Json(records))
}

async fn handle_collect(State(state): State<AppState>) -> Result<(StatusCode, Json<CollectBody>), ApiError> {
    let AppState { store, collector, hostname } = state;
    let host = hostname.clone();
    let count = blocking(move || {
        let snapshot = collector::take_snapshot(collector.as_ref(), &host);
        store.replace_snapshot(&host, snapshot)
    })
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(CollectBody { message: MSG_COLLECTED.to_string(), count, hostname }),
    ))
}

async fn handle_upload(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<MessageBody>), ApiError> {
    let store = state.store;
    blocking(move || store.upload(&body)).await?;
    Ok((StatusCode::CREATED, Json(MessageBody::new(MSG_SAVED))))
}

async fn handle_clear(State(state): State<AppState>) -> Result<Json<MessageBody>, ApiError> {
    let store = state.store;
    blocking(move || store.clear_all()).await?;
    Ok(Json(MessageBody::new(MSG_CLEARED)))
}
