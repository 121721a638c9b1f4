//! HTTP surface (spec §6): the user-facing `fetch`/`cook`/`progress`
//! endpoints plus the cooker-side callbacks (`set_progress`, `set_status`,
//! `put_bundle`, `send_notif`) that let a worker running in a separate
//! process drive the lifecycle without direct DB access.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::cache::BundleCache;
use crate::cooker::CookerFramework;
use crate::coordinator::RequestCoordinator;
use crate::errors::{ErrorKind, VaultError};
use crate::hash::ObjectId;
use crate::lifecycle::store::LifecycleStore;
use crate::lifecycle::{BundleRecord, BundleStatus, BundleType};

pub struct AppState {
    pub coordinator: Arc<RequestCoordinator>,
    pub lifecycle: Arc<dyn LifecycleStore>,
    pub cache: Arc<dyn BundleCache>,
    pub framework: Arc<CookerFramework>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/fetch/{type}/{id}", get(fetch))
        .route("/cook/{type}/{id}", post(cook))
        .route("/progress/{type}/{id}", get(progress))
        .route("/set_progress/{type}/{id}", post(set_progress))
        .route("/set_status/{type}/{id}", post(set_status))
        .route("/put_bundle/{type}/{id}", post(put_bundle))
        .route("/send_notif/{type}/{id}", post(send_notif))
        .with_state(state)
}

async fn liveness() -> &'static str {
    "OK"
}

/// A JSON-friendly view of [`BundleRecord`] (spec §4.3 step 6, §6
/// "`bundle_info` view"): hex id and type string instead of the raw bytes
/// the record carries internally.
#[derive(Serialize)]
struct BundleInfoView {
    id: i64,
    #[serde(rename = "type")]
    bundle_type: &'static str,
    object_id: String,
    status: &'static str,
    sticky: bool,
    progress_msg: Option<String>,
    ts_created: chrono::DateTime<chrono::Utc>,
    ts_done: Option<chrono::DateTime<chrono::Utc>>,
    ts_last_access: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<BundleRecord> for BundleInfoView {
    fn from(record: BundleRecord) -> Self {
        BundleInfoView {
            id: record.id,
            bundle_type: record.bundle_type.as_str(),
            object_id: record.object_id.as_hex(),
            status: record.status.as_str(),
            sticky: record.sticky,
            progress_msg: record.progress_msg,
            ts_created: record.ts_created,
            ts_done: record.ts_done,
            ts_last_access: record.ts_last_access,
        }
    }
}

fn parse_coordinates(bundle_type: &str, id: &str) -> Result<(BundleType, ObjectId), Response> {
    let bundle_type = BundleType::from_str(bundle_type).map_err(err_response)?;
    let bytes = hex::decode(id).map_err(|_| err_response(VaultError::InvalidObjectId(id.to_string())))?;
    let object_id = ObjectId::from_bytes(&bytes)
        .map_err(VaultError::InvalidObjectId)
        .map_err(err_response)?;
    Ok((bundle_type, object_id))
}

fn err_response(err: VaultError) -> Response {
    let status = match err.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Policy => StatusCode::BAD_REQUEST,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.user_message()).into_response()
}

async fn fetch(State(state): State<Arc<AppState>>, Path((ty, id)): Path<(String, String)>) -> Response {
    let (bundle_type, object_id) = match parse_coordinates(&ty, &id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match state.coordinator.fetch(bundle_type, object_id).await {
        Ok(bytes) => bytes.into_response(),
        Err(e) => err_response(e),
    }
}

#[derive(Deserialize)]
struct CookParams {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    sticky: Option<bool>,
}

async fn cook(
    State(state): State<Arc<AppState>>,
    Path((ty, id)): Path<(String, String)>,
    Query(params): Query<CookParams>,
) -> Response {
    let (bundle_type, object_id) = match parse_coordinates(&ty, &id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match state
        .coordinator
        .cook_request(bundle_type, object_id, params.email.as_deref(), params.sticky.unwrap_or(false))
        .await
    {
        Ok(record) => (StatusCode::OK, Json(BundleInfoView::from(record))).into_response(),
        Err(e) => err_response(e),
    }
}

async fn progress(State(state): State<Arc<AppState>>, Path((ty, id)): Path<(String, String)>) -> Response {
    let (bundle_type, object_id) = match parse_coordinates(&ty, &id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match state.coordinator.progress(bundle_type, object_id).await {
        Ok(record) => (StatusCode::OK, Json(BundleInfoView::from(record))).into_response(),
        Err(e) => err_response(e),
    }
}

#[derive(Deserialize)]
struct SetProgressBody {
    #[serde(default)]
    text: Option<String>,
}

async fn set_progress(
    State(state): State<Arc<AppState>>,
    Path((ty, id)): Path<(String, String)>,
    Json(body): Json<SetProgressBody>,
) -> Response {
    let (bundle_type, object_id) = match parse_coordinates(&ty, &id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match state.lifecycle.set_progress(bundle_type, object_id, body.text).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => err_response(e),
    }
}

#[derive(Deserialize)]
struct SetStatusBody {
    status: String,
}

async fn set_status(
    State(state): State<Arc<AppState>>,
    Path((ty, id)): Path<(String, String)>,
    Json(body): Json<SetStatusBody>,
) -> Response {
    let (bundle_type, object_id) = match parse_coordinates(&ty, &id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status = match BundleStatus::from_str(&body.status) {
        Ok(s) => s,
        Err(e) => return err_response(e),
    };
    match state.lifecycle.set_status(bundle_type, object_id, status).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => err_response(e),
    }
}

/// Streams the request body straight into the cache (spec §4.1
/// `add_stream(type, id, chunks)`) instead of buffering it whole, so a
/// worker uploading a multi-hundred-megabyte bundle through this
/// cooker-side callback never holds the full bundle in this process's
/// memory.
async fn put_bundle(
    State(state): State<Arc<AppState>>,
    Path((ty, id)): Path<(String, String)>,
    body: axum::body::Body,
) -> Response {
    let (bundle_type, object_id) = match parse_coordinates(&ty, &id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let chunks = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(|e| VaultError::Io(std::io::Error::other(e))));
    match state.cache.add_stream(bundle_type, object_id, Box::pin(chunks)).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => err_response(e),
    }
}

async fn send_notif(State(state): State<Arc<AppState>>, Path((ty, id)): Path<(String, String)>) -> Response {
    let (bundle_type, object_id) = match parse_coordinates(&ty, &id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    state.framework.send_all_notifications(bundle_type, object_id).await;
    StatusCode::OK.into_response()
}
