//! HTTP control plane routes
//!
//! All command endpoints take a JSON body with `stream_id`; a missing or
//! malformed field is a 400, an unregistered id a 404. The record endpoints
//! are synchronous towards the caller: they poll the observed state for the
//! recorder's confirmation so a 200 means the file really exists.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use nvr_common::{CaptureCommand, RecorderCommand};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ApiError;
use crate::files::{self, ListFilter};
use crate::state::{ControlState, StartGate, StopGate, StreamControl, StreamHandles};

/// `/record/start` waits this long for `recordingStarted`.
const START_POLL_TOTAL: Duration = Duration::from_secs(2);
const START_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// `/record/stop` only needs the already-known file, so it waits less.
const STOP_POLL_TOTAL: Duration = Duration::from_secs(1);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Build the control-plane router.
pub fn control_router(state: Arc<ControlState>) -> Router {
    Router::new()
        .route("/stream/start", post(stream_start))
        .route("/stream/stop", post(stream_stop))
        .route("/record/start", post(record_start))
        .route("/record/stop", post(record_stop))
        .route("/stream/status", get(stream_status))
        .route("/files/list", get(files_list))
        .route("/files/status", get(files_status))
        .route("/files/remove", post(files_remove))
        .fallback(|| async { (StatusCode::NOT_FOUND, "Not Found") })
        .with_state(state)
}

/// Extract `stream_id` from a JSON body.
fn parse_stream_id(body: &str) -> Result<String, ApiError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ApiError::BadRequest(format!("JSON parse error: {e}")))?;
    value
        .get("stream_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("Missing or invalid 'stream_id'".into()))
}

fn known_handles<'a>(
    state: &'a ControlState,
    id: &str,
) -> Result<&'a StreamHandles, ApiError> {
    state
        .handles(id)
        .ok_or_else(|| ApiError::UnknownStream(id.to_string()))
}

/// Basename presented to HTTP clients; the files API only accepts basenames.
fn file_name(path: &Path) -> Value {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| json!(n))
        .unwrap_or(Value::Null)
}

async fn poll_last_file(
    state: &ControlState,
    id: &str,
    total: Duration,
    interval: Duration,
) -> Option<std::path::PathBuf> {
    let deadline = tokio::time::Instant::now() + total;
    loop {
        if let Some(file) = state.last_file(id).await {
            return Some(file);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(interval).await;
    }
}

async fn stream_start(
    State(state): State<Arc<ControlState>>,
    body: String,
) -> Result<Json<Value>, ApiError> {
    let id = parse_stream_id(&body)?;
    debug!(stream_id = %id, "POST /stream/start");
    let handles = known_handles(&state, &id)?;

    handles
        .capture
        .send(CaptureCommand::Enable)
        .await
        .map_err(|_| ApiError::Internal("capture worker unavailable".into()))?;

    Ok(Json(json!({ "status": "ok", "stream_id": id })))
}

async fn stream_stop(
    State(state): State<Arc<ControlState>>,
    body: String,
) -> Result<Json<Value>, ApiError> {
    let id = parse_stream_id(&body)?;
    debug!(stream_id = %id, "POST /stream/stop");
    let handles = known_handles(&state, &id)?;

    handles
        .capture
        .send(CaptureCommand::Disable)
        .await
        .map_err(|_| ApiError::Internal("capture worker unavailable".into()))?;

    Ok(Json(json!({ "status": "ok", "stream_id": id })))
}

async fn record_start(
    State(state): State<Arc<ControlState>>,
    body: String,
) -> Result<Response, ApiError> {
    let id = parse_stream_id(&body)?;
    debug!(stream_id = %id, "POST /record/start");
    let handles = known_handles(&state, &id)?;

    match state.begin_record_start(&id).await {
        StartGate::AlreadyRecording(file) => {
            let file = file.as_deref().map(file_name).unwrap_or(Value::Null);
            return Ok(Json(json!({
                "status": "ok",
                "stream_id": id,
                "message": "already recording",
                "file": file,
            }))
            .into_response());
        }
        StartGate::AlreadyPending => {
            return Ok((
                StatusCode::ACCEPTED,
                Json(json!({
                    "status": "pending",
                    "stream_id": id,
                    "message": "start already pending",
                })),
            )
                .into_response());
        }
        StartGate::Proceed => {}
    }

    handles
        .recorder
        .send(RecorderCommand::Start)
        .await
        .map_err(|_| ApiError::Internal("recorder worker unavailable".into()))?;

    // A timeout does not roll the pending flag back: the late notification
    // still completes the pending → recording transition.
    match poll_last_file(&state, &id, START_POLL_TOTAL, START_POLL_INTERVAL).await {
        Some(file) => Ok(Json(json!({
            "status": "ok",
            "stream_id": id,
            "file": file_name(&file),
        }))
        .into_response()),
        None => Err(ApiError::Internal(
            "timeout waiting for recording to start".into(),
        )),
    }
}

async fn record_stop(
    State(state): State<Arc<ControlState>>,
    body: String,
) -> Result<Json<Value>, ApiError> {
    let id = parse_stream_id(&body)?;
    debug!(stream_id = %id, "POST /record/stop");
    let handles = known_handles(&state, &id)?;

    match state.begin_record_stop(&id).await {
        StopGate::NotRecording(file) => {
            let file = file.as_deref().map(file_name).unwrap_or(Value::Null);
            return Ok(Json(json!({
                "status": "ok",
                "stream_id": id,
                "message": "not recording",
                "file": file,
            })));
        }
        StopGate::Proceed => {}
    }

    handles
        .recorder
        .send(RecorderCommand::Stop)
        .await
        .map_err(|_| ApiError::Internal("recorder worker unavailable".into()))?;

    let file = poll_last_file(&state, &id, STOP_POLL_TOTAL, STOP_POLL_INTERVAL)
        .await
        .map(|f| file_name(&f))
        .unwrap_or(Value::Null);

    Ok(Json(json!({
        "status": "ok",
        "stream_id": id,
        "file": file,
    })))
}

fn stream_json(id: &str, control: &StreamControl) -> Value {
    json!({
        "stream_id": id,
        "streaming": control.streaming,
        "recording": control.recording,
        "file": control.last_file.as_deref().map(file_name).unwrap_or(Value::Null),
    })
}

async fn stream_status(
    State(state): State<Arc<ControlState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    if let Some(id) = params.get("stream_id") {
        let snapshot = state
            .snapshot(id)
            .await
            .ok_or_else(|| ApiError::UnknownStream(id.clone()))?;
        return Ok(Json(json!({
            "status": "ok",
            "stream": stream_json(id, &snapshot),
        })));
    }

    let streams: Vec<Value> = state
        .snapshot_all()
        .await
        .iter()
        .map(|(id, s)| stream_json(id, s))
        .collect();
    Ok(Json(json!({ "status": "ok", "streams": streams })))
}

async fn files_list(
    State(state): State<Arc<ControlState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let filter = if params.get("all").map(String::as_str) == Some("1") {
        ListFilter::All
    } else {
        let ext = params.get("ext").cloned().unwrap_or_else(|| "mp4".into());
        ListFilter::Extension(ext)
    };

    let listed = files::list_files(&state.recordings_dir, &filter)?;
    Ok(Json(json!({ "status": "ok", "files": listed })))
}

async fn files_status(
    State(state): State<Arc<ControlState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let name = params
        .get("file")
        .ok_or_else(|| ApiError::BadRequest("Missing 'file' parameter".into()))?;
    let entry = files::stat_file(&state.recordings_dir, name)?;
    Ok(Json(json!({ "status": "ok", "file": entry })))
}

async fn files_remove(
    State(state): State<Arc<ControlState>>,
    Query(params): Query<HashMap<String, String>>,
    body: String,
) -> Result<Json<Value>, ApiError> {
    // Accept the name either as a query parameter or a JSON body.
    let name = match params.get("file") {
        Some(name) => name.clone(),
        None => {
            let value: Value = serde_json::from_str(&body)
                .map_err(|e| ApiError::BadRequest(format!("JSON parse error: {e}")))?;
            value
                .get("file")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| ApiError::BadRequest("Missing or invalid 'file'".into()))?
        }
    };

    files::remove_file(&state.recordings_dir, &name)?;
    debug!(file = %name, "recording removed");
    Ok(Json(json!({ "status": "ok", "file": name })))
}
