//! Local HTTP surface: remote commands, UI call button, status and snapshot.

use crate::backend::Backend;
use crate::call::{CallService, CallSession, PressOutcome};
use crate::controller::{CycleGuard, CyclePhase};
use crate::door::{DoorCell, LockState};
use crate::gallery_sync;
use crate::panel::Panel;
use crate::remote::{self, AuthError, RemoteChannel};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use doorward_core::GalleryStore;
use doorward_hw::LatestFrame;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything the handlers reach into.
#[derive(Clone)]
pub struct AppState {
    pub device_id: String,
    pub remote: Arc<RemoteChannel>,
    pub door: DoorCell,
    pub panel: Panel,
    pub calls: Arc<CallService<dyn Backend>>,
    pub backend: Arc<dyn Backend>,
    pub gallery: Arc<GalleryStore>,
    pub cycle: Arc<CycleGuard>,
    pub frames: LatestFrame,
    /// `None` when streaming is disabled.
    pub stream_health: Option<Arc<AtomicBool>>,
    pub jpeg_quality: u8,
}

#[derive(Deserialize)]
pub struct ControlRequest {
    data: Option<String>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    status: &'static str,
    device_id: String,
    door_state: LockState,
    recognition: CyclePhase,
    call: CallSession,
    gallery_size: usize,
    streaming: &'static str,
}

type Reply = (StatusCode, Json<Value>);

fn error(code: StatusCode, message: impl Into<String>) -> Reply {
    (code, Json(json!({ "error": message.into() })))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/door/control", post(door_control))
        .route("/api/call", post(call))
        .route("/api/call/hangup", post(hangup))
        .route("/api/gallery/refresh", post(refresh_gallery))
        .route("/api/status", get(status))
        .route("/api/frame.jpg", get(frame))
        .with_state(state)
}

/// Serve until `cancel` fires.
pub async fn serve(addr: &str, state: AppState, cancel: CancellationToken) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "http surface listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

/// POST /api/door/control
pub async fn door_control(State(state): State<AppState>, body: Option<Json<ControlRequest>>) -> Reply {
    let Some(envelope) = body.and_then(|Json(req)| req.data).filter(|d| !d.is_empty()) else {
        tracing::warn!("door control rejected: missing payload");
        return error(StatusCode::BAD_REQUEST, "missing data");
    };

    let command = match state.remote.handle(&envelope, Utc::now()) {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!(error = %e, "door control rejected");
            let message = match e {
                AuthError::Replayed => "command already used",
                AuthError::Expired { .. } => "command expired",
                AuthError::Envelope(_) => "invalid command",
            };
            return error(StatusCode::FORBIDDEN, message);
        }
    };

    let applied = remote::apply(command, &state.door, &state.panel, &state.calls);
    (StatusCode::OK, Json(json!({ "status": applied.status() })))
}

/// POST /api/call
pub async fn call(State(state): State<AppState>) -> Reply {
    let outcome = state.calls.press();
    tracing::info!(?outcome, "call requested over http");
    let code = match outcome {
        PressOutcome::Accepted => StatusCode::OK,
        PressOutcome::Debounced => StatusCode::TOO_MANY_REQUESTS,
        PressOutcome::Busy => StatusCode::CONFLICT,
    };
    let status = remote::Applied::Call(outcome).status();
    (code, Json(json!({ "status": status })))
}

/// POST /api/call/hangup
pub async fn hangup(State(state): State<AppState>) -> Reply {
    if state.calls.hangup() {
        (StatusCode::OK, Json(json!({ "status": "call_ended" })))
    } else {
        error(StatusCode::CONFLICT, "no active call")
    }
}

/// POST /api/gallery/refresh
pub async fn refresh_gallery(State(state): State<AppState>) -> Reply {
    match gallery_sync::refresh(state.backend.as_ref(), &state.gallery).await {
        Ok(entries) => (StatusCode::OK, Json(json!({ "status": "ok", "entries": entries }))),
        Err(e) => {
            tracing::warn!(error = %e, "gallery refresh failed");
            error(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

/// GET /api/status
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let streaming = match &state.stream_health {
        None => "disabled",
        Some(healthy) if healthy.load(Ordering::Relaxed) => "active",
        Some(_) => "paused",
    };
    Json(StatusResponse {
        status: "ok",
        device_id: state.device_id.clone(),
        door_state: state.door.get().state,
        recognition: state.cycle.phase(),
        call: state.calls.session(),
        gallery_size: state.gallery.len(),
        streaming,
    })
}

/// GET /api/frame.jpg
pub async fn frame(State(state): State<AppState>) -> Response {
    let latest = state.frames.borrow().clone();
    let Some(frame) = latest else {
        return error(StatusCode::NOT_FOUND, "no frame captured yet").into_response();
    };
    let quality = state.jpeg_quality;
    match tokio::task::spawn_blocking(move || frame.to_jpeg(quality)).await {
        Ok(Ok(jpeg)) => ([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        Ok(Err(e)) => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
