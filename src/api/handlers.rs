//! HTTP API handlers

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::api::server::AppState;
use crate::error::{CompileError, SessionError};
use crate::protocol::{Channel, ChunkMetadata, CompileResponse, SessionInfo};

/// API response wrapper
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Liveness
#[derive(serde::Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus { status: "ok" })
}

pub(crate) fn session_error_status(error: &SessionError) -> StatusCode {
    match error {
        SessionError::NotFound(_) | SessionError::NoArtifact(_) => StatusCode::NOT_FOUND,
        SessionError::Active(_) => StatusCode::CONFLICT,
        SessionError::InvalidId(_)
        | SessionError::Framing { .. }
        | SessionError::ChannelMismatch { .. } => StatusCode::BAD_REQUEST,
        SessionError::Unauthorized => StatusCode::UNAUTHORIZED,
        SessionError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn compile_error_status(error: &CompileError) -> StatusCode {
    match error {
        CompileError::InsufficientData(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CompileError::Session(e) => session_error_status(e),
        CompileError::Process { .. } | CompileError::Spawn(_) | CompileError::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn session_failure<T>(error: SessionError) -> (StatusCode, Json<ApiResponse<T>>) {
    (
        session_error_status(&error),
        Json(ApiResponse::error(error.to_string())),
    )
}

/// All sessions, newest first
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionInfo>> {
    Json(state.registry.list_sessions())
}

/// One session
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse<SessionInfo>>) {
    match state.registry.session_info(&id) {
        Ok(info) => (StatusCode::OK, Json(ApiResponse::ok(info))),
        Err(e) => session_failure(e),
    }
}

/// Chunk ledger of one channel
pub async fn get_chunks(
    State(state): State<Arc<AppState>>,
    Path((id, channel)): Path<(String, Channel)>,
) -> (StatusCode, Json<ApiResponse<Vec<ChunkMetadata>>>) {
    match state.registry.ledger(&id, channel).await {
        Ok(ledger) => (StatusCode::OK, Json(ApiResponse::ok(ledger))),
        Err(e) => session_failure(e),
    }
}

/// Compile a session and wait for the result
pub async fn compile_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<CompileResponse>) {
    let result = state.pipeline.compile(&id).await;
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(e) => compile_error_status(e),
    };
    (status, Json(CompileResponse::from(result)))
}

/// Compiled artifact, streamed from disk with range support
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Request,
) -> Response {
    let path = match state.registry.artifact(&id) {
        Ok(path) => path,
        Err(e) => return session_failure::<()>(e).into_response(),
    };

    let response = match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    if response.status() == StatusCode::NOT_FOUND {
        return session_failure::<()>(SessionError::NoArtifact(id)).into_response();
    }

    let mut response = response.map(Body::new);
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}.mp4\"", id)) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

/// Delete a session and its files
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse<()>>) {
    match state.registry.delete_session(&id).await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok(()))),
        Err(e) => session_failure(e),
    }
}
