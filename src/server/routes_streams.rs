use crate::server::AppContext;
use crate::session::{SessionError, StreamSummary};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

pub fn stream_routes() -> Router<AppContext> {
    Router::new()
        .route("/streams", post(create_stream))
        .route("/streams", get(list_streams))
        .route("/streams", delete(stop_all_streams))
        .route("/streams/:id", get(stream_status))
        .route("/streams/:id", delete(release_stream))
}

pub async fn health(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "active_streams": ctx.registry.active_count(),
        "uptime_secs": ctx.started_at.elapsed().as_secs(),
    }))
}

#[derive(Deserialize)]
struct CreateStreamRequest {
    source_url: Option<String>,
    name: Option<String>,
}

#[derive(Serialize)]
struct CreateStreamResponse {
    stream_id: String,
    manifest_url: String,
    name: Option<String>,
    /// False when the caller attached to an already-running stream.
    is_new: bool,
}

/// Create a stream for a source URL, or attach to the existing one.
///
/// Blocks until the stream is ready for playback or the readiness bound
/// elapses. Failure reasons are distinct so a caller can tell "fix the URL"
/// from "retry later".
async fn create_stream(
    State(ctx): State<AppContext>,
    Json(payload): Json<CreateStreamRequest>,
) -> Result<(StatusCode, Json<CreateStreamResponse>), (StatusCode, String)> {
    let source_url = payload.source_url.unwrap_or_default();

    let created = ctx
        .registry
        .get_or_create(&source_url, payload.name)
        .await
        .map_err(error_response)?;

    let status = if created.is_new {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(CreateStreamResponse {
            stream_id: created.stream_id,
            manifest_url: created.manifest_url,
            name: created.name,
            is_new: created.is_new,
        }),
    ))
}

/// Release one viewer reference. Unknown ids are treated as already stopped.
async fn release_stream(State(ctx): State<AppContext>, Path(id): Path<String>) -> StatusCode {
    ctx.registry.release(&id);
    StatusCode::NO_CONTENT
}

/// Administrative stop of every stream, regardless of viewer counts.
async fn stop_all_streams(State(ctx): State<AppContext>) -> StatusCode {
    ctx.registry.stop_all();
    StatusCode::NO_CONTENT
}

async fn list_streams(State(ctx): State<AppContext>) -> Json<Vec<StreamSummary>> {
    Json(ctx.registry.list())
}

async fn stream_status(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<StreamSummary>, StatusCode> {
    ctx.registry
        .status(&id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

fn error_response(err: SessionError) -> (StatusCode, String) {
    let status = match &err {
        SessionError::MissingUrl | SessionError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
        SessionError::Spawn(_) => StatusCode::BAD_GATEWAY,
        SessionError::ReadinessTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        SessionError::UnexpectedExit { .. } => StatusCode::BAD_GATEWAY,
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
    };
    (status, err.to_string())
}
