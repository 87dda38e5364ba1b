//! Serves HLS manifests and segments from stream output directories.
//!
//! Content type is negotiated by file extension. Live playlists must not be
//! cached (the player re-polls them), while segments are immutable once
//! written.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::server::AppContext;

/// Serve one file from a stream's output directory.
pub async fn stream_file(
    State(ctx): State<AppContext>,
    Path((stream_id, file_name)): Path<(String, String)>,
) -> Result<Response, StatusCode> {
    // Output directories are flat and named by session id; anything that
    // looks like a path escape is rejected outright.
    if !is_safe_component(&stream_id) || !is_safe_component(&file_name) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let path = ctx
        .config
        .transcoder
        .output_root
        .join(&stream_id)
        .join(&file_name);

    let file = File::open(&path).await.map_err(|_| StatusCode::NOT_FOUND)?;
    let metadata = file
        .metadata()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let (content_type, cache_control) = content_headers(&file_name);

    let body = Body::from_stream(ReaderStream::new(file));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, metadata.len().to_string())
        .header(header::CACHE_CONTROL, cache_control)
        .body(body)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

fn is_safe_component(component: &str) -> bool {
    !component.is_empty()
        && component != ".."
        && !component.contains('/')
        && !component.contains('\\')
}

fn content_headers(file_name: &str) -> (&'static str, &'static str) {
    if file_name.ends_with(".m3u8") {
        ("application/vnd.apple.mpegurl", "no-store")
    } else if file_name.ends_with(".ts") {
        ("video/mp2t", "max-age=60, immutable")
    } else {
        ("application/octet-stream", "no-store")
    }
}
