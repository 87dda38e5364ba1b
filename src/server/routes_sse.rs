use crate::events::StreamEvent;
use crate::server::AppContext;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

pub fn sse_routes() -> Router<AppContext> {
    Router::new().route("/events", get(events_handler))
}

/// Push stream lifecycle events to clients.
///
/// This is the out-of-band failure channel: a viewer whose stream dies sees
/// a `stream_failed` event here before their playlist polling stalls.
pub async fn events_handler(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = ctx.registry.subscribe();

    let stream = BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event: StreamEvent| {
            // Unnamed SSE events so EventSource.onmessage receives everything;
            // the event_type field in the JSON drives client-side routing.
            let data = serde_json::to_string(&event)
                .unwrap_or_else(|e| format!(r#"{{"error": "serialization failed: {}"}}"#, e));
            Ok(Event::default().data(data))
        });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
