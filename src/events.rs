//! Application-wide events for SSE broadcasting.
//!
//! Stream lifecycle transitions are pushed to connected clients so a player
//! whose stream died can react without polling. Failures in particular are a
//! surfaced condition: a crashed transcoder stalls every attached viewer.

use serde::{Deserialize, Serialize};

/// A stream lifecycle event, broadcast to all SSE subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A transcoder process was launched for a new stream.
    StreamStarted {
        stream_id: String,
        source_url: String,
    },
    /// The stream produced its first playable output.
    StreamReady {
        stream_id: String,
        manifest_url: String,
    },
    /// The stream stopped normally (drained or administratively).
    StreamStopped { stream_id: String },
    /// The stream failed; attached viewers will stall.
    StreamFailed { stream_id: String, reason: String },
}

impl StreamEvent {
    pub fn started(stream_id: &str, source_url: &str) -> Self {
        StreamEvent::StreamStarted {
            stream_id: stream_id.to_string(),
            source_url: source_url.to_string(),
        }
    }

    pub fn ready(stream_id: &str, manifest_url: &str) -> Self {
        StreamEvent::StreamReady {
            stream_id: stream_id.to_string(),
            manifest_url: manifest_url.to_string(),
        }
    }

    pub fn stopped(stream_id: &str) -> Self {
        StreamEvent::StreamStopped {
            stream_id: stream_id.to_string(),
        }
    }

    pub fn failed(stream_id: &str, reason: impl Into<String>) -> Self {
        StreamEvent::StreamFailed {
            stream_id: stream_id.to_string(),
            reason: reason.into(),
        }
    }
}
