use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by stream session operations.
///
/// Validation errors are returned before any resource is allocated. Process
/// lifecycle failures are recorded on the session and surfaced to whichever
/// caller is waiting; the registry mutation that records a failure never
/// fails itself.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("source URL is required")]
    MissingUrl,

    #[error("invalid source URL: {0}")]
    InvalidUrl(String),

    #[error("failed to launch transcoder: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("stream produced no playable output within {0:?}")]
    ReadinessTimeout(Duration),

    #[error("transcoder exited unexpectedly (code {code:?})")]
    UnexpectedExit { code: Option<i32> },

    #[error("stream not found: {0}")]
    NotFound(String),
}
