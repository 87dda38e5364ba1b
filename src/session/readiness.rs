//! Readiness gate for newly started streams.
//!
//! The transcoder is asynchronous relative to the request that started it:
//! the create call must not succeed until the stream is actually consumable,
//! but must not block forever on an unreachable source either. This module
//! polls the manifest on a bounded schedule and requires evidence of at least
//! one playable segment; a manifest that exists but only holds headers does
//! not count.

use std::path::Path;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Outcome of waiting for a stream's first playable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The manifest references at least one segment.
    Ready,
    /// The bound elapsed without playable output.
    TimedOut,
    /// The session was terminated while waiting.
    Cancelled,
}

/// Poll `manifest` every `poll` until it references a segment, the `timeout`
/// bound elapses, or `cancel` fires.
///
/// Returns rather than errors on timeout; the caller decides whether that is
/// a start failure. Total wall-clock time is bounded by `timeout + poll`.
pub async fn await_manifest_ready(
    manifest: &Path,
    timeout: Duration,
    poll: Duration,
    cancel: &Notify,
) -> Readiness {
    let deadline = Instant::now() + timeout;

    // A single pinned Notified catches a cancellation that lands between
    // select iterations, while the manifest check runs.
    let cancelled = cancel.notified();
    tokio::pin!(cancelled);

    loop {
        if manifest_has_segments(manifest) {
            return Readiness::Ready;
        }

        if Instant::now() >= deadline {
            return Readiness::TimedOut;
        }

        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            _ = &mut cancelled => return Readiness::Cancelled,
        }
    }
}

/// True when the manifest exists and references at least one media segment.
fn manifest_has_segments(manifest: &Path) -> bool {
    match std::fs::read_to_string(manifest) {
        Ok(content) => content.lines().any(|line| line.starts_with("#EXTINF")),
        Err(_) => false,
    }
}
