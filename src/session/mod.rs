//! Stream session management.
//!
//! One [`StreamSession`] per distinct source URL, each owning one transcoder
//! process, one output directory, and a viewer reference count. The
//! [`StreamRegistry`] arbitrates every create/attach/release/stop, enforcing
//! at most one live process per source URL.
//!
//! All registry state lives behind a single mutex; timers and the process
//! exit monitor re-enter through registry methods, so every transition is
//! serialized. The lock is never held across an await point.

mod error;
pub mod process;
pub mod readiness;

pub use error::SessionError;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TranscoderConfig;
use crate::events::StreamEvent;
use process::TranscoderProcess;
use readiness::{await_manifest_ready, Readiness};

/// File name of the live playlist inside each stream's output directory.
pub const MANIFEST_NAME: &str = "stream.m3u8";

/// Lifecycle state of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    /// Process spawned, waiting for first playable output.
    Starting,
    /// Playable output exists; viewers attached.
    Ready,
    /// No viewers; stop scheduled unless one re-attaches.
    Draining,
    /// Process terminated normally.
    Stopped,
    /// Process failed or exited unexpectedly.
    Failed,
}

/// Signals shared between the registry and in-flight readiness waiters.
///
/// `cancel` unblocks waiters when the session is terminated mid-start;
/// `exit_code` carries the process exit code to them when the termination
/// was an unexpected process death rather than an administrative stop.
struct SessionSignals {
    cancel: Notify,
    exit_code: Mutex<Option<Option<i32>>>,
}

/// One managed transcode of a single source URL.
struct StreamSession {
    id: String,
    source_url: String,
    name: Option<String>,
    output_dir: PathBuf,
    state: StreamState,
    viewers: u32,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    /// Bumped on every viewer attach; a drain timer only fires if the epoch
    /// it captured is still current, which makes re-attach cancellation
    /// deterministic.
    drain_epoch: u64,
    drain_deadline: Option<DateTime<Utc>>,
    process: TranscoderProcess,
    signals: Arc<SessionSignals>,
}

impl StreamSession {
    fn attach_viewer(&mut self) {
        self.viewers += 1;
        self.last_activity = Utc::now();
        self.drain_epoch += 1;
        self.drain_deadline = None;
        if self.state == StreamState::Draining {
            self.state = StreamState::Ready;
        }
    }

    fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(MANIFEST_NAME)
    }
}

/// Point-in-time snapshot of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSummary {
    pub stream_id: String,
    pub source_url: String,
    pub name: Option<String>,
    pub viewers: u32,
    pub state: StreamState,
    pub pid: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// When a draining session will stop unless a viewer re-attaches.
    pub drain_deadline: Option<DateTime<Utc>>,
}

/// Result of a successful create/attach.
#[derive(Debug, Clone)]
pub struct CreatedStream {
    pub stream_id: String,
    pub manifest_url: String,
    pub name: Option<String>,
    /// False when the caller attached to an existing session (dedup hit).
    pub is_new: bool,
}

#[derive(Default)]
struct RegistryInner {
    by_id: HashMap<String, StreamSession>,
    by_url: HashMap<String, String>,
    /// Insertion order of session ids, for stable listing.
    order: Vec<String>,
}

impl RegistryInner {
    fn remove(&mut self, id: &str) -> Option<StreamSession> {
        let session = self.by_id.remove(id)?;
        self.by_url.remove(&session.source_url);
        self.order.retain(|entry| entry != id);
        Some(session)
    }

    fn summarize(session: &StreamSession) -> StreamSummary {
        StreamSummary {
            stream_id: session.id.clone(),
            source_url: session.source_url.clone(),
            name: session.name.clone(),
            viewers: session.viewers,
            state: session.state,
            pid: session.process.pid(),
            created_at: session.created_at,
            last_activity: session.last_activity,
            drain_deadline: session.drain_deadline,
        }
    }
}

/// Registry of active stream sessions.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct StreamRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    config: Arc<TranscoderConfig>,
    events: broadcast::Sender<StreamEvent>,
    /// Processes spawned but not yet confirmed dead; shutdown waits on this.
    live_processes: Arc<AtomicUsize>,
}

impl StreamRegistry {
    pub fn new(config: TranscoderConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::default())),
            config: Arc::new(config),
            events,
            live_processes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Subscribe to stream lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    fn broadcast(&self, event: StreamEvent) {
        if self.events.send(event).is_err() {
            debug!("No subscribers for stream event");
        }
    }

    /// Get an existing session for `source_url` or create a new one, then
    /// wait until it is ready for playback.
    ///
    /// The check-then-create runs under the registry lock, so concurrent
    /// callers for the same unseen URL produce exactly one session and one
    /// spawned process; later callers attach as viewers. Callers that hit a
    /// session still in [`StreamState::Starting`] share its readiness wait.
    pub async fn get_or_create(
        &self,
        source_url: &str,
        name: Option<String>,
    ) -> Result<CreatedStream, SessionError> {
        let url = source_url.trim();
        if url.is_empty() {
            return Err(SessionError::MissingUrl);
        }
        if !url.contains("://") {
            return Err(SessionError::InvalidUrl(url.to_string()));
        }

        let (id, manifest, signals, must_wait, is_new, name) = {
            let mut inner = self.inner.lock();

            if let Some(existing_id) = inner.by_url.get(url).cloned() {
                let session = inner
                    .by_id
                    .get_mut(&existing_id)
                    .expect("URL index points at missing session");
                session.attach_viewer();
                info!(
                    stream_id = %existing_id,
                    viewers = session.viewers,
                    "Viewer attached to existing stream"
                );
                (
                    existing_id,
                    session.manifest_path(),
                    Arc::clone(&session.signals),
                    session.state == StreamState::Starting,
                    false,
                    session.name.clone(),
                )
            } else {
                let id = Uuid::new_v4().to_string();
                let output_dir = self.config.output_root.join(&id);
                std::fs::create_dir_all(&output_dir).map_err(SessionError::Spawn)?;

                let args = process::build_args(&self.config, url, &output_dir);
                let (proc, exit_rx) =
                    match TranscoderProcess::spawn(&self.config.ffmpeg_path, &args) {
                        Ok(spawned) => spawned,
                        Err(e) => {
                            // No process was launched; the directory must not leak.
                            let _ = std::fs::remove_dir_all(&output_dir);
                            warn!(source_url = url, "Failed to spawn transcoder: {}", e);
                            return Err(SessionError::Spawn(e));
                        }
                    };
                self.live_processes.fetch_add(1, Ordering::SeqCst);

                let now = Utc::now();
                let signals = Arc::new(SessionSignals {
                    cancel: Notify::new(),
                    exit_code: Mutex::new(None),
                });
                let session = StreamSession {
                    id: id.clone(),
                    source_url: url.to_string(),
                    name: name.clone(),
                    output_dir,
                    state: StreamState::Starting,
                    viewers: 1,
                    created_at: now,
                    last_activity: now,
                    drain_epoch: 0,
                    drain_deadline: None,
                    process: proc,
                    signals: Arc::clone(&signals),
                };
                let manifest = session.manifest_path();

                inner.by_url.insert(url.to_string(), id.clone());
                inner.order.push(id.clone());
                inner.by_id.insert(id.clone(), session);

                info!(stream_id = %id, source_url = url, "Started new stream");
                self.broadcast(StreamEvent::started(&id, url));
                self.watch_exit(id.clone(), exit_rx);

                (id, manifest, signals, true, true, name)
            }
        };

        if must_wait {
            match await_manifest_ready(
                &manifest,
                self.config.readiness_timeout(),
                self.config.readiness_poll(),
                &signals.cancel,
            )
            .await
            {
                Readiness::Ready => self.mark_ready(&id),
                Readiness::TimedOut => {
                    // A death in the instant before we subscribed to the
                    // cancel signal surfaces here instead of as Cancelled.
                    if let Some(code) = signals.exit_code.lock().take() {
                        return Err(SessionError::UnexpectedExit { code });
                    }
                    self.fail_unready(&id);
                    return Err(SessionError::ReadinessTimeout(
                        self.config.readiness_timeout(),
                    ));
                }
                Readiness::Cancelled => {
                    let code = signals.exit_code.lock().take().flatten();
                    return Err(SessionError::UnexpectedExit { code });
                }
            }
        }

        Ok(CreatedStream {
            manifest_url: manifest_url(&id),
            stream_id: id,
            name,
            is_new,
        })
    }

    /// Release one viewer reference on a session.
    ///
    /// Unknown ids are treated as already stopped: callers legitimately race
    /// with completed teardowns. When the count reaches zero the session
    /// drains; the stop only happens if no viewer re-attaches before the
    /// drain deadline.
    pub fn release(&self, stream_id: &str) {
        let armed = {
            let mut inner = self.inner.lock();
            let Some(session) = inner.by_id.get_mut(stream_id) else {
                debug!(stream_id, "Release for unknown stream (already stopped?)");
                return;
            };

            session.viewers = session.viewers.saturating_sub(1);
            if session.viewers > 0 {
                debug!(stream_id, viewers = session.viewers, "Viewer released");
                None
            } else {
                session.drain_epoch += 1;
                session.drain_deadline =
                    Some(Utc::now() + chrono::Duration::from_std(self.config.drain())
                        .unwrap_or_else(|_| chrono::Duration::seconds(60)));
                if session.state == StreamState::Ready {
                    session.state = StreamState::Draining;
                }
                info!(
                    stream_id,
                    drain_secs = self.config.drain_secs,
                    "Last viewer left, stream draining"
                );
                Some(session.drain_epoch)
            }
        };

        if let Some(epoch) = armed {
            self.arm_drain_timer(stream_id.to_string(), epoch);
        }
    }

    /// Snapshot of a single session.
    pub fn status(&self, stream_id: &str) -> Option<StreamSummary> {
        let inner = self.inner.lock();
        inner.by_id.get(stream_id).map(RegistryInner::summarize)
    }

    /// Point-in-time snapshot of all sessions, in insertion order.
    pub fn list(&self) -> Vec<StreamSummary> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .map(RegistryInner::summarize)
            .collect()
    }

    /// Number of active sessions.
    pub fn active_count(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    /// Number of transcoder processes not yet confirmed dead.
    pub fn live_process_count(&self) -> usize {
        self.live_processes.load(Ordering::SeqCst)
    }

    /// Terminate every session unconditionally and clear the registry.
    ///
    /// Administrative override, distinct from per-viewer release. In-flight
    /// readiness waits are unblocked.
    pub fn stop_all(&self) {
        let sessions: Vec<StreamSession> = {
            let mut inner = self.inner.lock();
            let ids: Vec<String> = inner.order.clone();
            ids.iter().filter_map(|id| inner.remove(id)).collect()
        };

        if sessions.is_empty() {
            return;
        }

        info!(count = sessions.len(), "Stopping all streams");
        for session in sessions {
            session.process.terminate();
            session.signals.cancel.notify_waiters();
            self.broadcast(StreamEvent::stopped(&session.id));
            self.schedule_cleanup(session.output_dir);
        }
    }

    /// Stop every session and wait for the child processes to die.
    ///
    /// Called on process-wide shutdown so no transcoder is orphaned.
    pub async fn shutdown(&self) {
        self.stop_all();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while self.live_processes.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.live_processes.load(Ordering::SeqCst),
                    "Shutdown proceeding with transcoders still dying"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        info!("Stream registry shut down");
    }

    /// Transition a session out of `Starting` once its output is playable.
    ///
    /// No-op if the session stopped or failed while the caller was polling;
    /// with several callers sharing one readiness wait, the first transition
    /// wins.
    fn mark_ready(&self, stream_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(session) = inner.by_id.get_mut(stream_id) {
            if session.state == StreamState::Starting {
                session.state = StreamState::Ready;
                info!(stream_id, "Stream ready for playback");
                self.broadcast(StreamEvent::ready(stream_id, &manifest_url(stream_id)));
            }
        }
    }

    /// Fail a session that never became ready; the non-producing process
    /// must not be left running.
    fn fail_unready(&self, stream_id: &str) {
        let session = {
            let mut inner = self.inner.lock();
            inner.remove(stream_id)
        };
        // Another waiter, or the exit monitor, may have evicted it first.
        let Some(mut session) = session else { return };

        session.state = StreamState::Failed;
        warn!(
            stream_id,
            source_url = %session.source_url,
            "Stream produced no playable output, terminating transcoder"
        );
        session.process.terminate();
        session.signals.cancel.notify_waiters();
        self.broadcast(StreamEvent::failed(stream_id, "readiness timeout"));
        self.schedule_cleanup(session.output_dir);
    }

    /// Forward the single process exit event into the registry.
    fn watch_exit(&self, stream_id: String, exit_rx: oneshot::Receiver<Option<i32>>) {
        let registry = self.clone();
        tokio::spawn(async move {
            let code = exit_rx.await.unwrap_or(None);
            registry.handle_process_exit(&stream_id, code);
        });
    }

    /// Record a process exit.
    ///
    /// For expected stops the session was already evicted and only the live
    /// process counter changes. A session still present means the process
    /// died under us: mark it failed, evict it, unblock waiters, and notify
    /// subscribers out-of-band. This mutation never fails.
    fn handle_process_exit(&self, stream_id: &str, code: Option<i32>) {
        self.live_processes.fetch_sub(1, Ordering::SeqCst);

        let session = {
            let mut inner = self.inner.lock();
            inner.remove(stream_id)
        };
        let Some(mut session) = session else {
            debug!(stream_id, code = ?code, "Expected transcoder exit");
            return;
        };

        session.state = StreamState::Failed;
        warn!(
            stream_id,
            code = ?code,
            viewers = session.viewers,
            "Transcoder exited unexpectedly"
        );
        *session.signals.exit_code.lock() = Some(code);
        session.signals.cancel.notify_waiters();
        self.broadcast(StreamEvent::failed(
            stream_id,
            format!("transcoder exited (code {:?})", code),
        ));
        self.schedule_cleanup(session.output_dir);
    }

    fn arm_drain_timer(&self, stream_id: String, epoch: u64) {
        let registry = self.clone();
        let drain = self.config.drain();
        tokio::spawn(async move {
            tokio::time::sleep(drain).await;
            registry.complete_drain(&stream_id, epoch);
        });
    }

    /// Stop a drained session, unless a viewer re-attached in the meantime.
    fn complete_drain(&self, stream_id: &str, epoch: u64) {
        let session = {
            let mut inner = self.inner.lock();
            match inner.by_id.get(stream_id) {
                Some(session) if session.drain_epoch == epoch && session.viewers == 0 => {
                    inner.remove(stream_id)
                }
                _ => None, // re-attached, already gone, or stale timer
            }
        };
        let Some(mut session) = session else { return };

        session.state = StreamState::Stopped;
        info!(stream_id, "Drain deadline elapsed, stopping stream");
        session.process.terminate();
        session.signals.cancel.notify_waiters();
        self.broadcast(StreamEvent::stopped(stream_id));
        self.schedule_cleanup(session.output_dir);
    }

    /// Delete a stream's output directory after the configured grace period,
    /// letting in-flight segment reads complete first.
    fn schedule_cleanup(&self, output_dir: PathBuf) {
        let grace = self.config.cleanup_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            match tokio::fs::remove_dir_all(&output_dir).await {
                Ok(()) => debug!(dir = ?output_dir, "Removed stream output"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(dir = ?output_dir, "Failed to remove stream output: {}", e),
            }
        });
    }
}

/// Public URL of a stream's manifest.
pub fn manifest_url(stream_id: &str) -> String {
    format!("/streams/{}/{}", stream_id, MANIFEST_NAME)
}
