//! Stream session lifecycle tests against fake transcoders.
//!
//! Exercises the registry's dedup, reference counting, drain, readiness,
//! and cleanup behavior without a real ffmpeg.

mod common;

use std::time::Duration;

use common::{FakeTranscoder, TestHarness};

use camrelay::events::StreamEvent;
use camrelay::session::{SessionError, StreamState};

/// Poll until `check` passes or the bound elapses.
async fn eventually(bound: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + bound;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ---------------------------------------------------------------------------
// Deduplication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_creates_share_one_session() {
    let harness = TestHarness::new(FakeTranscoder::Ready);
    let url = "rtsp://cam1/live";

    let mut handles = Vec::new();
    for _ in 0..4 {
        let registry = harness.registry.clone();
        handles.push(tokio::spawn(async move {
            registry.get_or_create(url, None).await.unwrap()
        }));
    }

    let mut ids = Vec::new();
    let mut new_count = 0;
    for handle in handles {
        let created = handle.await.unwrap();
        if created.is_new {
            new_count += 1;
        }
        ids.push(created.stream_id);
    }

    ids.dedup();
    assert_eq!(ids.len(), 1, "all callers must share one session");
    assert_eq!(new_count, 1, "exactly one caller creates");
    assert_eq!(harness.registry.active_count(), 1);
    assert_eq!(harness.registry.live_process_count(), 1);

    let summary = harness.registry.status(&ids[0]).unwrap();
    assert_eq!(summary.viewers, 4);
    assert_eq!(summary.state, StreamState::Ready);
}

#[tokio::test]
async fn different_urls_get_different_sessions() {
    let harness = TestHarness::new(FakeTranscoder::Ready);

    let a = harness
        .registry
        .get_or_create("rtsp://cam1/live", None)
        .await
        .unwrap();
    let b = harness
        .registry
        .get_or_create("rtsp://cam2/live", None)
        .await
        .unwrap();

    assert_ne!(a.stream_id, b.stream_id);
    assert_eq!(harness.registry.active_count(), 2);

    // Listing preserves insertion order.
    let listed = harness.registry.list();
    assert_eq!(listed[0].stream_id, a.stream_id);
    assert_eq!(listed[1].stream_id, b.stream_id);
}

// ---------------------------------------------------------------------------
// Reference counting and drain
// ---------------------------------------------------------------------------

#[tokio::test]
async fn refcount_reaches_zero_then_stops_after_drain() {
    let harness = TestHarness::with_tweaks(FakeTranscoder::Ready, |t| t.drain_secs = 0);
    let url = "rtsp://cam1/live";

    let created = harness.registry.get_or_create(url, None).await.unwrap();
    for _ in 0..2 {
        harness.registry.get_or_create(url, None).await.unwrap();
    }
    assert_eq!(harness.registry.status(&created.stream_id).unwrap().viewers, 3);

    for _ in 0..3 {
        harness.registry.release(&created.stream_id);
    }

    // Zero drain: the stop happens as soon as the timer task runs.
    assert!(
        eventually(Duration::from_secs(5), || harness.registry.active_count() == 0).await,
        "session did not stop after draining"
    );

    // Output directory is deleted once the (zero) grace period passes.
    let dir = harness.output_root().join(&created.stream_id);
    assert!(
        eventually(Duration::from_secs(5), || !dir.exists()).await,
        "output directory was not cleaned up"
    );

    // The transcoder process is confirmed dead.
    assert!(
        eventually(Duration::from_secs(10), || {
            harness.registry.live_process_count() == 0
        })
        .await,
        "transcoder process survived the stop"
    );
}

#[tokio::test]
async fn reattach_before_deadline_cancels_drain() {
    let harness = TestHarness::with_tweaks(FakeTranscoder::Ready, |t| t.drain_secs = 1);
    let url = "rtsp://cam1/live";

    let created = harness.registry.get_or_create(url, None).await.unwrap();
    let pid_before = harness.registry.status(&created.stream_id).unwrap().pid;

    harness.registry.release(&created.stream_id);
    assert_eq!(
        harness.registry.status(&created.stream_id).unwrap().state,
        StreamState::Draining
    );

    // Re-attach before the 1s deadline.
    let again = harness.registry.get_or_create(url, None).await.unwrap();
    assert_eq!(again.stream_id, created.stream_id);
    assert!(!again.is_new);

    let summary = harness.registry.status(&created.stream_id).unwrap();
    assert_eq!(summary.state, StreamState::Ready);
    assert_eq!(summary.viewers, 1);
    assert_eq!(summary.pid, pid_before, "process must not be respawned");

    // The stale drain timer fires and must do nothing.
    tokio::time::sleep(Duration::from_millis(1400)).await;
    assert_eq!(harness.registry.active_count(), 1);
    assert_eq!(
        harness.registry.status(&created.stream_id).unwrap().state,
        StreamState::Ready
    );
}

#[tokio::test]
async fn double_release_never_goes_negative() {
    let harness = TestHarness::new(FakeTranscoder::Ready);
    let created = harness
        .registry
        .get_or_create("rtsp://cam1/live", None)
        .await
        .unwrap();

    // Default drain is 60s, so the session survives these releases.
    harness.registry.release(&created.stream_id);
    harness.registry.release(&created.stream_id);

    let summary = harness.registry.status(&created.stream_id).unwrap();
    assert_eq!(summary.viewers, 0);

    // A new viewer can still attach cleanly.
    let again = harness
        .registry
        .get_or_create("rtsp://cam1/live", None)
        .await
        .unwrap();
    assert_eq!(again.stream_id, created.stream_id);
    assert_eq!(harness.registry.status(&created.stream_id).unwrap().viewers, 1);
}

// ---------------------------------------------------------------------------
// Failure paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn readiness_timeout_kills_the_process() {
    let harness = TestHarness::with_tweaks(FakeTranscoder::NeverReady, |t| {
        t.readiness_timeout_secs = 1;
    });

    let start = std::time::Instant::now();
    let err = harness
        .registry
        .get_or_create("rtsp://bad-host/live", None)
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::ReadinessTimeout(_)));
    assert!(start.elapsed() < Duration::from_secs(4), "wait must be bounded");
    assert_eq!(harness.registry.active_count(), 0);

    // A non-producing process must not be left running.
    assert!(
        eventually(Duration::from_secs(10), || {
            harness.registry.live_process_count() == 0
        })
        .await,
        "timed-out transcoder was left running"
    );
}

#[tokio::test]
async fn early_exit_surfaces_as_unexpected_exit() {
    let harness = TestHarness::new(FakeTranscoder::ExitImmediately);
    let mut events = harness.registry.subscribe();

    let err = harness
        .registry
        .get_or_create("rtsp://cam1/live", None)
        .await
        .unwrap_err();

    match err {
        SessionError::UnexpectedExit { code } => assert_eq!(code, Some(1)),
        other => panic!("expected UnexpectedExit, got {other:?}"),
    }
    assert_eq!(harness.registry.active_count(), 0);

    // Subscribers hear about the failure out-of-band.
    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, StreamEvent::StreamFailed { .. }) {
            saw_failure = true;
        }
    }
    assert!(saw_failure, "failure event was not broadcast");
}

// ---------------------------------------------------------------------------
// Administrative stop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_all_clears_everything() {
    let harness = TestHarness::new(FakeTranscoder::Ready);
    harness
        .registry
        .get_or_create("rtsp://cam1/live", None)
        .await
        .unwrap();
    harness
        .registry
        .get_or_create("rtsp://cam2/live", None)
        .await
        .unwrap();
    assert_eq!(harness.registry.active_count(), 2);

    harness.registry.stop_all();
    assert_eq!(harness.registry.active_count(), 0);

    assert!(
        eventually(Duration::from_secs(10), || {
            harness.registry.live_process_count() == 0
        })
        .await,
        "stop_all left processes running"
    );
}

#[tokio::test]
async fn stop_all_unblocks_inflight_create() {
    let harness = TestHarness::with_tweaks(FakeTranscoder::NeverReady, |t| {
        t.readiness_timeout_secs = 30;
    });

    let registry = harness.registry.clone();
    let create = tokio::spawn(async move {
        registry.get_or_create("rtsp://cam1/live", None).await
    });

    // Let the create reach its readiness wait, then pull the rug.
    tokio::time::sleep(Duration::from_millis(200)).await;
    harness.registry.stop_all();

    let result = tokio::time::timeout(Duration::from_secs(2), create)
        .await
        .expect("stop_all did not unblock the in-flight create")
        .unwrap();
    assert!(matches!(
        result,
        Err(SessionError::UnexpectedExit { .. })
    ));
}

#[tokio::test]
async fn shutdown_waits_for_processes() {
    let harness = TestHarness::new(FakeTranscoder::Ready);
    harness
        .registry
        .get_or_create("rtsp://cam1/live", None)
        .await
        .unwrap();

    harness.registry.shutdown().await;
    assert_eq!(harness.registry.active_count(), 0);
    assert_eq!(harness.registry.live_process_count(), 0);
}
