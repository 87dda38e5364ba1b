//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which creates a temp output root, a fake
//! transcoder executable, and a [`StreamRegistry`] wired to them. The
//! [`with_server`] constructor starts Axum on a random port for HTTP-level
//! testing.
//!
//! [`with_server`]: TestHarness::with_server

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tempfile::TempDir;

use camrelay::config::{Config, TranscoderConfig};
use camrelay::server::{create_router, AppContext};
use camrelay::session::StreamRegistry;

/// Behavior of the fake transcoder script standing in for ffmpeg.
#[derive(Debug, Clone, Copy)]
pub enum FakeTranscoder {
    /// Writes a playable manifest after ~100ms, then lingers.
    Ready,
    /// Runs but never produces a manifest.
    NeverReady,
    /// Exits with a failure code right away.
    ExitImmediately,
}

impl FakeTranscoder {
    fn script(&self) -> &'static str {
        match self {
            // The manifest path is the last ffmpeg argument.
            FakeTranscoder::Ready => {
                "#!/bin/sh\n\
                 for last in \"$@\"; do :; done\n\
                 sleep 0.1\n\
                 printf '#EXTM3U\\n#EXT-X-VERSION:3\\n#EXT-X-TARGETDURATION:2\\n#EXTINF:2.000000,\\nsegment000.ts\\n' > \"$last\"\n\
                 : > \"$(dirname \"$last\")/segment000.ts\"\n\
                 sleep 30\n"
            }
            FakeTranscoder::NeverReady => "#!/bin/sh\nsleep 30\n",
            FakeTranscoder::ExitImmediately => "#!/bin/sh\nexit 1\n",
        }
    }
}

pub struct TestHarness {
    pub config: Config,
    pub registry: StreamRegistry,
    _root: TempDir,
}

impl TestHarness {
    /// Harness with a well-behaved fake transcoder and test-friendly timings.
    pub fn new(fake: FakeTranscoder) -> Self {
        Self::with_tweaks(fake, |_| {})
    }

    /// Harness with custom transcoder settings on top of the test defaults.
    pub fn with_tweaks(fake: FakeTranscoder, tweak: impl FnOnce(&mut TranscoderConfig)) -> Self {
        let root = TempDir::new().expect("failed to create temp dir");

        let script_path = root.path().join("fake-ffmpeg");
        std::fs::write(&script_path, fake.script()).expect("failed to write fake transcoder");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755))
                .expect("failed to chmod fake transcoder");
        }

        let output_root = root.path().join("streams");
        std::fs::create_dir_all(&output_root).unwrap();

        let mut transcoder = TranscoderConfig {
            ffmpeg_path: script_path.to_string_lossy().to_string(),
            output_root,
            readiness_timeout_secs: 5,
            readiness_poll_ms: 25,
            drain_secs: 60,
            cleanup_grace_secs: 0,
            ..TranscoderConfig::default()
        };
        tweak(&mut transcoder);

        let config = Config {
            transcoder: transcoder.clone(),
            ..Config::default()
        };
        let registry = StreamRegistry::new(transcoder);

        Self {
            config,
            registry,
            _root: root,
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.config.transcoder.output_root
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server(fake: FakeTranscoder) -> (Self, SocketAddr) {
        Self::with_server_tweaks(fake, |_| {}).await
    }

    /// Start an Axum server with custom transcoder settings.
    pub async fn with_server_tweaks(
        fake: FakeTranscoder,
        tweak: impl FnOnce(&mut TranscoderConfig),
    ) -> (Self, SocketAddr) {
        let harness = Self::with_tweaks(fake, tweak);

        let ctx = AppContext {
            config: Arc::new(harness.config.clone()),
            registry: harness.registry.clone(),
            started_at: Instant::now(),
        };
        let app = create_router(ctx);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }
}
