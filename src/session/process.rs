//! Transcoder child process handle.
//!
//! Wraps a single ffmpeg invocation. The handle owns no business logic: it
//! spawns the process, forwards its stderr to the log, reports the one exit
//! event through a channel, and offers an idempotent [`terminate`].
//!
//! [`terminate`]: TranscoderProcess::terminate

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, trace, warn};

use crate::config::TranscoderConfig;

/// How long a terminated process gets to exit on SIGTERM before SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Handle to a running transcoder process.
///
/// Dropping the handle does not kill the process; callers must terminate
/// explicitly. Exit confirmation only ever arrives through the receiver
/// returned by [`TranscoderProcess::spawn`].
pub struct TranscoderProcess {
    pid: Option<u32>,
    kill: Arc<Notify>,
    terminated: Arc<AtomicBool>,
}

impl TranscoderProcess {
    /// Spawn a transcoder with the given arguments.
    ///
    /// Returns the handle plus a receiver that yields the process exit code
    /// exactly once (None when the process was killed by a signal). Fails
    /// only when the binary cannot be launched.
    pub fn spawn(
        program: &str,
        args: &[String],
    ) -> std::io::Result<(Self, oneshot::Receiver<Option<i32>>)> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let pid = child.id();
        debug!(pid = ?pid, program, "Spawned transcoder");

        // ffmpeg writes its progress to stderr; keep it at trace level.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    trace!(target: "camrelay::transcoder", "{}", line);
                }
            });
        }

        let kill = Arc::new(Notify::new());
        let (exit_tx, exit_rx) = oneshot::channel();

        let kill_signal = Arc::clone(&kill);
        tokio::spawn(async move {
            let code = tokio::select! {
                status = child.wait() => status.ok().and_then(|s| s.code()),
                _ = kill_signal.notified() => {
                    Self::request_exit(&mut child).await
                }
            };
            debug!(pid = ?pid, code = ?code, "Transcoder exited");
            let _ = exit_tx.send(code);
        });

        Ok((
            Self {
                pid,
                kill,
                terminated: Arc::new(AtomicBool::new(false)),
            },
            exit_rx,
        ))
    }

    /// Ask the process to exit gracefully, escalating to SIGKILL after
    /// [`KILL_GRACE`] if it ignores the request.
    async fn request_exit(child: &mut tokio::process::Child) -> Option<i32> {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!(pid, "SIGTERM failed (process may have exited): {}", e);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }

        tokio::select! {
            status = child.wait() => status.ok().and_then(|s| s.code()),
            _ = tokio::time::sleep(KILL_GRACE) => {
                warn!(pid = ?child.id(), "Transcoder ignored SIGTERM, killing");
                if let Err(e) = child.start_kill() {
                    debug!("Kill failed: {}", e);
                }
                child.wait().await.ok().and_then(|s| s.code())
            }
        }
    }

    /// OS process id, if the process had one at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Request graceful termination.
    ///
    /// Idempotent: repeat calls, or calls after the process already exited,
    /// are no-ops. The exit channel is the only confirmation of death.
    pub fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            debug!(pid = ?self.pid, "Terminating transcoder");
            self.kill.notify_one();
        }
    }
}

/// Build the ffmpeg argument list for one stream.
///
/// Mirrors a standard RTSP-to-HLS relay invocation: copy video, transcode
/// audio to AAC, rolling live playlist with segment deletion.
pub fn build_args(config: &TranscoderConfig, source_url: &str, output_dir: &Path) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    if source_url.starts_with("rtsp://") {
        args.extend(config.input_args.iter().cloned());
    }

    args.extend(["-i".to_string(), source_url.to_string()]);

    args.extend([
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "128k".to_string(),
        "-ac".to_string(),
        "2".to_string(),
    ]);

    args.extend([
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        config.hls_time.to_string(),
        "-hls_list_size".to_string(),
        config.hls_list_size.to_string(),
        "-hls_flags".to_string(),
        "delete_segments+append_list".to_string(),
        "-hls_segment_type".to_string(),
        "mpegts".to_string(),
        "-hls_segment_filename".to_string(),
        output_dir.join("segment%03d.ts").to_string_lossy().to_string(),
    ]);

    args.push(output_dir.join(super::MANIFEST_NAME).to_string_lossy().to_string());

    args
}
