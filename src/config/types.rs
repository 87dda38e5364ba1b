use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub transcoder: TranscoderConfig,

    #[serde(default)]
    pub janitor: JanitorConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory of static frontend assets, served as a fallback.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: None,
        }
    }
}

/// Settings for the external transcoder and the per-stream session lifecycle.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscoderConfig {
    /// Path to the ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Root directory for per-stream HLS output.
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Extra input options passed before `-i` (default: RTSP over TCP).
    #[serde(default = "default_input_args")]
    pub input_args: Vec<String>,

    /// HLS segment duration in seconds.
    #[serde(default = "default_hls_time")]
    pub hls_time: u32,

    /// Number of segments kept in the live playlist.
    #[serde(default = "default_hls_list_size")]
    pub hls_list_size: u32,

    /// How long a new stream may take to produce playable output.
    #[serde(default = "default_readiness_timeout")]
    pub readiness_timeout_secs: u64,

    /// Interval between manifest checks while waiting for readiness.
    #[serde(default = "default_readiness_poll")]
    pub readiness_poll_ms: u64,

    /// Grace period after the last viewer leaves before the stream stops.
    #[serde(default = "default_drain")]
    pub drain_secs: u64,

    /// Delay between stopping a stream and deleting its output directory,
    /// so in-flight segment reads can complete.
    #[serde(default = "default_cleanup_grace")]
    pub cleanup_grace_secs: u64,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}
fn default_output_root() -> PathBuf {
    PathBuf::from("./streams")
}
fn default_input_args() -> Vec<String> {
    vec!["-rtsp_transport".to_string(), "tcp".to_string()]
}
fn default_hls_time() -> u32 {
    2
}
fn default_hls_list_size() -> u32 {
    10
}
fn default_readiness_timeout() -> u64 {
    15
}
fn default_readiness_poll() -> u64 {
    500
}
fn default_drain() -> u64 {
    60
}
fn default_cleanup_grace() -> u64 {
    5
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            output_root: default_output_root(),
            input_args: default_input_args(),
            hls_time: default_hls_time(),
            hls_list_size: default_hls_list_size(),
            readiness_timeout_secs: default_readiness_timeout(),
            readiness_poll_ms: default_readiness_poll(),
            drain_secs: default_drain(),
            cleanup_grace_secs: default_cleanup_grace(),
        }
    }
}

impl TranscoderConfig {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn readiness_poll(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_ms)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_secs(self.cleanup_grace_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JanitorConfig {
    /// Interval between sweeps of the output root.
    #[serde(default = "default_janitor_interval")]
    pub interval_secs: u64,

    /// Files older than this are deleted by the janitor.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

fn default_janitor_interval() -> u64 {
    1800
}
fn default_retention() -> u64 {
    3600
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_janitor_interval(),
            retention_secs: default_retention(),
        }
    }
}
