mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./camrelay.toml",
        "~/.config/camrelay/config.toml",
        "/etc/camrelay/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.transcoder.readiness_poll_ms == 0 {
        anyhow::bail!("Readiness poll interval cannot be 0");
    }

    if config.transcoder.readiness_timeout() < config.transcoder.readiness_poll() {
        anyhow::bail!("Readiness timeout must be at least one poll interval");
    }

    if config.transcoder.hls_time == 0 {
        anyhow::bail!("HLS segment duration cannot be 0");
    }

    if config.janitor.interval_secs == 0 {
        anyhow::bail!("Janitor interval cannot be 0");
    }

    Ok(())
}
