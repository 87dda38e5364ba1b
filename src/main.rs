mod cli;

use camrelay::{config, janitor, server, session::StreamRegistry};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // CLI flags override the config file
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting camrelay");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    std::fs::create_dir_all(&config.transcoder.output_root)?;

    let registry = StreamRegistry::new(config.transcoder.clone());

    // Backstop against output orphaned by crashes that skipped teardown.
    let janitor_handle = janitor::start(
        config.janitor.clone(),
        config.transcoder.output_root.clone(),
    );

    let server_result = server::start_server(config, registry).await;

    tracing::info!("Shutting down...");
    janitor_handle.abort();

    server_result
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "camrelay=trace,tower_http=debug".to_string()
        } else {
            "camrelay=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::CheckTools => check_tools(),
        Commands::Version => {
            println!("camrelay {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Transcoder: {}", config.transcoder.ffmpeg_path);
            println!("  Output root: {:?}", config.transcoder.output_root);
            println!(
                "  Readiness: {}s timeout, {}ms poll",
                config.transcoder.readiness_timeout_secs, config.transcoder.readiness_poll_ms
            );
            println!("  Drain: {}s", config.transcoder.drain_secs);
            println!(
                "  Janitor: every {}s, retention {}s",
                config.janitor.interval_secs, config.janitor.retention_secs
            );
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Transcoder: {}", config.transcoder.ffmpeg_path);
        }
    }

    Ok(())
}

fn check_tools() -> Result<()> {
    let config = config::load_config_or_default(None)?;

    match which::which(&config.transcoder.ffmpeg_path) {
        Ok(path) => {
            println!("✓ ffmpeg - {}", path.display());
            Ok(())
        }
        Err(_) => {
            println!("✗ ffmpeg not found ({})", config.transcoder.ffmpeg_path);
            anyhow::bail!(
                "Transcoder binary is missing; install ffmpeg or set transcoder.ffmpeg_path"
            );
        }
    }
}
