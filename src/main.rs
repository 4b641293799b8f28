use anyhow::Context;
use clap::Parser;
use coin_gateway_lib::config::AppConfig;
use log::LevelFilter;
use std::path::PathBuf;

/// Supervises coin daemons and serves a JSON-RPC gateway in front of them
#[derive(Parser, Debug)]
#[command(name = "coin-gateway", version, about)]
struct Args {
    /// Path to app-config.json
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log directory (default: <appRoot>/logs)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_level: LevelFilter = args
        .log_level
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid log level: {}", args.log_level))?;

    let config_path = args.config.unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let log_dir = args
        .log_dir
        .unwrap_or_else(|| config.layout().root().join("logs"));
    let _logger = coin_gateway_lib::logging::init_logger(&log_dir, log_level)
        .context("failed to initialize logging")?;

    log::info!(
        "coin-gateway v{} starting (PID {}, {} {})",
        env!("CARGO_PKG_VERSION"),
        std::process::id(),
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    log::info!("Config: {}", config_path.display());

    coin_gateway_lib::run(config).await
}
