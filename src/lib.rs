//! Coin gateway: supervises coin daemons and forwards JSON-RPC calls to them

pub mod api;
pub mod config;
pub mod daemon;
pub mod logging;

use crate::api::AppState;
use crate::config::AppConfig;
use crate::daemon::installer::ArchiveInstaller;
use crate::daemon::manager::ProcessController;
use crate::daemon::release::ReleaseResolver;
use crate::daemon::{CoinRegistry, HostPlatform, LocalBackend, RpcGateway};
use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Expand environment variables and ~ in paths
/// Windows: %VAR% style
/// Unix: ~ expands to HOME
pub fn expand_path(path: &str) -> String {
    let mut result = path.to_string();

    #[cfg(windows)]
    {
        // Expand %VAR% style environment variables on Windows
        while let Some(start) = result.find('%') {
            if let Some(end) = result[start + 1..].find('%') {
                let var_name = &result[start + 1..start + 1 + end];
                if let Ok(value) = std::env::var(var_name) {
                    result = format!("{}{}{}", &result[..start], value, &result[start + 2 + end..]);
                } else {
                    break;
                }
            } else {
                break;
            }
        }
    }

    #[cfg(not(windows))]
    {
        // Expand ~ to HOME directory on Unix
        if result.starts_with("~/") {
            if let Some(home) = dirs::home_dir() {
                result = format!("{}{}", home.display(), &result[1..]);
            }
        } else if result == "~" {
            if let Some(home) = dirs::home_dir() {
                result = home.to_string_lossy().to_string();
            }
        }
    }

    result
}

/// Supervise every configured coin and serve the HTTP API until Ctrl-C
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let layout = config.layout();
    let platform = HostPlatform::current();
    log::info!(
        "App root {}, platform token {}",
        layout.root().display(),
        platform.token
    );

    let addr = format!(
        "{}:{}",
        config.server.bind_address, config.server.manager_api_port
    );
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let backend = LocalBackend::new(
        ReleaseResolver::new(platform.clone())?,
        ArchiveInstaller::new(config.supervisor.download_timeout())?,
        ProcessController::new(layout, platform),
        RpcGateway::new(config.supervisor.rpc_timeout())?,
    );

    let registry = Arc::new(CoinRegistry::new(
        config.coins.clone(),
        Arc::new(backend),
        config.supervisor.options(),
    ));
    registry.spawn_all().await;

    let state = Arc::new(AppState {
        registry: Arc::clone(&registry),
        activity: logging::activity_log(),
    });

    let served = api::serve(listener, state, shutdown_signal()).await;

    log::info!("Shutting down");
    registry
        .shutdown(config.supervisor.stop_daemons_on_exit)
        .await;

    served.context("HTTP server failed")
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("Received Ctrl-C"),
        Err(e) => log::error!("Failed to listen for Ctrl-C: {}", e),
    }
}
