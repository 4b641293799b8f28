//! Streaming file download
//!
//! Archives are written to disk chunk by chunk; nothing holds the whole body
//! in memory.

use super::error::InstallError;
use super::state::{DownloadProgress, DownloadStage};
use futures_util::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Minimum interval between progress callbacks
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Receives progress snapshots while a download runs
pub type ProgressFn<'a> = dyn Fn(&DownloadProgress) + Send + Sync + 'a;

/// Create HTTP client with appropriate headers
///
/// Release feeds on GitHub reject requests without a user agent.
pub fn create_client(timeout: Option<Duration>) -> Result<Client, reqwest::Error> {
    let mut builder =
        Client::builder().user_agent(concat!("coin-gateway/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

/// Download `url` to `dest`, reporting progress
///
/// Returns the number of bytes written. `dest` is truncated first.
pub async fn download_file(
    client: &Client,
    url: &str,
    dest: &Path,
    on_progress: &ProgressFn<'_>,
) -> Result<u64, InstallError> {
    log::info!("Downloading {} to {}", url, dest.display());

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            InstallError::DownloadFailed(format!("create {}: {}", parent.display(), e))
        })?;
    }

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| InstallError::DownloadFailed(e.to_string()))?;

    if !response.status().is_success() {
        return Err(InstallError::DownloadFailed(format!(
            "download returned status {}",
            response.status()
        )));
    }

    let mut progress = DownloadProgress {
        downloaded: 0,
        total: response.content_length().unwrap_or(0),
        speed: 0.0,
        stage: DownloadStage::Downloading,
        file_name: dest
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default(),
    };
    on_progress(&progress);

    let mut file = File::create(dest)
        .await
        .map_err(|e| InstallError::DownloadFailed(format!("create {}: {}", dest.display(), e)))?;

    let mut stream = response.bytes_stream();
    let start_time = Instant::now();
    let mut last_emit = Instant::now();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| InstallError::DownloadFailed(e.to_string()))?;

        file.write_all(&chunk)
            .await
            .map_err(|e| InstallError::DownloadFailed(format!("write: {}", e)))?;

        progress.downloaded += chunk.len() as u64;

        if last_emit.elapsed() >= PROGRESS_INTERVAL {
            let elapsed = start_time.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                progress.speed = progress.downloaded as f64 / elapsed;
            }
            on_progress(&progress);
            last_emit = Instant::now();
        }
    }

    file.flush()
        .await
        .map_err(|e| InstallError::DownloadFailed(format!("flush: {}", e)))?;

    on_progress(&progress);
    log::info!("Download complete: {} bytes", progress.downloaded);

    Ok(progress.downloaded)
}
