//! Release archive installation
//!
//! Download → verify → extract. The deadline covers download and verification
//! only; once extraction starts it always runs to completion before `install`
//! returns, so nothing writes into the library dir after the call ends. The
//! archive is staged under `<lib>/.downloads/` and removed afterwards.

use super::downloader::{create_client, download_file, ProgressFn};
use super::error::InstallError;
use super::extractor::{extract_archive, ArchiveKind};
use super::hasher::verify_file_hash;
use super::release::ReleaseAsset;
use super::state::{DownloadProgress, DownloadStage};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Subdirectory of the library dir holding in-flight downloads
pub const DOWNLOAD_DIR: &str = ".downloads";

/// Downloads and unpacks release assets
#[derive(Debug, Clone)]
pub struct ArchiveInstaller {
    client: Client,
    download_timeout: Duration,
}

impl ArchiveInstaller {
    pub fn new(download_timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: create_client(None)?,
            download_timeout,
        })
    }

    /// Install `asset` into `dest_lib_dir`
    ///
    /// Re-installing the same asset overwrites whatever is already there.
    pub async fn install(
        &self,
        asset: &ReleaseAsset,
        dest_lib_dir: &Path,
        on_progress: &ProgressFn<'_>,
    ) -> Result<(), InstallError> {
        let kind = ArchiveKind::from_file_name(&asset.name)
            .ok_or_else(|| InstallError::UnsupportedArchiveKind(asset.name.clone()))?;

        let staged = staging_path(dest_lib_dir, &asset.name);
        let progress = RunningProgress::new(&asset.name);

        let fetched = tokio::time::timeout(
            self.download_timeout,
            self.fetch(asset, &staged, &progress, on_progress),
        )
        .await
        .unwrap_or_else(|_| {
            Err(InstallError::DownloadFailed(format!(
                "download of {} exceeded {:?}",
                asset.name, self.download_timeout
            )))
        });

        let result = match fetched {
            Ok(()) => {
                progress.report(DownloadStage::Extracting, on_progress);
                extract_staged(&staged, kind, dest_lib_dir).await
            }
            Err(e) => Err(e),
        };

        if staged.exists() {
            if let Err(e) = tokio::fs::remove_file(&staged).await {
                log::warn!("Failed to remove {}: {}", staged.display(), e);
            }
        }

        match &result {
            Ok(()) => {
                progress.report(DownloadStage::Complete, on_progress);
                log::info!("Installed {} into {}", asset.name, dest_lib_dir.display());
            }
            Err(e) => {
                progress.report(DownloadStage::Failed, on_progress);
                log::error!("Install of {} failed: {}", asset.name, e);
            }
        }

        result
    }

    /// Download and verify; the part bounded by the deadline
    async fn fetch(
        &self,
        asset: &ReleaseAsset,
        staged: &Path,
        progress: &RunningProgress,
        on_progress: &ProgressFn<'_>,
    ) -> Result<(), InstallError> {
        let track = |p: &DownloadProgress| progress.merge(p, on_progress);
        download_file(&self.client, &asset.download_url, staged, &track).await?;

        if let Some(expected) = &asset.sha256 {
            progress.report(DownloadStage::Verifying, on_progress);
            let result = verify_file_hash(staged, expected).map_err(|e| {
                InstallError::DownloadFailed(format!("hash {}: {}", staged.display(), e))
            })?;
            if !result.matches {
                return Err(InstallError::ChecksumMismatch {
                    expected: result.expected,
                    computed: result.computed,
                });
            }
        } else {
            log::warn!("No digest published for {}, skipping verification", asset.name);
        }

        Ok(())
    }
}

/// Unpack on a blocking task and wait for it, however long it takes
async fn extract_staged(
    staged: &Path,
    kind: ArchiveKind,
    dest_lib_dir: &Path,
) -> Result<(), InstallError> {
    let archive = staged.to_path_buf();
    let dest = dest_lib_dir.to_path_buf();
    tokio::task::spawn_blocking(move || extract_archive(&archive, kind, &dest))
        .await
        .map_err(|e| InstallError::ExtractFailed(format!("extract task: {}", e)))??;
    Ok(())
}

/// Where an asset is staged while downloading
pub fn staging_path(dest_lib_dir: &Path, asset_name: &str) -> PathBuf {
    dest_lib_dir
        .join(DOWNLOAD_DIR)
        .join(format!("{}.part", asset_name))
}

/// One progress record per install; stages change, byte counts never go back
struct RunningProgress(Mutex<DownloadProgress>);

impl RunningProgress {
    fn new(file_name: &str) -> Self {
        Self(Mutex::new(DownloadProgress {
            file_name: file_name.to_string(),
            ..Default::default()
        }))
    }

    fn lock(&self) -> MutexGuard<'_, DownloadProgress> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fold a downloader snapshot in, keeping the asset name
    fn merge(&self, update: &DownloadProgress, on_progress: &ProgressFn<'_>) {
        let mut current = self.lock();
        current.downloaded = current.downloaded.max(update.downloaded);
        current.total = update.total;
        current.speed = update.speed;
        current.stage = update.stage.clone();
        on_progress(&current);
    }

    fn report(&self, stage: DownloadStage, on_progress: &ProgressFn<'_>) {
        let mut current = self.lock();
        current.stage = stage;
        on_progress(&current);
    }
}
