//! Error taxonomy for daemon supervision
//!
//! One enum per component. None of these are fatal to the gateway: the
//! supervisor recovers from all of them on the next heartbeat.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while resolving a release asset from a coin's release feed
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("release feed unreachable: {0}")]
    FeedUnreachable(String),

    #[error("release feed could not be parsed: {0}")]
    FeedParseError(String),

    #[error("no release tagged {version} in feed")]
    VersionNotFound { version: String },

    #[error("release {version} has no asset for platform {platform}")]
    NoMatchingAsset { version: String, platform: String },
}

/// Failures while downloading and unpacking a release asset
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("extraction failed: {0}")]
    ExtractFailed(String),

    #[error("unsupported archive kind: {0}")]
    UnsupportedArchiveKind(String),
}

/// Failures while locating, launching or terminating a daemon process
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("daemon binary not found at {}", .0.display())]
    BinaryNotFound(PathBuf),

    #[error("failed to prepare data directory {}: {source}", path.display())]
    DataDirError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {}: {source}", path.display())]
    SpawnFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stop daemon: {0}")]
    StopFailed(String),
}

/// Failures while talking to a local daemon over JSON-RPC
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Connection refused or timed out. The supervisor treats this as "daemon down".
    #[error("daemon unreachable: {0}")]
    Unreachable(String),

    #[error("transport error: {0}")]
    TransportError(String),
}

/// Obtaining a binary failed either at the feed or at the installer
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Install(#[from] InstallError),
}

/// Why one recovery attempt (stop, locate, install, start) did not bring a daemon up
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl RecoveryError {
    /// Launch failures that cannot be fixed by installing
    pub fn is_launch_failure(&self) -> bool {
        matches!(
            self,
            RecoveryError::Process(ProcessError::DataDirError { .. })
                | RecoveryError::Process(ProcessError::SpawnFailed { .. })
        )
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            GatewayError::Unreachable(e.to_string())
        } else {
            GatewayError::TransportError(e.to_string())
        }
    }
}
