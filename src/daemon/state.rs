//! Runtime status of supervised daemons
//!
//! Each supervisor owns one `DaemonStatus` behind a lock; the HTTP surface
//! only ever reads snapshots of it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

/// Lifecycle state of one daemon instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    /// Not evaluated yet
    #[default]
    Unknown,
    /// Binary absent at the expected path
    Missing,
    /// Liveness RPC answered
    Running,
    /// Liveness RPC failed
    Unresponsive,
    /// Resolving and installing a release
    Installing,
    /// Spawning the daemon
    Starting,
    /// Teardown in progress
    Stopping,
    /// Torn down
    Stopped,
}

impl DaemonState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonState::Unknown => "unknown",
            DaemonState::Missing => "missing",
            DaemonState::Running => "running",
            DaemonState::Unresponsive => "unresponsive",
            DaemonState::Installing => "installing",
            DaemonState::Starting => "starting",
            DaemonState::Stopping => "stopping",
            DaemonState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stages of an installation
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStage {
    #[default]
    Idle,
    /// Fetching the release feed
    FetchingRelease,
    /// Downloading the archive
    Downloading,
    /// Verifying SHA256 digest
    Verifying,
    /// Unpacking the archive
    Extracting,
    Complete,
    Failed,
}

/// Download progress information
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    /// Bytes downloaded so far (monotonic)
    pub downloaded: u64,
    /// Total bytes, 0 when the server does not say
    pub total: u64,
    /// Bytes per second
    pub speed: f64,
    pub stage: DownloadStage,
    pub file_name: String,
}

/// Current status of one coin (served by the HTTP surface)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatus {
    pub name: String,

    pub currency_code: String,

    pub state: DaemonState,

    /// State before the last change
    pub previous_state: DaemonState,

    /// Pinned daemon version
    pub version: String,

    /// PID of the daemon we launched, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Resolved binary path once known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<String>,

    pub installing: bool,

    /// Install/start failures since the last success
    pub consecutive_failures: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_progress: Option<DownloadProgress>,

    /// Seconds since epoch of the last state change
    pub since: u64,
}

impl DaemonStatus {
    pub fn new(name: &str, currency_code: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            currency_code: currency_code.to_string(),
            version: version.to_string(),
            since: unix_now(),
            ..Default::default()
        }
    }

    /// Move to `state`, stamping the transition time when it changes
    pub fn transition(&mut self, state: DaemonState) -> bool {
        if self.state == state {
            return false;
        }
        self.previous_state = std::mem::replace(&mut self.state, state);
        self.since = unix_now();
        true
    }
}

/// Type alias for a shared status record
pub type SharedDaemonStatus = Arc<RwLock<DaemonStatus>>;

pub fn create_daemon_status(name: &str, currency_code: &str, version: &str) -> SharedDaemonStatus {
    Arc::new(RwLock::new(DaemonStatus::new(name, currency_code, version)))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_reports_change() {
        let mut status = DaemonStatus::new("NAVCoin", "NAV", "4.7.0");
        assert_eq!(status.state, DaemonState::Unknown);

        assert!(status.transition(DaemonState::Unresponsive));
        assert!(!status.transition(DaemonState::Unresponsive));
        assert_eq!(status.state, DaemonState::Unresponsive);
        assert_eq!(status.previous_state, DaemonState::Unknown);

        status.transition(DaemonState::Missing);
        assert_eq!(status.previous_state, DaemonState::Unresponsive);
    }

    #[test]
    fn test_status_serialization() {
        let mut status = DaemonStatus::new("NAVCoin", "NAV", "4.7.0");
        status.transition(DaemonState::Running);
        status.pid = Some(4242);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["currencyCode"], "NAV");
        assert_eq!(json["pid"], 4242);
        assert!(json.get("lastError").is_none());
    }
}
