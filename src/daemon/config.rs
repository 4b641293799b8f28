//! Coin profiles and on-disk layout
//!
//! A `CoinProfile` is the static description of one supervised daemon. It is
//! loaded once from the app config and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Operating system family, used to pick the executable name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformOs {
    Windows,
    Macos,
    Linux,
    Unknown,
}

/// Host information derived once per process
///
/// `token` is the fragment release assets carry in their file names
/// (e.g. `navcoin-4.7.0-osx64.tar.gz`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPlatform {
    pub os: PlatformOs,
    pub token: &'static str,
}

impl HostPlatform {
    /// Platform of the running binary
    pub fn current() -> Self {
        let os = if cfg!(target_os = "windows") {
            PlatformOs::Windows
        } else if cfg!(target_os = "macos") {
            PlatformOs::Macos
        } else if cfg!(target_os = "linux") {
            PlatformOs::Linux
        } else {
            PlatformOs::Unknown
        };

        Self {
            os,
            token: platform_archive_token(),
        }
    }

    pub fn new(os: PlatformOs, token: &'static str) -> Self {
        Self { os, token }
    }
}

/// Get the platform-specific asset name token
/// These match the names daemon projects publish on their release pages
fn platform_archive_token() -> &'static str {
    #[cfg(all(target_os = "windows", target_arch = "x86_64"))]
    {
        "win64"
    }

    #[cfg(all(target_os = "windows", target_arch = "x86"))]
    {
        "win32"
    }

    #[cfg(all(target_os = "macos", target_arch = "x86_64"))]
    {
        "osx64"
    }

    #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
    {
        "arm64-apple-darwin"
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    {
        "x86_64-linux-gnu"
    }

    #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
    {
        "aarch64-linux-gnu"
    }

    #[cfg(all(target_os = "linux", target_arch = "arm"))]
    {
        "arm-linux-gnueabihf"
    }

    #[cfg(all(target_os = "linux", target_arch = "x86"))]
    {
        "i686-pc-linux-gnu"
    }

    #[cfg(not(any(
        all(target_os = "windows", target_arch = "x86_64"),
        all(target_os = "windows", target_arch = "x86"),
        all(target_os = "macos", target_arch = "x86_64"),
        all(target_os = "macos", target_arch = "aarch64"),
        all(target_os = "linux", target_arch = "x86_64"),
        all(target_os = "linux", target_arch = "aarch64"),
        all(target_os = "linux", target_arch = "arm"),
        all(target_os = "linux", target_arch = "x86"),
    )))]
    {
        "unknown"
    }
}

/// Daemon executable file name per OS family
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutableNames {
    pub windows: String,
    pub macos: String,
    pub linux: String,
}

impl ExecutableNames {
    pub fn for_os(&self, os: PlatformOs) -> &str {
        match os {
            PlatformOs::Windows => &self.windows,
            PlatformOs::Macos => &self.macos,
            PlatformOs::Linux | PlatformOs::Unknown => &self.linux,
        }
    }
}

/// Static configuration for one supervised coin daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinProfile {
    /// Display name (e.g. "NAVCoin")
    pub name: String,

    /// Currency code, also the routing key (e.g. "NAV")
    pub currency_code: String,

    /// Library subdirectory prefix; binaries live in `lib/<libPath>-<version>`
    pub lib_path: String,

    /// Data directory relative to the app root
    pub data_dir: String,

    /// Requested heartbeat interval in milliseconds
    #[serde(default)]
    pub daemon_heartbeat: u64,

    /// Release tag the daemon is pinned to
    pub daemon_version: String,

    /// Executable names per OS
    pub executables: ExecutableNames,

    /// Release feed URL (JSON array of releases)
    #[serde(rename = "releaseApi")]
    pub release_feed_url: String,

    /// RPC port on mainnet
    pub live_port: u16,

    /// RPC port on testnet
    #[serde(rename = "testnetPort")]
    pub test_net_port: u16,

    #[serde(default)]
    pub use_test_net: bool,

    /// Launch with -addressindex=1
    #[serde(default)]
    pub index_transactions: bool,

    /// Fixed RPC username (random when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_user: Option<String>,

    /// Fixed RPC password (random when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_password: Option<String>,
}

impl CoinProfile {
    /// Port the daemon listens on for the configured network mode
    pub fn rpc_port(&self) -> u16 {
        if self.use_test_net {
            self.test_net_port
        } else {
            self.live_port
        }
    }

    /// Registry key for this coin
    pub fn key(&self) -> String {
        self.currency_code.to_lowercase()
    }

    /// Directory name the release archive unpacks into
    pub fn install_dir_name(&self) -> String {
        format!("{}-{}", self.lib_path, self.daemon_version)
    }
}

/// Filesystem layout rooted at the application directory
///
/// ```text
/// <appRoot>/lib/<libPath>-<version>/bin/<executable>
/// <appRoot>/lib/.downloads/
/// <appRoot>/<dataDir>/
/// ```
#[derive(Debug, Clone)]
pub struct AppLayout {
    root: PathBuf,
}

impl AppLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default app root when the config does not name one
    pub fn default_root() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("coin-gateway")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory all release archives are extracted into
    pub fn lib_dir(&self) -> PathBuf {
        self.root.join("lib")
    }

    /// Expected location of the daemon executable
    pub fn binary_path(&self, profile: &CoinProfile, platform: &HostPlatform) -> PathBuf {
        self.lib_dir()
            .join(profile.install_dir_name())
            .join("bin")
            .join(profile.executables.for_os(platform.os))
    }

    /// Data directory handed to the daemon via -datadir
    pub fn data_dir(&self, profile: &CoinProfile) -> PathBuf {
        self.root.join(profile.data_dir.trim_start_matches(['/', '\\']))
    }
}

#[cfg(test)]
pub(crate) fn test_profile(code: &str) -> CoinProfile {
    CoinProfile {
        name: format!("{} Coin", code),
        currency_code: code.to_string(),
        lib_path: "coind".to_string(),
        data_dir: format!("data/{}", code.to_lowercase()),
        daemon_heartbeat: 1000,
        daemon_version: "5.2.0".to_string(),
        executables: ExecutableNames {
            windows: "coind.exe".to_string(),
            macos: "coind".to_string(),
            linux: "coind".to_string(),
        },
        release_feed_url: "http://127.0.0.1:1/releases".to_string(),
        live_port: 44444,
        test_net_port: 44445,
        use_test_net: false,
        index_transactions: true,
        rpc_user: None,
        rpc_password: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_port_follows_network_mode() {
        let mut profile = test_profile("NAV");
        assert_eq!(profile.rpc_port(), 44444);

        profile.use_test_net = true;
        assert_eq!(profile.rpc_port(), 44445);
    }

    #[test]
    fn test_binary_path_layout() {
        let layout = AppLayout::new("/srv/gateway");
        let profile = test_profile("NAV");
        let platform = HostPlatform::new(PlatformOs::Windows, "win64");

        assert_eq!(
            layout.binary_path(&profile, &platform),
            PathBuf::from("/srv/gateway/lib/coind-5.2.0/bin/coind.exe")
        );
    }

    #[test]
    fn test_data_dir_is_under_root() {
        let layout = AppLayout::new("/srv/gateway");
        let mut profile = test_profile("NAV");
        profile.data_dir = "/data/nav".to_string();

        assert_eq!(layout.data_dir(&profile), PathBuf::from("/srv/gateway/data/nav"));
    }

    #[test]
    fn test_profile_deserializes_feed_keys() {
        let json = r#"{
            "name": "NAVCoin",
            "currencyCode": "NAV",
            "libPath": "navcoin",
            "dataDir": "data/nav",
            "daemonHeartbeat": 5000,
            "daemonVersion": "4.7.0",
            "executables": { "windows": "navcoind.exe", "macos": "navcoind", "linux": "navcoind" },
            "releaseApi": "https://api.github.com/repos/navcoin/navcoin-core/releases",
            "livePort": 44444,
            "testnetPort": 44445,
            "useTestNet": true
        }"#;

        let profile: CoinProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.key(), "nav");
        assert_eq!(profile.rpc_port(), 44445);
        assert!(!profile.index_transactions);
        assert_eq!(profile.install_dir_name(), "navcoin-4.7.0");
    }
}
