//! Application configuration
//!
//! Loaded once at startup from `app-config.json`. The file lists the coins to
//! supervise plus server and supervisor tuning.

use crate::daemon::config::{AppLayout, CoinProfile};
use crate::daemon::supervisor::SupervisorOptions;
use crate::expand_path;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "app-config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no coins configured")]
    NoCoins,

    #[error("currency code {0} is configured more than once")]
    DuplicateCoin(String),

    #[error("coin {coin}: {reason}")]
    InvalidCoin { coin: String, reason: String },
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub manager_api_port: u16,
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            manager_api_port: 9090,
            bind_address: "127.0.0.1".to_string(),
        }
    }
}

/// Supervisor tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisorConfig {
    /// Heartbeat floor in milliseconds
    pub min_heartbeat_ms: u64,
    /// Backoff cap in seconds, 0 disables backoff
    pub max_backoff_secs: u64,
    pub rpc_timeout_secs: u64,
    /// Upper bound for a whole install (download, verify, extract)
    pub download_timeout_secs: u64,
    /// Stop supervised daemons when the gateway exits
    pub stop_daemons_on_exit: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            min_heartbeat_ms: 1000,
            max_backoff_secs: 300,
            rpc_timeout_secs: 10,
            download_timeout_secs: 30 * 60,
            stop_daemons_on_exit: true,
        }
    }
}

impl SupervisorConfig {
    pub fn options(&self) -> SupervisorOptions {
        SupervisorOptions {
            min_heartbeat: Duration::from_millis(self.min_heartbeat_ms),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Root of `app-config.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Directory holding `lib/` and coin data dirs; `~` is expanded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_root: Option<String>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Coins to supervise
    #[serde(rename = "coinData")]
    pub coins: Vec<CoinProfile>,
}

impl AppConfig {
    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("coin-gateway")
            .join(CONFIG_FILE_NAME)
    }

    /// Read and validate the file at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: AppConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        config.validate()?;
        log::info!("Loaded {} coin(s) from {}", config.coins.len(), path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coins.is_empty() {
            return Err(ConfigError::NoCoins);
        }

        let mut seen = HashSet::new();
        for coin in &self.coins {
            if !seen.insert(coin.key()) {
                return Err(ConfigError::DuplicateCoin(coin.currency_code.clone()));
            }
            validate_coin(coin)?;
        }

        Ok(())
    }

    /// Filesystem layout rooted at `appRoot`
    pub fn layout(&self) -> AppLayout {
        match &self.app_root {
            Some(root) if !root.trim().is_empty() => AppLayout::new(expand_path(root)),
            _ => AppLayout::new(AppLayout::default_root()),
        }
    }
}

fn validate_coin(coin: &CoinProfile) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidCoin {
        coin: coin.currency_code.clone(),
        reason: reason.to_string(),
    };

    if coin.currency_code.trim().is_empty() {
        return Err(invalid("currencyCode is empty"));
    }
    if coin.daemon_version.trim().is_empty() {
        return Err(invalid("daemonVersion is empty"));
    }
    if coin.lib_path.trim().is_empty() {
        return Err(invalid("libPath is empty"));
    }
    if coin.live_port == 0 || coin.test_net_port == 0 {
        return Err(invalid("livePort and testnetPort must be non-zero"));
    }

    match url::Url::parse(&coin.release_feed_url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Ok(()),
        Ok(url) => Err(invalid(&format!(
            "releaseApi scheme {} is not http(s)",
            url.scheme()
        ))),
        Err(e) => Err(invalid(&format!("releaseApi is not a valid URL: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::config::test_profile;

    const SAMPLE: &str = r#"{
        "appRoot": "/srv/gateway",
        "server": { "managerApiPort": 9191 },
        "coinData": [
            {
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
                "useTestNet": false,
                "indexTransactions": true
            }
        ]
    }"#;

    fn config(coins: Vec<CoinProfile>) -> AppConfig {
        AppConfig {
            app_root: None,
            server: ServerConfig::default(),
            supervisor: SupervisorConfig::default(),
            coins,
        }
    }

    #[test]
    fn test_load_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, SAMPLE).unwrap();

        let config = AppConfig::load(&path).unwrap();

        assert_eq!(config.server.manager_api_port, 9191);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.supervisor.min_heartbeat_ms, 1000);
        assert!(config.supervisor.stop_daemons_on_exit);
        assert_eq!(config.coins[0].currency_code, "NAV");
        assert_eq!(config.layout().root(), Path::new("/srv/gateway"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "{ \"coinData\": [ { \"name\": 1 } ] }").unwrap();

        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validation_rejects_bad_coins() {
        assert!(matches!(config(vec![]).validate(), Err(ConfigError::NoCoins)));

        let mut lower = test_profile("nav");
        lower.name = "duplicate".to_string();
        assert!(matches!(
            config(vec![test_profile("NAV"), lower]).validate(),
            Err(ConfigError::DuplicateCoin(_))
        ));

        let mut no_port = test_profile("NAV");
        no_port.test_net_port = 0;
        assert!(matches!(
            config(vec![no_port]).validate(),
            Err(ConfigError::InvalidCoin { .. })
        ));

        let mut bad_url = test_profile("NAV");
        bad_url.release_feed_url = "ftp://example.org/releases".to_string();
        let err = config(vec![bad_url]).validate().unwrap_err();
        assert!(err.to_string().contains("not http(s)"));

        let mut no_version = test_profile("NAV");
        no_version.daemon_version = " ".to_string();
        assert!(config(vec![no_version]).validate().is_err());

        assert!(config(vec![test_profile("NAV"), test_profile("PIVX")])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_supervisor_options() {
        let supervisor = SupervisorConfig {
            min_heartbeat_ms: 2500,
            max_backoff_secs: 0,
            ..Default::default()
        };
        let options = supervisor.options();
        assert_eq!(options.min_heartbeat, Duration::from_millis(2500));
        assert!(options.max_backoff.is_zero());
    }
}
