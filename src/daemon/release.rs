//! Release feed resolution
//!
//! Fetches a coin's release feed (GitHub releases API shape) and picks the
//! asset for the pinned version and the host platform.

use super::config::{CoinProfile, HostPlatform, PlatformOs};
use super::downloader::create_client;
use super::error::ResolveError;
use super::extractor::ArchiveKind;
use super::hasher::sha256_from_digest;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// A downloadable asset picked from a release feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseAsset {
    /// File name
    pub name: String,
    /// Platform token the name matched
    pub platform: String,
    /// Download URL
    pub download_url: String,
    /// SHA256 from the feed digest, when published
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Release entry as published in the feed; unknown fields are ignored
#[derive(Debug, Deserialize)]
pub struct FeedRelease {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<FeedAsset>,
}

#[derive(Debug, Deserialize)]
pub struct FeedAsset {
    pub name: String,
    pub browser_download_url: String,
    /// Digest in format "sha256:hash"
    #[serde(default)]
    pub digest: Option<String>,
}

/// Resolves a profile's pinned version to a concrete asset
#[derive(Debug, Clone)]
pub struct ReleaseResolver {
    client: Client,
    platform: HostPlatform,
}

impl ReleaseResolver {
    pub fn new(platform: HostPlatform) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: create_client(None)?,
            platform,
        })
    }

    /// Fetch the feed and select the asset for `profile.daemon_version`
    pub async fn resolve(&self, profile: &CoinProfile) -> Result<ReleaseAsset, ResolveError> {
        log::info!(
            "Resolving {} v{} from {}",
            profile.name,
            profile.daemon_version,
            profile.release_feed_url
        );

        let releases = self.fetch_feed(&profile.release_feed_url).await?;
        let asset = select_release_asset(&releases, &profile.daemon_version, &self.platform)?;

        log::info!(
            "Selected {} for {} v{}",
            asset.name,
            profile.name,
            profile.daemon_version
        );
        Ok(asset)
    }

    async fn fetch_feed(&self, url: &str) -> Result<Vec<FeedRelease>, ResolveError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResolveError::FeedUnreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ResolveError::FeedUnreachable(format!(
                "feed returned status {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ResolveError::FeedUnreachable(e.to_string()))?;

        serde_json::from_str(&body).map_err(|e| ResolveError::FeedParseError(e.to_string()))
    }
}

/// Pick the asset for `version` on `platform`
///
/// The release tag must equal `version` exactly. Within it, the first asset
/// (in feed order) whose name contains the platform token and carries an
/// acceptable archive extension wins: `.zip` on Windows, any extension the
/// installer can unpack elsewhere.
pub fn select_release_asset(
    releases: &[FeedRelease],
    version: &str,
    platform: &HostPlatform,
) -> Result<ReleaseAsset, ResolveError> {
    let release = releases
        .iter()
        .find(|r| r.tag_name == version)
        .ok_or_else(|| ResolveError::VersionNotFound {
            version: version.to_string(),
        })?;

    release
        .assets
        .iter()
        .find(|a| a.name.contains(platform.token) && accepts_extension(&a.name, platform.os))
        .map(|a| ReleaseAsset {
            name: a.name.clone(),
            platform: platform.token.to_string(),
            download_url: a.browser_download_url.clone(),
            sha256: a.digest.as_deref().and_then(sha256_from_digest),
        })
        .ok_or_else(|| ResolveError::NoMatchingAsset {
            version: version.to_string(),
            platform: platform.token.to_string(),
        })
}

fn accepts_extension(name: &str, os: PlatformOs) -> bool {
    match os {
        PlatformOs::Windows => ArchiveKind::from_file_name(name) == Some(ArchiveKind::Zip),
        _ => ArchiveKind::from_file_name(name).is_some(),
    }
}
