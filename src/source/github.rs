use std::path::Path;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::filename::parse_artifact_filename;
use super::{AvailableVersion, ValidationResult};
use crate::download::{download_file, DownloadCallback};
use crate::error::{AppError, Result};

const GITHUB_API_BASE: &str = "https://api.github.com";

/// Channel assigned to stable-looking assets of a release flagged `prerelease`.
const PRERELEASE_CHANNEL: &str = "beta";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub assets: Vec<GitHubAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubAsset {
    pub name: String,
    pub browser_download_url: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct GitHubReleaseSource {
    client: Client,
    owner: String,
    repo: String,
    token: Option<String>,
    api_base: String,
}

impl GitHubReleaseSource {
    pub fn new(client: Client, owner: &str, repo: &str, token: Option<&str>) -> Self {
        Self {
            client,
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: token.filter(|t| !t.is_empty()).map(str::to_string),
            api_base: GITHUB_API_BASE.to_string(),
        }
    }

    /// Point API calls at another host, e.g. a GitHub Enterprise instance.
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Build the releases listing URL.
    pub fn releases_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases?per_page=30",
            self.api_base, self.owner, self.repo
        )
    }

    pub async fn fetch_releases(&self) -> Result<Vec<GitHubRelease>> {
        let url = self.releases_url();
        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github.v3+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| AppError::github(format!("Failed to fetch releases: {}", e)))?;

        if !resp.status().is_success() {
            return Err(AppError::github(format!(
                "GitHub API returned status: {}",
                resp.status()
            ))
            .with_context("url", url));
        }

        resp.json::<Vec<GitHubRelease>>()
            .await
            .map_err(|e| AppError::github(format!("Failed to parse releases: {}", e)))
    }

    pub async fn list_available_versions(&self) -> Result<Vec<AvailableVersion>> {
        let releases = self.fetch_releases().await?;
        Ok(map_releases(&releases))
    }

    pub async fn download_package(
        &self,
        version: &AvailableVersion,
        dest: &Path,
        on_progress: DownloadCallback<'_>,
    ) -> Result<()> {
        let url = version
            .download_url
            .as_deref()
            .ok_or_else(|| AppError::version_not_available(&version.id))?;
        download_file(&self.client, url, dest, self.token.as_deref(), on_progress).await
    }

    pub fn validate_config(&self) -> ValidationResult {
        if self.owner.is_empty() || self.repo.is_empty() {
            return ValidationResult::invalid("owner and repo are required");
        }
        ValidationResult::ok()
    }
}

/// Flatten release assets into available versions. Drafts and unparseable assets are skipped.
pub fn map_releases(releases: &[GitHubRelease]) -> Vec<AvailableVersion> {
    releases
        .iter()
        .filter(|release| !release.draft)
        .flat_map(|release| {
            let released_at = release
                .published_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc));
            release.assets.iter().filter_map(move |asset| {
                let parsed = parse_artifact_filename(&asset.name)?;
                let mut version = AvailableVersion::from_parsed(&parsed, &asset.name);
                version.released_at = released_at;
                version.size_bytes = Some(asset.size);
                version.download_url = Some(asset.browser_download_url.clone());
                if release.prerelease && version.channel == super::filename::DEFAULT_CHANNEL {
                    version.channel = PRERELEASE_CHANNEL.to_string();
                }
                Some(version)
            })
        })
        .collect()
}
