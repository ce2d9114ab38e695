//! Package sources: where release artifacts are discovered and fetched from.

mod config;
mod filename;
mod github;
mod http_index;
mod local;
mod store;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::deps::parse_lenient_version;
use crate::download::DownloadCallback;
use crate::error::Result;
use crate::platform::{host_arch_token, Platform};

pub use config::{PackageSourceConfig, SourceKind};
pub use filename::{parse_artifact_filename, strategies, FilenameStrategy, ParsedArtifact};
pub use github::{GitHubAsset, GitHubRelease, GitHubReleaseSource};
pub use http_index::{HttpIndexSource, IndexDocument};
pub use local::LocalFolderSource;
pub use store::SourceStore;

/// A fetchable release offered by a package source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableVersion {
    pub id: String,
    pub version: String,
    pub platform: Platform,
    pub artifact_filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

impl AvailableVersion {
    pub(crate) fn from_parsed(parsed: &ParsedArtifact, artifact_filename: &str) -> Self {
        Self {
            id: parsed.id(),
            version: parsed.version.clone(),
            platform: parsed.platform,
            artifact_filename: artifact_filename.to_string(),
            released_at: None,
            size_bytes: None,
            download_url: None,
            channel: parsed.channel.clone(),
            arch: parsed.arch.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
        }
    }
}

/// A package source resolved from its config.
#[derive(Debug, Clone)]
pub enum PackageSource {
    LocalFolder(LocalFolderSource),
    GitHubRelease(GitHubReleaseSource),
    HttpIndex(HttpIndexSource),
}

impl PackageSource {
    pub fn from_config(config: &PackageSourceConfig, client: &Client) -> Self {
        match &config.kind {
            SourceKind::LocalFolder { path } => Self::LocalFolder(LocalFolderSource::new(path)),
            SourceKind::GithubRelease { owner, repo, token } => Self::GitHubRelease(
                GitHubReleaseSource::new(client.clone(), owner, repo, token.as_deref()),
            ),
            SourceKind::HttpIndex {
                index_url,
                base_url,
                auth_token,
            } => Self::HttpIndex(HttpIndexSource::new(
                client.clone(),
                index_url,
                base_url.as_deref(),
                auth_token.as_deref(),
            )),
        }
    }

    /// Every recognizable artifact, deduplicated by id and sorted newest first.
    pub async fn list_available_versions(&self) -> Result<Vec<AvailableVersion>> {
        let versions = match self {
            Self::LocalFolder(source) => source.list_available_versions().await?,
            Self::GitHubRelease(source) => source.list_available_versions().await?,
            Self::HttpIndex(source) => source.list_available_versions().await?,
        };
        let mut versions = dedupe_by_id(versions, host_arch_token());
        sort_newest_first(&mut versions);
        Ok(versions)
    }

    pub async fn download_package(
        &self,
        version: &AvailableVersion,
        dest: &Path,
        on_progress: DownloadCallback<'_>,
    ) -> Result<()> {
        log::info!(
            "Fetching {} ({}) into {}",
            version.id,
            version.artifact_filename,
            dest.display()
        );
        match self {
            Self::LocalFolder(source) => source.download_package(version, dest, on_progress).await,
            Self::GitHubRelease(source) => {
                source.download_package(version, dest, on_progress).await
            }
            Self::HttpIndex(source) => source.download_package(version, dest, on_progress).await,
        }
    }

    pub fn validate_config(&self) -> ValidationResult {
        match self {
            Self::LocalFolder(source) => source.validate_config(),
            Self::GitHubRelease(source) => source.validate_config(),
            Self::HttpIndex(source) => source.validate_config(),
        }
    }
}

/// Keep one artifact per id, preferring the one built for `host_arch`.
fn dedupe_by_id(versions: Vec<AvailableVersion>, host_arch: Option<&str>) -> Vec<AvailableVersion> {
    let rank = |v: &AvailableVersion| match (v.arch.as_deref(), host_arch) {
        (Some(arch), Some(host)) if arch == host => 0,
        (None, _) => 1,
        _ => 2,
    };

    let mut order = Vec::new();
    let mut best: HashMap<String, AvailableVersion> = HashMap::new();
    for version in versions {
        match best.get(&version.id) {
            Some(existing) if rank(existing) <= rank(&version) => {}
            Some(_) => {
                best.insert(version.id.clone(), version);
            }
            None => {
                order.push(version.id.clone());
                best.insert(version.id.clone(), version);
            }
        }
    }
    order
        .into_iter()
        .filter_map(|id| best.remove(&id))
        .collect()
}

fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_lenient_version(a), parse_lenient_version(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

/// Sort by semantic version, newest first; ties broken by id.
pub fn sort_newest_first(versions: &mut [AvailableVersion]) {
    versions.sort_by(|a, b| compare_versions(&b.version, &a.version).then_with(|| a.id.cmp(&b.id)));
}

/// Versions published for `platform`.
pub fn filter_for_platform(versions: &[AvailableVersion], platform: Platform) -> Vec<AvailableVersion> {
    versions
        .iter()
        .filter(|v| v.platform == platform)
        .cloned()
        .collect()
}

/// Versions on `channel` (case-insensitive).
pub fn filter_by_channel(versions: &[AvailableVersion], channel: &str) -> Vec<AvailableVersion> {
    versions
        .iter()
        .filter(|v| v.channel.eq_ignore_ascii_case(channel))
        .cloned()
        .collect()
}
