//! Persisted package source configurations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// A configured origin of release artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSourceConfig {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub kind: SourceKind,
}

/// Type-specific source settings, tagged on `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SourceKind {
    LocalFolder {
        path: String,
    },
    #[serde(alias = "hosted-release")]
    GithubRelease {
        owner: String,
        repo: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    HttpIndex {
        index_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth_token: Option<String>,
    },
}

impl SourceKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::LocalFolder { .. } => "local-folder",
            Self::GithubRelease { .. } => "github-release",
            Self::HttpIndex { .. } => "http-index",
        }
    }

    /// Check that the type-specific required fields are present and well-formed.
    ///
    /// Does not touch the filesystem or network.
    pub fn check_fields(&self) -> Result<()> {
        match self {
            Self::LocalFolder { path } => {
                if path.trim().is_empty() {
                    return Err(AppError::invalid_source_config("local-folder requires a path"));
                }
            }
            Self::GithubRelease { owner, repo, .. } => {
                let is_segment = |s: &str| {
                    !s.is_empty()
                        && s.chars()
                            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
                };
                if !is_segment(owner) || !is_segment(repo) {
                    return Err(AppError::invalid_source_config(
                        "github-release requires a valid owner and repo",
                    ));
                }
            }
            Self::HttpIndex {
                index_url,
                base_url,
                ..
            } => {
                parse_http_url(index_url)?;
                if let Some(base) = base_url.as_deref().filter(|b| !b.is_empty()) {
                    parse_http_url(base)?;
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn parse_http_url(raw: &str) -> Result<reqwest::Url> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| AppError::invalid_source_config(format!("Invalid URL {raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::invalid_source_config(format!(
            "Unsupported URL scheme: {}",
            url.scheme()
        )));
    }
    Ok(url)
}

impl PackageSourceConfig {
    pub fn new(name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: Utc::now(),
            last_used_at: None,
            kind,
        }
    }

    pub fn check_fields(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::invalid_source_config("Source name is empty"));
        }
        self.kind.check_fields()
    }
}
