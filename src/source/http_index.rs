//! Package source backed by a JSON index document served over HTTP.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::Deserialize;

use super::config::parse_http_url;
use super::filename::parse_artifact_filename;
use super::{AvailableVersion, ValidationResult};
use crate::download::{download_file, DownloadCallback};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDocument {
    #[serde(default)]
    pub versions: Vec<IndexVersion>,
    #[serde(default)]
    pub channels: BTreeMap<String, IndexChannel>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexVersion {
    pub version: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub released_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assets: Vec<IndexAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexAsset {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexChannel {
    #[serde(default)]
    pub versions: Vec<String>,
}

impl IndexDocument {
    /// First channel, by name, that lists `version`.
    fn channel_listing(&self, version: &str) -> Option<&str> {
        self.channels
            .iter()
            .find(|(_, channel)| channel.versions.iter().any(|v| v == version))
            .map(|(name, _)| name.as_str())
    }

    /// Resolve every asset against `base` into available versions.
    pub fn to_versions(&self, base: &Url) -> Vec<AvailableVersion> {
        let mut out = Vec::new();
        for entry in &self.versions {
            let listed_channel = entry
                .channel
                .as_deref()
                .or_else(|| self.channel_listing(&entry.version));

            for asset in &entry.assets {
                let Some(parsed) = parse_artifact_filename(&asset.name) else {
                    log::debug!("Skipping unrecognized index asset {}", asset.name);
                    continue;
                };
                let Some(download_url) = resolve_asset_url(base, asset) else {
                    log::warn!("Index asset {} has no usable url or path", asset.name);
                    continue;
                };

                let mut version = AvailableVersion::from_parsed(&parsed, &asset.name);
                version.released_at = entry.released_at;
                version.size_bytes = asset.size;
                version.download_url = Some(download_url);
                if let Some(channel) = listed_channel {
                    version.channel = channel.to_string();
                }
                out.push(version);
            }
        }
        out
    }
}

fn resolve_asset_url(base: &Url, asset: &IndexAsset) -> Option<String> {
    if let Some(url) = asset.url.as_deref().filter(|u| !u.is_empty()) {
        return base.join(url).ok().map(String::from);
    }
    let path = asset.path.as_deref().unwrap_or(&asset.name);
    base.join(path.trim_start_matches('/')).ok().map(String::from)
}

#[derive(Debug, Clone)]
pub struct HttpIndexSource {
    client: Client,
    index_url: String,
    base_url: Option<String>,
    auth_token: Option<String>,
}

impl HttpIndexSource {
    pub fn new(
        client: Client,
        index_url: &str,
        base_url: Option<&str>,
        auth_token: Option<&str>,
    ) -> Self {
        Self {
            client,
            index_url: index_url.to_string(),
            base_url: base_url.filter(|b| !b.is_empty()).map(str::to_string),
            auth_token: auth_token.filter(|t| !t.is_empty()).map(str::to_string),
        }
    }

    /// Base that relative asset paths are resolved against.
    fn resolution_base(&self) -> Result<Url> {
        match self.base_url.as_deref() {
            Some(base) if base.ends_with('/') => parse_http_url(base),
            Some(base) => parse_http_url(&format!("{base}/")),
            None => parse_http_url(&self.index_url),
        }
    }

    /// The auth token, only for URLs on the index or base URL origin.
    fn token_for(&self, url: &str) -> Option<&str> {
        let token = self.auth_token.as_deref()?;
        let origin = Url::parse(url).ok()?.origin();
        let trusted = [Some(self.index_url.as_str()), self.base_url.as_deref()]
            .into_iter()
            .flatten()
            .filter_map(|u| Url::parse(u).ok())
            .any(|u| u.origin() == origin);
        if trusted {
            Some(token)
        } else {
            log::debug!("Not sending index credentials to {}", url);
            None
        }
    }

    pub async fn fetch_index(&self) -> Result<IndexDocument> {
        let mut request = self.client.get(&self.index_url);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| AppError::network_with_url(&self.index_url, e.to_string()))?;
        if !resp.status().is_success() {
            return Err(AppError::network_with_url(
                &self.index_url,
                resp.status().to_string(),
            ));
        }
        let text = resp
            .text()
            .await
            .map_err(|e| AppError::network_with_url(&self.index_url, e.to_string()))?;
        serde_json::from_str(&text)
            .map_err(|e| AppError::network_with_url(&self.index_url, format!("Invalid index: {e}")))
    }

    pub async fn list_available_versions(&self) -> Result<Vec<AvailableVersion>> {
        let base = self.resolution_base()?;
        let index = self.fetch_index().await?;
        Ok(index.to_versions(&base))
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
        download_file(&self.client, url, dest, self.token_for(url), on_progress).await
    }

    pub fn validate_config(&self) -> ValidationResult {
        match self.resolution_base() {
            Ok(_) => ValidationResult::ok(),
            Err(e) => ValidationResult::invalid(e.detail().unwrap_or("invalid URL")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"{
        "versions": [
            {"version": "1.2.0", "channel": "stable", "releasedAt": "2026-02-01T00:00:00Z",
             "assets": [
                {"name": "hagicode-1.2.0-linux-x64.zip", "path": "1.2.0/hagicode-1.2.0-linux-x64.zip", "size": 123},
                {"name": "hagicode-1.2.0-osx.tar.gz", "url": "https://mirror.example.com/osx.tar.gz"}
             ]},
            {"version": "1.3.0-beta.1",
             "assets": [{"name": "hagicode-1.3.0-beta.1-linux.zip", "url": null}]},
            {"version": "1.4.0",
             "assets": [{"name": "hagicode-1.4.0-linux.zip"}]}
        ],
        "channels": {"preview": {"versions": ["1.4.0"]}}
    }"#;

    #[test]
    fn resolves_relative_paths_against_index_url() {
        let doc: IndexDocument = serde_json::from_str(INDEX).unwrap();
        let base = Url::parse("https://example.com/hagicode/index.json").unwrap();
        let versions = doc.to_versions(&base);
        assert_eq!(versions.len(), 4);

        assert_eq!(
            versions[0].download_url.as_deref(),
            Some("https://example.com/hagicode/1.2.0/hagicode-1.2.0-linux-x64.zip")
        );
        assert_eq!(versions[0].size_bytes, Some(123));
        assert_eq!(
            versions[1].download_url.as_deref(),
            Some("https://mirror.example.com/osx.tar.gz")
        );
        assert_eq!(
            versions[2].download_url.as_deref(),
            Some("https://example.com/hagicode/hagicode-1.3.0-beta.1-linux.zip")
        );
    }

    #[test]
    fn channel_precedence() {
        let doc: IndexDocument = serde_json::from_str(INDEX).unwrap();
        let base = Url::parse("https://example.com/index.json").unwrap();
        let versions = doc.to_versions(&base);
        assert_eq!(versions[0].channel, "stable");
        // Derived from the filename.
        assert_eq!(versions[2].channel, "beta");
        // Listed under `channels`.
        assert_eq!(versions[3].channel, "preview");
    }

    #[test]
    fn base_url_without_trailing_slash_keeps_last_segment() {
        let source = HttpIndexSource::new(
            Client::new(),
            "https://example.com/index.json",
            Some("https://cdn.example.com/releases"),
            None,
        );
        let base = source.resolution_base().unwrap();
        assert_eq!(
            base.join("1.2.0/a.zip").unwrap().as_str(),
            "https://cdn.example.com/releases/1.2.0/a.zip"
        );
    }

    #[tokio::test]
    async fn lists_from_served_index() {
        let base = crate::download::test_server::serve(INDEX.as_bytes().to_vec(), "application/json").await;
        let source = HttpIndexSource::new(Client::new(), &format!("{base}/index.json"), None, None);
        let versions = source.list_available_versions().await.unwrap();
        assert_eq!(versions.len(), 4);
        assert!(versions[0]
            .download_url
            .as_deref()
            .unwrap()
            .starts_with(&base));
    }

    #[test]
    fn channel_listing_is_stable_across_channels() {
        let doc: IndexDocument = serde_json::from_str(
            r#"{"versions": [{"version": "2.0.0", "assets": [{"name": "hagicode-2.0.0-linux.zip"}]}],
                "channels": {"rc": {"versions": ["2.0.0"]}, "beta": {"versions": ["2.0.0"]}}}"#,
        )
        .unwrap();
        let base = Url::parse("https://example.com/index.json").unwrap();
        for _ in 0..5 {
            assert_eq!(doc.to_versions(&base)[0].channel, "beta");
        }
    }

    #[test]
    fn token_only_goes_to_index_or_base_origin() {
        let source = HttpIndexSource::new(
            Client::new(),
            "https://example.com/index.json",
            Some("https://cdn.example.com:8443/releases"),
            Some("s3cret"),
        );
        assert_eq!(source.token_for("https://example.com/1.2.0/a.zip"), Some("s3cret"));
        assert_eq!(source.token_for("https://cdn.example.com:8443/a.zip"), Some("s3cret"));
        assert_eq!(source.token_for("https://cdn.example.com/a.zip"), None);
        assert_eq!(source.token_for("http://example.com/a.zip"), None);
        assert_eq!(source.token_for("https://mirror.example.org/a.zip"), None);
    }

    #[tokio::test]
    async fn asset_on_other_origin_is_fetched_without_credentials() {
        use crate::download::test_server::serve_recording;

        let (index_base, index_requests) = serve_recording(b"{}".to_vec(), "application/json").await;
        let (mirror_base, mirror_requests) =
            serve_recording(b"zip".to_vec(), "application/octet-stream").await;
        let source = HttpIndexSource::new(
            Client::new(),
            &format!("{index_base}/index.json"),
            None,
            Some("s3cret"),
        );
        source.fetch_index().await.unwrap();

        let tmp = tempfile::TempDir::new().unwrap();
        let mut version = AvailableVersion::from_parsed(
            &parse_artifact_filename("hagicode-1.2.0-linux.zip").unwrap(),
            "hagicode-1.2.0-linux.zip",
        );
        version.download_url = Some(format!("{mirror_base}/a.zip"));
        source
            .download_package(&version, &tmp.path().join("a.zip"), &|_| {})
            .await
            .unwrap();
        version.download_url = Some(format!("{index_base}/a.zip"));
        source
            .download_package(&version, &tmp.path().join("b.zip"), &|_| {})
            .await
            .unwrap();

        let mirror = mirror_requests.lock().unwrap();
        assert_eq!(mirror.len(), 1);
        assert!(!mirror[0].contains("authorization"));
        let index = index_requests.lock().unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.iter().all(|r| r.contains("authorization: bearer s3cret")));
    }
}
