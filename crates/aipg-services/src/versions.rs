//! Pinned backend versions.
//!
//! Versions come from a remote `backend-versions.json` when one is
//! configured, falling back to the copy shipped in the base directory.
//! Both documents are loaded at most once until [`VersionCatalog::invalidate`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Version pin of one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendVersion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_tag: Option<String>,
    pub version: String,
}

/// Contents of `backend-versions.json`, keyed by service name.
pub type BackendVersions = HashMap<String, BackendVersion>;

/// Version loading errors.
#[derive(Debug, Error)]
pub enum VersionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote versions returned HTTP {0}")]
    Status(u16),
}

#[derive(Default)]
struct Loaded {
    // Some(None) records a failed remote fetch
    remote: Option<Option<BackendVersions>>,
    local: Option<BackendVersions>,
}

/// Resolves and caches backend versions.
pub struct VersionCatalog {
    client: reqwest::Client,
    remote_url: Option<String>,
    local_file: PathBuf,
    loaded: Mutex<Loaded>,
}

impl VersionCatalog {
    pub fn new(local_file: impl Into<PathBuf>, remote_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            remote_url,
            local_file: local_file.into(),
            loaded: Mutex::new(Loaded::default()),
        }
    }

    /// Version pin for `service`, remote first, then local.
    pub async fn resolve(&self, service: &str) -> Option<BackendVersion> {
        let mut loaded = self.loaded.lock().await;

        if loaded.remote.is_none() {
            loaded.remote = Some(match &self.remote_url {
                Some(url) => match self.fetch_remote(url).await {
                    Ok(versions) => Some(versions),
                    Err(e) => {
                        warn!("Failed to fetch versions from remote: {}", e);
                        None
                    }
                },
                None => None,
            });
        }
        if let Some(version) = loaded
            .remote
            .as_ref()
            .and_then(|remote| remote.as_ref())
            .and_then(|versions| versions.get(service))
        {
            debug!("Using remote version for {}: {:?}", service, version);
            return Some(version.clone());
        }

        if loaded.local.is_none() {
            match self.load_local().await {
                Ok(versions) => loaded.local = Some(versions),
                Err(e) => {
                    warn!(
                        "Failed to load backend versions from {}: {}",
                        self.local_file.display(),
                        e
                    );
                    return None;
                }
            }
        }
        let version = loaded
            .local
            .as_ref()
            .and_then(|versions| versions.get(service))
            .cloned();
        if version.is_none() {
            warn!("No version found for {}", service);
        }
        version
    }

    /// Forget loaded documents so the next lookup reads them again.
    pub async fn invalidate(&self) {
        *self.loaded.lock().await = Loaded::default();
    }

    async fn fetch_remote(&self, url: &str) -> Result<BackendVersions, VersionError> {
        info!("Fetching backend versions from {}", url);
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(VersionError::Status(response.status().as_u16()));
        }
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn load_local(&self) -> Result<BackendVersions, VersionError> {
        let content = tokio::fs::read_to_string(&self.local_file).await?;
        let versions = serde_json::from_str(&content)?;
        info!("Loaded backend versions from {}", self.local_file.display());
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestServer;

    const LOCAL: &str = r#"{
        "comfyui-backend": {"version": "v0.3.44"},
        "ollama-backend": {"releaseTag": "v2.3.0-nightly", "version": "2.3.0b20250630"}
    }"#;

    #[tokio::test]
    async fn test_local_versions() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("backend-versions.json");
        std::fs::write(&file, LOCAL).unwrap();

        let catalog = VersionCatalog::new(&file, None);
        let ollama = catalog.resolve("ollama-backend").await.unwrap();
        assert_eq!(ollama.release_tag.as_deref(), Some("v2.3.0-nightly"));
        assert_eq!(ollama.version, "2.3.0b20250630");
        assert!(catalog.resolve("ai-backend").await.is_none());
    }

    #[tokio::test]
    async fn test_cached_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("backend-versions.json");
        std::fs::write(&file, LOCAL).unwrap();
        let catalog = VersionCatalog::new(&file, None);
        assert_eq!(catalog.resolve("comfyui-backend").await.unwrap().version, "v0.3.44");

        std::fs::write(&file, r#"{"comfyui-backend": {"version": "v0.3.50"}}"#).unwrap();
        assert_eq!(catalog.resolve("comfyui-backend").await.unwrap().version, "v0.3.44");

        catalog.invalidate().await;
        assert_eq!(catalog.resolve("comfyui-backend").await.unwrap().version, "v0.3.50");
    }

    #[tokio::test]
    async fn test_remote_wins_over_local() {
        let server =
            TestServer::ok(r#"{"comfyui-backend": {"version": "remote-rev"}}"#).await;
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("backend-versions.json");
        std::fs::write(&file, LOCAL).unwrap();

        let catalog = VersionCatalog::new(&file, Some(server.url("/backend-versions.json")));
        assert_eq!(catalog.resolve("comfyui-backend").await.unwrap().version, "remote-rev");
        // missing remotely, present locally
        assert!(catalog.resolve("ollama-backend").await.is_some());
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_to_local() {
        let server = TestServer::start(|_, _| (500, Vec::new())).await;
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("backend-versions.json");
        std::fs::write(&file, LOCAL).unwrap();

        let catalog = VersionCatalog::new(&file, Some(server.url("/v.json")));
        assert_eq!(catalog.resolve("comfyui-backend").await.unwrap().version, "v0.3.44");
        assert_eq!(catalog.resolve("comfyui-backend").await.unwrap().version, "v0.3.44");
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn test_missing_local_file() {
        let catalog = VersionCatalog::new("/nonexistent/backend-versions.json", None);
        assert!(catalog.resolve("comfyui-backend").await.is_none());
    }
}
