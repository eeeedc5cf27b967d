//! Archive downloads.

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Download errors.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Download failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed: HTTP {status}: {url}")]
    Status { status: u16, url: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file to fetch.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    /// Expected SHA256 checksum (optional).
    pub sha256: Option<String>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            sha256: None,
        }
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }
}

/// Streams downloads to disk.
#[derive(Debug, Clone, Default)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Download `request` to `dest`, replacing any existing file.
    pub async fn download(
        &self,
        request: &DownloadRequest,
        dest: &Path,
    ) -> Result<PathBuf, DownloadError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::try_exists(dest).await? {
            debug!("Removing existing {}", dest.display());
            tokio::fs::remove_file(dest).await?;
        }

        info!("Downloading {} to {}", request.url, dest.display());
        let response = self.client.get(&request.url).send().await?;
        if !response.status().is_success() {
            return Err(DownloadError::Status {
                status: response.status().as_u16(),
                url: request.url.clone(),
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        if let Some(expected) = &request.sha256 {
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected) {
                // Remove corrupted file
                let _ = tokio::fs::remove_file(dest).await;
                return Err(DownloadError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
            debug!("Checksum verified: {}", actual);
        }

        info!("Downloaded {} bytes from {}", downloaded, request.url);
        Ok(dest.to_path_buf())
    }
}
