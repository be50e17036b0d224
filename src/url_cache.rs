// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 loom-runner contributors

//! URL cache (§4.2): downloads HTTP(S)-valued inputs on demand to a
//! deterministic cache path beside the pipeline file.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::errors::{RunnerError, RunnerResult};

const CACHE_DIR_NAME: &str = ".loom-url-cache";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = concat!("loom-runner/", env!("CARGO_PKG_VERSION"));

pub fn is_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Filename-from-URL-path, or `"download"` when the URL has no path segment.
fn filename_from_url(url: &str) -> String {
    url.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("download")
        .to_string()
}

/// `<16-hex-prefix of SHA-256(url)>_<filename>` (§4.2).
fn cache_filename(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    format!("{}_{}", &hex[..16], filename_from_url(url))
}

#[derive(Debug, Clone)]
pub struct UrlCache {
    dir: PathBuf,
    client: reqwest::Client,
}

impl UrlCache {
    pub fn new(pipeline_dir: &Path) -> Self {
        Self {
            dir: pipeline_dir.join(CACHE_DIR_NAME),
            client: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
                .build()
                .expect("static reqwest client configuration is valid"),
        }
    }

    pub fn cache_path(&self, url: &str) -> PathBuf {
        self.dir.join(cache_filename(url))
    }

    /// Return the cache path for `url`, downloading it first if it is not
    /// already present or `force` is set. Concurrency-safe: downloads into a
    /// sibling temp file, then renames atomically (§4.2).
    pub async fn ensure_downloaded(&self, url: &str, force: bool) -> RunnerResult<PathBuf> {
        let cache_path = self.cache_path(url);

        if !force && cache_path.exists() {
            return Ok(cache_path);
        }

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| RunnerError::DownloadError {
            url: url.to_string(),
            cause: e.to_string(),
        })?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| RunnerError::DownloadError {
                url: url.to_string(),
                cause: e.to_string(),
            })?;

        let tmp_path = cache_path.with_extension(format!(
            "tmp-{}",
            std::process::id()
        ));
        let mut tmp_file = tokio::fs::File::create(&tmp_path).await.map_err(|e| RunnerError::DownloadError {
            url: url.to_string(),
            cause: e.to_string(),
        })?;

        let mut stream = response.bytes_stream();
        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| RunnerError::DownloadError {
                url: url.to_string(),
                cause: e.to_string(),
            })?;
            tmp_file.write_all(&chunk).await.map_err(|e| RunnerError::DownloadError {
                url: url.to_string(),
                cause: e.to_string(),
            })?;
        }
        tmp_file.flush().await.map_err(|e| RunnerError::DownloadError {
            url: url.to_string(),
            cause: e.to_string(),
        })?;
        drop(tmp_file);

        tokio::fs::rename(&tmp_path, &cache_path).await.map_err(|e| RunnerError::DownloadError {
            url: url.to_string(),
            cause: e.to_string(),
        })?;

        Ok(cache_path)
    }
}
