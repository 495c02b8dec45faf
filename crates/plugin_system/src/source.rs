//! Where plugin archives come from.

use crate::archive::Archive;
use crate::error::{PluginError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

/// Fetches and decodes the archive published at a URL.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Archive>;
}

// ============================================================================
// HTTP Source
// ============================================================================

/// Downloads archives over HTTP(S).
#[derive(Debug, Clone, Default)]
pub struct HttpArchiveSource {
    client: reqwest::Client,
}

impl HttpArchiveSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArchiveSource for HttpArchiveSource {
    async fn fetch(&self, url: &str) -> Result<Archive> {
        info!("Downloading {}", url);

        let download_error = |reason: String| PluginError::Download {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(download_error(format!("server responded with {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| download_error(e.to_string()))?;
        debug!("Downloaded {} bytes from {}", bytes.len(), url);

        Archive::decode(url, &bytes)
    }
}

// ============================================================================
// In-Memory Source
// ============================================================================

/// Serves pre-built archives by URL and counts fetches.
///
/// Unknown URLs fail like an HTTP 404 would.
#[derive(Debug, Default)]
pub struct MemoryArchiveSource {
    archives: Mutex<HashMap<String, Archive>>,
    fetches: AtomicUsize,
}

impl MemoryArchiveSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_archive(self, url: impl Into<String>, archive: Archive) -> Self {
        self.insert(url, archive);
        self
    }

    pub fn insert(&self, url: impl Into<String>, archive: Archive) {
        if let Ok(mut archives) = self.archives.lock() {
            archives.insert(url.into(), archive);
        }
    }

    /// Number of fetch attempts so far, successful or not.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveSource for MemoryArchiveSource {
    async fn fetch(&self, url: &str) -> Result<Archive> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let archive = self
            .archives
            .lock()
            .ok()
            .and_then(|archives| archives.get(url).cloned());

        archive.ok_or_else(|| PluginError::Download {
            url: url.to_string(),
            reason: "server responded with 404 Not Found".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveEntry;

    #[tokio::test]
    async fn test_memory_source_serves_known_urls() {
        let source = MemoryArchiveSource::new().with_archive(
            "https://example.invalid/a.zip",
            Archive::new("a", vec![ArchiveEntry::file("a.txt", b"a".to_vec())]),
        );

        let archive = source.fetch("https://example.invalid/a.zip").await.unwrap();
        assert_eq!(archive.entries().len(), 1);

        let err = source.fetch("https://example.invalid/b.zip").await.unwrap_err();
        assert!(matches!(err, PluginError::Download { .. }));
        assert_eq!(source.fetch_count(), 2);
    }
}
