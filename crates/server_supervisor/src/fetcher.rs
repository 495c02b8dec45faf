//! Provisioning of the package tool that installs the dedicated server.

use crate::error::{Result, ServerError};
use async_trait::async_trait;
use plugin_system::{ArchiveSource, HttpArchiveSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// A ready-to-run package tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPackage {
    pub executable: PathBuf,
}

#[async_trait]
pub trait PackageFetcher: Send + Sync {
    /// Downloads the tool published at `url` into `dest_dir` unless it is
    /// already there.
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<FetchedPackage>;
}

pub fn steamcmd_executable_name() -> &'static str {
    if cfg!(windows) {
        "steamcmd.exe"
    } else {
        "steamcmd.sh"
    }
}

/// Fetches SteamCMD from Valve's CDN.
pub struct SteamCmdFetcher {
    source: Arc<dyn ArchiveSource>,
}

impl SteamCmdFetcher {
    pub fn new(source: Arc<dyn ArchiveSource>) -> Self {
        Self { source }
    }
}

impl Default for SteamCmdFetcher {
    fn default() -> Self {
        Self::new(Arc::new(HttpArchiveSource::new()))
    }
}

#[async_trait]
impl PackageFetcher for SteamCmdFetcher {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<FetchedPackage> {
        let executable = dest_dir.join(steamcmd_executable_name());
        if tokio::fs::try_exists(&executable).await.unwrap_or(false) {
            debug!("SteamCMD already present at {}", executable.display());
            return Ok(FetchedPackage { executable });
        }

        info!("Fetching SteamCMD into {}", dest_dir.display());
        let archive = self.source.fetch(url).await?;
        archive.extract(dest_dir, None).await?;

        if !tokio::fs::try_exists(&executable).await.unwrap_or(false) {
            return Err(ServerError::ExecutableMissing(executable));
        }
        Ok(FetchedPackage { executable })
    }
}
