//! On-disk installation state of a plugin.
//!
//! Nothing here is cached: installed and active are read from the file
//! system every time.

use crate::manifest::{PluginKind, PluginManifest};
use crate::paths::{disabled_path, PluginDirs};
use serde::Serialize;
use std::path::Path;

pub(crate) async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

pub(crate) async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationState {
    pub installed: bool,
    pub active: bool,
}

impl InstallationState {
    /// Reads the state of `plugin` from disk.
    ///
    /// Config-only plugins count as always installed, and are active when
    /// their manifest says so.
    pub async fn query(dirs: &PluginDirs, plugin: &PluginManifest) -> Self {
        if plugin.kind == PluginKind::ConfigOnly {
            return Self {
                installed: true,
                active: plugin.enabled,
            };
        }

        let installed = match dirs.plugin_dir(plugin) {
            Some(dir) => path_exists(&dir).await,
            None => false,
        };
        let active = match dirs.primary_artifact(plugin) {
            Some(artifact) => path_exists(&artifact).await,
            None => false,
        };

        Self { installed, active }
    }

    /// Whether the disabled twin of the primary artifact is present.
    pub async fn has_disabled_artifact(dirs: &PluginDirs, plugin: &PluginManifest) -> bool {
        match dirs.primary_artifact(plugin) {
            Some(artifact) => path_exists(&disabled_path(&artifact)).await,
            None => false,
        }
    }
}
