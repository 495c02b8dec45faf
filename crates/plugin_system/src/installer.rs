//! Downloads, extracts and configures plugins.
//!
//! Installation is idempotent: a plugin whose directory already exists is
//! never fetched again, but its configuration files are still refreshed.

use crate::archive::Archive;
use crate::error::{PluginError, Result};
use crate::manifest::{PluginKind, PluginManifest};
use crate::paths::{disabled_path, PluginDirs};
use crate::source::ArchiveSource;
use crate::state::{is_file, path_exists};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Written into a plugin's directory after a fresh install.
pub const RECEIPT_FILE_NAME: &str = ".kzhost-install.json";

/// Name under which the loader framework itself is installed.
pub const LOADER_FRAMEWORK_NAME: &str = "metamod";

const LOADER_SEARCH_PATH: &str = "csgo/addons/metamod";

static GAMEINFO_GAME_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(Game\scsgo(\r?\n))").expect("gameinfo search path pattern is valid")
});

/// Records which archive a plugin directory was installed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReceipt {
    pub download_url: String,
    pub installed_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The archive was fetched and extracted
    Installed,
    /// Nothing was fetched; configs were refreshed
    AlreadyInstalled,
}

impl InstallOutcome {
    pub fn fetched(self) -> bool {
        self == InstallOutcome::Installed
    }
}

enum ConfigSource {
    /// Path to an existing file, copied when the target is absent
    Reference(PathBuf),
    /// Written verbatim
    Literal(String),
    /// Written pretty-printed
    Json(Value),
}

impl ConfigSource {
    async fn classify(dirs: &PluginDirs, plugin: &PluginManifest, value: &Value) -> Self {
        match value {
            Value::String(text) => match dirs.resolve(plugin, text) {
                Ok(path) if is_file(&path).await => ConfigSource::Reference(path),
                _ => ConfigSource::Literal(text.clone()),
            },
            other => ConfigSource::Json(other.clone()),
        }
    }
}

// ============================================================================
// Installation Engine
// ============================================================================

pub struct InstallationEngine {
    dirs: PluginDirs,
    source: Arc<dyn ArchiveSource>,
}

impl InstallationEngine {
    pub fn new(dirs: PluginDirs, source: Arc<dyn ArchiveSource>) -> Self {
        Self { dirs, source }
    }

    pub fn dirs(&self) -> &PluginDirs {
        &self.dirs
    }

    /// Whether the plugin's directory exists. Config-only plugins are
    /// always installed.
    pub async fn is_installed(&self, plugin: &PluginManifest) -> bool {
        match self.dirs.plugin_dir(plugin) {
            Some(dir) => path_exists(&dir).await,
            None => true,
        }
    }

    /// Installs `plugin` unless already present, then materializes its
    /// configuration files.
    pub async fn install(&self, plugin: &PluginManifest) -> Result<InstallOutcome> {
        let Some(plugin_dir) = self.dirs.plugin_dir(plugin) else {
            self.install_configs(plugin).await?;
            return Ok(InstallOutcome::AlreadyInstalled);
        };

        if path_exists(&plugin_dir).await {
            debug!(
                "{} is already installed, skipping installation",
                plugin.display_name
            );
            self.install_configs(plugin).await?;
            return Ok(InstallOutcome::AlreadyInstalled);
        }

        info!("Installing {}...", plugin.display_name);
        let archive = self.source.fetch(&plugin.download_url).await?;
        self.extract(plugin, &archive).await?;

        if !path_exists(&plugin_dir).await {
            return Err(PluginError::InstallationFailed {
                plugin: plugin.name.clone(),
                path: plugin_dir,
            });
        }

        self.write_receipt(plugin, &plugin_dir).await?;
        self.install_configs(plugin).await?;
        info!("{} installed", plugin.display_name);
        Ok(InstallOutcome::Installed)
    }

    async fn extract(&self, plugin: &PluginManifest, archive: &Archive) -> Result<()> {
        let target = self.dirs.resolve(plugin, &plugin.target_extract_dir)?;
        debug!(
            "Extracting {} into {}",
            plugin.display_name,
            target.display()
        );
        archive
            .extract(&target, plugin.archive_subpath.as_deref())
            .await?;
        Ok(())
    }

    /// Writes every configuration file declared by `plugin`.
    pub async fn install_configs(&self, plugin: &PluginManifest) -> Result<()> {
        for config in &plugin.configs {
            let target = self.dirs.resolve(plugin, &config.target)?;
            let contents = match ConfigSource::classify(&self.dirs, plugin, &config.config).await {
                ConfigSource::Reference(source) => {
                    if path_exists(&target).await {
                        debug!(
                            "Keeping existing config {} for {}",
                            target.display(),
                            plugin.name
                        );
                        continue;
                    }
                    tokio::fs::read(&source)
                        .await
                        .map_err(|e| PluginError::io(&source, e))?
                }
                ConfigSource::Literal(text) => text.into_bytes(),
                ConfigSource::Json(value) => serde_json::to_vec_pretty(&value)?,
            };

            write_file(&target, &contents).await?;
            debug!("Wrote config {} for {}", target.display(), plugin.name);
        }
        Ok(())
    }

    pub async fn read_receipt(&self, plugin: &PluginManifest) -> Option<InstallReceipt> {
        let path = self.dirs.plugin_dir(plugin)?.join(RECEIPT_FILE_NAME);
        let raw = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice(&raw) {
            Ok(receipt) => Some(receipt),
            Err(e) => {
                warn!("Ignoring unreadable install receipt {}: {}", path.display(), e);
                None
            }
        }
    }

    /// True when the plugin was installed from a different URL than the
    /// one its manifest now names.
    pub async fn needs_reinstall(&self, plugin: &PluginManifest) -> bool {
        if !plugin.kind.has_archive() {
            return false;
        }
        match self.read_receipt(plugin).await {
            Some(receipt) => receipt.download_url != plugin.download_url,
            None => false,
        }
    }

    async fn write_receipt(&self, plugin: &PluginManifest, plugin_dir: &Path) -> Result<()> {
        let receipt = InstallReceipt {
            download_url: plugin.download_url.clone(),
            installed_at: server_types::current_timestamp(),
        };
        let contents = serde_json::to_vec_pretty(&receipt)?;
        write_file(&plugin_dir.join(RECEIPT_FILE_NAME), &contents).await
    }

    /// Deletes the plugin's directory and loader descriptor, if any.
    pub async fn uninstall(&self, plugin: &PluginManifest) -> Result<()> {
        if let Some(dir) = self.dirs.plugin_dir(plugin) {
            if path_exists(&dir).await {
                tokio::fs::remove_dir_all(&dir)
                    .await
                    .map_err(|e| PluginError::io(&dir, e))?;
            }
        }

        if plugin.kind == PluginKind::Loader {
            if let Some(artifact) = self.dirs.primary_artifact(plugin) {
                for path in [disabled_path(&artifact), artifact] {
                    if path_exists(&path).await {
                        tokio::fs::remove_file(&path)
                            .await
                            .map_err(|e| PluginError::io(&path, e))?;
                    }
                }
            }
        }

        info!("Uninstalled {}", plugin.display_name);
        Ok(())
    }

    // ========================================================================
    // Loader Framework
    // ========================================================================

    /// Manifest describing the loader framework served from `url`.
    pub fn loader_framework_manifest(url: &str) -> PluginManifest {
        let mut manifest = PluginManifest::new(LOADER_FRAMEWORK_NAME, PluginKind::Loader)
            .with_download_url(url)
            .with_target_extract_dir("@csgo");
        manifest.display_name = "Metamod:Source".to_string();
        manifest
    }

    /// Installs the loader framework and makes sure the engine loads it.
    pub async fn install_loader_framework(&self, url: &str) -> Result<InstallOutcome> {
        let gameinfo = self.dirs.gameinfo();
        if !path_exists(&gameinfo).await {
            return Err(PluginError::InstallationFailed {
                plugin: LOADER_FRAMEWORK_NAME.to_string(),
                path: gameinfo,
            });
        }

        let manifest = Self::loader_framework_manifest(url);
        let outcome = match self.dirs.plugin_dir(&manifest) {
            // Other loader plugins keep descriptors inside the framework's
            // directory, so an upgrade extracts over it instead of wiping it.
            Some(dir) if self.needs_reinstall(&manifest).await => {
                info!("Upgrading {} from {}", manifest.display_name, url);
                let archive = self.source.fetch(url).await?;
                self.extract(&manifest, &archive).await?;
                self.write_receipt(&manifest, &dir).await?;
                InstallOutcome::Installed
            }
            _ => self.install(&manifest).await?,
        };
        self.ensure_gameinfo_patched().await?;
        Ok(outcome)
    }

    /// Adds the loader search path to gameinfo.gi. Game updates restore
    /// the stock file, so this runs on every bootstrap.
    pub async fn ensure_gameinfo_patched(&self) -> Result<bool> {
        let gameinfo = self.dirs.gameinfo();
        let content = tokio::fs::read_to_string(&gameinfo)
            .await
            .map_err(|e| PluginError::io(&gameinfo, e))?;

        match patch_gameinfo(&content) {
            Some(patched) => {
                write_file(&gameinfo, patched.as_bytes()).await?;
                info!("Added loader search path to {}", gameinfo.display());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Inserts the loader search path before the `Game csgo` line.
///
/// Returns `None` if the path is already present or there is no such line.
pub fn patch_gameinfo(content: &str) -> Option<String> {
    if content.contains(LOADER_SEARCH_PATH) || !GAMEINFO_GAME_LINE.is_match(content) {
        return None;
    }
    let replacement = format!("Game\t{LOADER_SEARCH_PATH}${{2}}${{1}}");
    Some(
        GAMEINFO_GAME_LINE
            .replacen(content, 1, replacement.as_str())
            .into_owned(),
    )
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PluginError::io(parent, e))?;
    }
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| PluginError::io(path, e))
}
