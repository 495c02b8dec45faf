//! Enabling and disabling installed plugins.
//!
//! A plugin is active when its primary artifact exists under its real name
//! and inactive when only the `.disabled` twin exists. Toggling is a
//! single rename.

use crate::error::{PluginError, Result};
use crate::manifest::PluginManifest;
use crate::paths::{disabled_path, PluginDirs};
use crate::registry::PluginRegistry;
use crate::state::{path_exists, InstallationState};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Changed,
    /// The plugin was already in the requested state
    Unchanged,
}

pub struct ActivationController {
    dirs: PluginDirs,
}

impl ActivationController {
    pub fn new(dirs: PluginDirs) -> Self {
        Self { dirs }
    }

    pub fn dirs(&self) -> &PluginDirs {
        &self.dirs
    }

    pub async fn is_active(&self, plugin: &PluginManifest) -> bool {
        InstallationState::query(&self.dirs, plugin).await.active
    }

    pub async fn activate(&self, plugin: &mut PluginManifest) -> Result<Transition> {
        self.toggle(plugin, true).await
    }

    pub async fn deactivate(&self, plugin: &mut PluginManifest) -> Result<Transition> {
        self.toggle(plugin, false).await
    }

    /// Moves the plugin's artifact into the requested state and records it
    /// in the manifest's `enabled` flag.
    pub async fn toggle(&self, plugin: &mut PluginManifest, enable: bool) -> Result<Transition> {
        let Some(artifact) = self.dirs.primary_artifact(plugin) else {
            let transition = if plugin.enabled == enable {
                Transition::Unchanged
            } else {
                Transition::Changed
            };
            plugin.enabled = enable;
            return Ok(transition);
        };

        let disabled = disabled_path(&artifact);
        let (from, to, label) = if enable {
            (disabled.as_path(), artifact.as_path(), "enabled")
        } else {
            (artifact.as_path(), disabled.as_path(), "disabled")
        };

        let transition = self.move_artifact(plugin, from, to, label).await?;
        plugin.enabled = enable;
        Ok(transition)
    }

    async fn move_artifact(
        &self,
        plugin: &PluginManifest,
        from: &Path,
        to: &Path,
        label: &str,
    ) -> Result<Transition> {
        if path_exists(to).await {
            info!("Plugin {} is already {}", plugin.display_name, label);
            return Ok(Transition::Unchanged);
        }
        if !path_exists(from).await {
            return Err(PluginError::NotInstalled {
                plugin: plugin.name.clone(),
                path: from.to_path_buf(),
            });
        }

        tokio::fs::rename(from, to)
            .await
            .map_err(|e| PluginError::io(from, e))?;
        info!("Plugin {} {}", plugin.display_name, label);
        Ok(Transition::Changed)
    }

    /// Names of resolvable dependencies of `plugin` that are not active.
    /// Names the registry does not know are ignored.
    pub async fn unmet_dependencies(
        &self,
        plugin: &PluginManifest,
        registry: &PluginRegistry,
    ) -> Vec<String> {
        let mut missing = Vec::new();
        for name in &plugin.dependencies {
            if let Some(dependency) = registry.get(name) {
                if !self.is_active(dependency).await {
                    missing.push(name.clone());
                }
            }
        }
        missing
    }

    pub async fn dependencies_satisfied(
        &self,
        plugin: &PluginManifest,
        registry: &PluginRegistry,
    ) -> bool {
        self.unmet_dependencies(plugin, registry).await.is_empty()
    }

    /// Activates the named plugin, refusing while any of its dependencies
    /// is inactive.
    pub async fn activate_with_dependencies(
        &self,
        registry: &mut PluginRegistry,
        name: &str,
    ) -> Result<Transition> {
        let plugin = registry
            .get(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        let missing = self.unmet_dependencies(plugin, registry).await;
        if !missing.is_empty() {
            return Err(PluginError::DependencyUnmet {
                plugin: name.to_string(),
                missing,
            });
        }

        let plugin = registry
            .get_mut(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        self.activate(plugin).await
    }
}
