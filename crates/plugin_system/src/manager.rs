//! Ties the registry, installer and activation controller together.

use crate::activation::{ActivationController, Transition};
use crate::error::{PluginError, Result};
use crate::installer::{InstallOutcome, InstallationEngine};
use crate::manifest::PluginManifest;
use crate::paths::PluginDirs;
use crate::registry::PluginRegistry;
use crate::source::ArchiveSource;
use crate::state::InstallationState;
use serde::Serialize;
use server_types::ServerStatus;
use std::sync::Arc;
use tracing::{info, warn};

/// What one orchestration pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub installed: Vec<String>,
    pub reinstalled: Vec<String>,
    pub activated: Vec<String>,
    pub deactivated: Vec<String>,
}

/// A manifest together with its on-disk state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginView {
    #[serde(flatten)]
    pub manifest: PluginManifest,
    pub installed: bool,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_installed_url: Option<String>,
}

/// Owns the plugin registry and applies it to the game tree.
pub struct PluginManager {
    registry: PluginRegistry,
    installer: InstallationEngine,
    activation: ActivationController,
}

impl PluginManager {
    /// Creates a manager for the game tree under `dirs`.
    ///
    /// # Arguments
    ///
    /// * `registry` - The validated manifests
    /// * `dirs` - Resolves plugin and artifact locations
    /// * `source` - Fetches plugin archives
    pub fn new(registry: PluginRegistry, dirs: PluginDirs, source: Arc<dyn ArchiveSource>) -> Self {
        Self {
            registry,
            installer: InstallationEngine::new(dirs.clone(), source),
            activation: ActivationController::new(dirs),
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PluginRegistry {
        &mut self.registry
    }

    pub fn installer(&self) -> &InstallationEngine {
        &self.installer
    }

    pub fn activation(&self) -> &ActivationController {
        &self.activation
    }

    /// Brings every plugin on disk in line with its manifest.
    ///
    /// Plugins are visited in dependency order: each is installed (or
    /// reinstalled when its download URL changed), toggled to its
    /// `enabled` flag, and then checked for inactive dependencies. The
    /// first failure stops the pass.
    ///
    /// # Returns
    ///
    /// The plugins that were installed, reinstalled, activated and
    /// deactivated.
    ///
    /// # Errors
    ///
    /// * `DependencyCycle` if the manifests cannot be ordered
    /// * `InstallationFailed` if an archive had nothing for the plugin directory
    /// * `DependencyUnmet` if an enabled plugin depends on an inactive one
    pub async fn sync_all(&mut self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let names = self.registry.ordered_names()?;
        info!("Synchronizing {} plugins", names.len());

        for name in names {
            let plugin = self
                .registry
                .get(&name)
                .ok_or_else(|| PluginError::NotFound(name.clone()))?;

            if self.installer.needs_reinstall(plugin).await {
                info!(
                    "Download URL of {} changed, reinstalling",
                    plugin.display_name
                );
                self.installer.uninstall(plugin).await?;
                report.reinstalled.push(name.clone());
            }

            if self.installer.install(plugin).await? == InstallOutcome::Installed {
                report.installed.push(name.clone());
            }

            let plugin = self
                .registry
                .get_mut(&name)
                .ok_or_else(|| PluginError::NotFound(name.clone()))?;
            let enable = plugin.enabled;
            if self.activation.toggle(plugin, enable).await? == Transition::Changed {
                if enable {
                    report.activated.push(name.clone());
                } else {
                    report.deactivated.push(name.clone());
                }
            }

            if enable {
                let plugin = self
                    .registry
                    .get(&name)
                    .ok_or_else(|| PluginError::NotFound(name.clone()))?;
                let missing = self
                    .activation
                    .unmet_dependencies(plugin, &self.registry)
                    .await;
                if !missing.is_empty() {
                    return Err(PluginError::DependencyUnmet {
                        plugin: name,
                        missing,
                    });
                }
            }
        }

        info!(
            "Plugins synchronized: {} installed, {} activated, {} deactivated",
            report.installed.len(),
            report.activated.len(),
            report.deactivated.len()
        );
        Ok(report)
    }

    /// Enables or disables one installed plugin right away and saves the
    /// new flag. Enabling refuses while a dependency is inactive.
    ///
    /// # Arguments
    ///
    /// * `name` - Plugin to toggle
    /// * `enabled` - Desired state
    /// * `status` - Current server status; must be `STOPPED`
    pub async fn set_enabled(
        &mut self,
        name: &str,
        enabled: bool,
        status: ServerStatus,
    ) -> Result<Transition> {
        if !status.is_stopped() {
            return Err(PluginError::PreconditionFailed {
                operation: "toggle plugins",
                status,
            });
        }

        let transition = if enabled {
            self.activation
                .activate_with_dependencies(&mut self.registry, name)
                .await?
        } else {
            let plugin = self
                .registry
                .get_mut(name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            self.activation.deactivate(plugin).await?
        };

        if let Err(e) = self.registry.persist().await {
            warn!("Failed to save plugin manifests after toggling {}: {}", name, e);
            return Err(e);
        }
        Ok(transition)
    }

    /// Every plugin with its current installation state, in stored order.
    pub async fn views(&self) -> Vec<PluginView> {
        let mut views = Vec::with_capacity(self.registry.len());
        for plugin in self.registry.plugins() {
            let state = InstallationState::query(self.installer.dirs(), plugin).await;
            let receipt = self.installer.read_receipt(plugin).await;
            views.push(PluginView {
                manifest: plugin.clone(),
                installed: state.installed,
                active: state.active,
                last_installed_url: receipt.map(|receipt| receipt.download_url),
            });
        }
        views
    }
}
