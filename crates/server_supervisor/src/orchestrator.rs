//! The supervisor context: owns every collaborator and wires them up.

use crate::config::SupervisorSettings;
use crate::config_store::{ConfigStore, DirConfigStore};
use crate::error::Result;
use crate::fetcher::{PackageFetcher, SteamCmdFetcher};
use crate::lifecycle::ServerLifecycle;
use crate::logs::ServerLogBuffer;
use crate::process::{ProcessSupervisor, ProcessTicket};
use crate::rcon::{CredentialSource, LivenessProbe, RconSessions, ServerConfigCredentials};
use plugin_system::{
    ArchiveSource, HttpArchiveSource, JsonFileManifestStore, ManifestStore, PluginDirs,
    PluginManager, PluginRegistry,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// External collaborators of an [`Orchestrator`].
pub struct OrchestratorParts {
    pub settings: SupervisorSettings,
    pub archive_source: Arc<dyn ArchiveSource>,
    pub fetcher: Arc<dyn PackageFetcher>,
    pub manifest_store: Arc<dyn ManifestStore>,
    pub configs: Arc<dyn ConfigStore>,
    /// Defaults to the port and password in `server.json`
    pub credentials: Option<Arc<dyn CredentialSource>>,
}

impl OrchestratorParts {
    /// The production collaborators for `settings`.
    pub fn from_settings(settings: SupervisorSettings) -> Self {
        let archive_source: Arc<dyn ArchiveSource> = Arc::new(HttpArchiveSource::new());
        Self {
            fetcher: Arc::new(SteamCmdFetcher::new(Arc::clone(&archive_source))),
            manifest_store: Arc::new(JsonFileManifestStore::new(&settings.plugin_manifest)),
            configs: Arc::new(DirConfigStore::new(&settings.config_dir)),
            credentials: None,
            archive_source,
            settings,
        }
    }
}

pub struct Orchestrator {
    lifecycle: ServerLifecycle,
    sessions: Arc<RconSessions>,
    plugins: Arc<Mutex<PluginManager>>,
    configs: Arc<dyn ConfigStore>,
}

impl Orchestrator {
    pub async fn from_settings(settings: SupervisorSettings) -> Result<Self> {
        Self::new(OrchestratorParts::from_settings(settings)).await
    }

    /// Loads the plugin manifests and assembles the supervisor.
    pub async fn new(parts: OrchestratorParts) -> Result<Self> {
        let OrchestratorParts {
            settings,
            archive_source,
            fetcher,
            manifest_store,
            configs,
            credentials,
        } = parts;

        let logs = Arc::new(ServerLogBuffer::new(settings.log_capacity));
        let process = Arc::new(ProcessSupervisor::new(logs));

        let credentials = credentials.unwrap_or_else(|| {
            Arc::new(ServerConfigCredentials::new(
                Arc::clone(&configs),
                settings.console.host.clone(),
            )) as Arc<dyn CredentialSource>
        });
        let probe: Arc<dyn LivenessProbe> = process.clone();
        let sessions = Arc::new(
            RconSessions::new(probe, credentials, settings.console.settle_delay)
                .with_io_timeout(settings.console.io_timeout),
        );

        let registry = PluginRegistry::load(manifest_store, settings.scripting_framework.clone()).await?;
        info!("Loaded {} plugin manifests", registry.len());
        let dirs = PluginDirs::new(settings.game_dir());
        let plugins = Arc::new(Mutex::new(PluginManager::new(registry, dirs, archive_source)));

        let lifecycle = ServerLifecycle::new(
            settings,
            process,
            fetcher,
            Arc::clone(&configs),
            Arc::clone(&sessions),
            Arc::clone(&plugins),
        );

        Ok(Self {
            lifecycle,
            sessions,
            plugins,
            configs,
        })
    }

    pub fn lifecycle(&self) -> &ServerLifecycle {
        &self.lifecycle
    }

    pub fn sessions(&self) -> &Arc<RconSessions> {
        &self.sessions
    }

    pub fn plugins(&self) -> &Arc<Mutex<PluginManager>> {
        &self.plugins
    }

    pub fn configs(&self) -> &Arc<dyn ConfigStore> {
        &self.configs
    }

    /// Full startup: install or update the server, bring plugins in line,
    /// then launch it.
    pub async fn bootstrap(&self) -> Result<ProcessTicket> {
        self.lifecycle.update_or_install().await?;
        let report = self.lifecycle.orchestrate_plugins().await?;
        info!(
            "Plugins ready ({} installed, {} reinstalled)",
            report.installed.len(),
            report.reinstalled.len()
        );
        self.lifecycle.start().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down");
        self.lifecycle.stop().await
    }
}
