//! Operations exposed to the server operator.
//!
//! Plugin edits are only accepted while the server is stopped; the current
//! status is passed down so the registry can enforce that.

use crate::config::{ServerConfig, ServerMap, SERVER_CONFIG_NAME};
use crate::config_store::write_json;
use crate::error::{Result, ServerError};
use crate::logs::ServerLog;
use crate::orchestrator::Orchestrator;
use crate::process::ProcessTicket;
use crate::rcon::{poll_status, StatusReport};
use plugin_system::{PluginManifest, PluginView, Transition};
use serde::Serialize;
use server_types::{ServerStatus, SessionId};
use std::sync::Arc;
use tracing::{info, warn};

/// Log lines included in the dashboard.
const DASHBOARD_LOG_LINES: usize = 200;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardData {
    pub status: ServerStatus,
    pub active_map: Option<String>,
    pub plugins: Vec<PluginView>,
    pub server_config: ServerConfig,
    pub server_logs: Vec<ServerLog>,
    pub configs: Vec<String>,
    pub connected_players: u32,
    pub local_address: Option<String>,
    pub public_address: Option<String>,
}

#[derive(Clone)]
pub struct OperatorApi {
    orchestrator: Arc<Orchestrator>,
}

impl OperatorApi {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn status(&self) -> ServerStatus {
        self.orchestrator.lifecycle().status()
    }

    // ========================================================================
    // Plugins
    // ========================================================================

    pub async fn plugins(&self) -> Vec<PluginView> {
        self.orchestrator.plugins().lock().await.views().await
    }

    /// Adds or replaces a manifest. Returns `true` when it was new.
    pub async fn upsert_plugin(&self, manifest: PluginManifest) -> Result<bool> {
        let status = self.status();
        let mut plugins = self.orchestrator.plugins().lock().await;
        Ok(plugins.registry_mut().upsert(manifest, status).await?)
    }

    pub async fn remove_plugin(&self, name: &str) -> Result<PluginManifest> {
        let status = self.status();
        let mut plugins = self.orchestrator.plugins().lock().await;
        Ok(plugins.registry_mut().remove(name, status).await?)
    }

    pub async fn set_plugin_enabled(&self, name: &str, enabled: bool) -> Result<Transition> {
        let status = self.status();
        let mut plugins = self.orchestrator.plugins().lock().await;
        Ok(plugins.set_enabled(name, enabled, status).await?)
    }

    // ========================================================================
    // Server Process
    // ========================================================================

    pub async fn start_server(&self) -> Result<ProcessTicket> {
        self.orchestrator.lifecycle().start().await
    }

    pub async fn stop_server(&self) -> Result<()> {
        self.orchestrator.lifecycle().stop().await
    }

    pub fn server_logs(&self, cursor: u64) -> Vec<ServerLog> {
        self.orchestrator.lifecycle().logs().since(cursor)
    }

    pub fn clear_server_logs(&self) {
        self.orchestrator.lifecycle().logs().clear();
    }

    // ========================================================================
    // Remote Console
    // ========================================================================

    pub async fn open_console(&self) -> Result<SessionId> {
        self.orchestrator.sessions().open().await
    }

    pub async fn execute_console(&self, id: SessionId, command: &str) -> Result<String> {
        self.orchestrator.sessions().execute(id, command).await
    }

    pub async fn close_console(&self, id: SessionId) -> Result<()> {
        self.orchestrator.sessions().close(id).await
    }

    // ========================================================================
    // Configs
    // ========================================================================

    pub async fn list_configs(&self) -> Result<Vec<String>> {
        self.orchestrator.configs().list().await
    }

    pub async fn read_config(&self, name: &str) -> Result<String> {
        self.orchestrator.configs().read(name).await
    }

    pub async fn write_config(&self, name: &str, contents: &str) -> Result<()> {
        self.orchestrator.configs().write(name, contents).await
    }

    pub async fn server_config(&self) -> Result<ServerConfig> {
        self.orchestrator.lifecycle().server_config().await
    }

    pub async fn save_server_config(&self, config: &ServerConfig) -> Result<()> {
        write_json(self.orchestrator.configs().as_ref(), SERVER_CONFIG_NAME, config).await
    }

    // ========================================================================
    // Maps
    // ========================================================================

    /// The map the running server reports, `None` when it is stopped.
    pub async fn active_map(&self) -> Result<Option<String>> {
        if !self.orchestrator.lifecycle().is_alive() {
            return Ok(None);
        }
        Ok(poll_status(self.orchestrator.sessions()).await?.active_map)
    }

    /// Makes `name` the startup map and, if the server runs, switches to it.
    pub async fn set_active_map(&self, name: &str) -> Result<()> {
        let mut config = self.server_config().await?;
        let position = config
            .maps
            .iter()
            .position(|map| map.name == name)
            .ok_or_else(|| ServerError::MapNotFound(name.to_string()))?;

        let map = config.maps.remove(position);
        let command = map.change_command();
        config.maps.insert(0, map);
        self.save_server_config(&config).await?;

        if self.orchestrator.lifecycle().is_alive() {
            self.orchestrator.sessions().run_once(&command).await?;
            info!("Changed map to {}", name);
        }
        Ok(())
    }

    /// Adds a workshop map to the rotation. Known workshop ids are left
    /// as they are.
    pub async fn add_workshop_map(&self, name: &str, workshop_id: &str) -> Result<ServerMap> {
        let mut config = self.server_config().await?;
        if let Some(existing) = config
            .maps
            .iter()
            .find(|map| map.workshop_id.as_deref() == Some(workshop_id))
        {
            return Ok(existing.clone());
        }

        let map = ServerMap::workshop(name, workshop_id);
        config.maps.push(map.clone());
        self.save_server_config(&config).await?;
        info!("Added workshop map {} ({})", name, workshop_id);
        Ok(map)
    }

    // ========================================================================
    // Dashboard
    // ========================================================================

    pub async fn dashboard(&self) -> Result<DashboardData> {
        let lifecycle = self.orchestrator.lifecycle();
        let status = lifecycle.status();

        let report = if status == ServerStatus::Running {
            match poll_status(self.orchestrator.sessions()).await {
                Ok(report) => report,
                Err(e) => {
                    warn!("Failed to query server status: {}", e);
                    StatusReport::default()
                }
            }
        } else {
            StatusReport::default()
        };

        Ok(DashboardData {
            status,
            active_map: report.active_map,
            plugins: self.plugins().await,
            server_config: self.server_config().await?,
            server_logs: lifecycle.logs().recent(DASHBOARD_LOG_LINES),
            configs: self.list_configs().await?,
            connected_players: report.connected_players,
            local_address: report.local_address,
            public_address: report.public_address,
        })
    }
}
