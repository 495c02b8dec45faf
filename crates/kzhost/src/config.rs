//! Configuration file of the kzhost supervisor.
//!
//! Loaded from TOML; a file with the defaults is written on first run.
//! Relative paths are resolved against the directory holding the file.

use serde::{Deserialize, Serialize};
use server_supervisor::config::{default_executable, default_steamcmd_url};
use server_supervisor::{ConsoleSettings, SupervisorSettings, CS2_APP_ID};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathSettings,
    pub downloads: DownloadSettings,
    pub server: ServerSettings,
    pub plugins: PluginSettings,
    pub console: ConsoleConfig,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Dedicated server install directory
    pub server_dir: String,
    pub steamcmd_dir: String,
    /// Holds `server.json` and other operator-editable files
    pub config_dir: String,
    /// JSON array of plugin manifests
    pub plugin_manifest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub steamcmd_url: String,
    /// Metamod:Source archive; leave unset to manage it as a plugin
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loader_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub app_id: u32,
    /// Server executable, relative to the server directory
    pub executable: String,
    pub patch_console_subsystem: bool,
    /// Server output lines kept in memory
    pub log_capacity: usize,
    /// Directories removed before a fresh install
    pub clean_on_install: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    /// Plugin every scripted plugin implicitly depends on
    pub scripting_framework: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub host: String,
    pub settle_delay_ms: u64,
    pub io_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    pub json_format: bool,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            server_dir: "cs2".to_string(),
            steamcmd_dir: "steamcmd".to_string(),
            config_dir: "config".to_string(),
            plugin_manifest: "plugins.json".to_string(),
        }
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            steamcmd_url: default_steamcmd_url().to_string(),
            loader_url: None,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            app_id: CS2_APP_ID,
            executable: default_executable().to_string_lossy().into_owned(),
            patch_console_subsystem: cfg!(windows),
            log_capacity: 1000,
            clean_on_install: Vec::new(),
        }
    }
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            scripting_framework: plugin_system::DEFAULT_SCRIPTING_FRAMEWORK.to_string(),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        let defaults = ConsoleSettings::default();
        Self {
            host: defaults.host,
            settle_delay_ms: defaults.settle_delay.as_millis() as u64,
            io_timeout_ms: defaults.io_timeout.as_millis() as u64,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads the configuration, creating a default file if there is none.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let required = [
            ("paths.server_dir", &self.paths.server_dir),
            ("paths.steamcmd_dir", &self.paths.steamcmd_dir),
            ("paths.config_dir", &self.paths.config_dir),
            ("paths.plugin_manifest", &self.paths.plugin_manifest),
            ("downloads.steamcmd_url", &self.downloads.steamcmd_url),
            ("server.executable", &self.server.executable),
            ("plugins.scripting_framework", &self.plugins.scripting_framework),
            ("console.host", &self.console.host),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(format!("{key} cannot be empty"));
            }
        }

        if matches!(&self.downloads.loader_url, Some(url) if url.trim().is_empty()) {
            return Err("downloads.loader_url cannot be empty; remove it instead".to_string());
        }

        if Path::new(&self.server.executable).is_absolute() {
            return Err("server.executable must be relative to paths.server_dir".to_string());
        }

        if self.console.io_timeout_ms == 0 {
            return Err("console.io_timeout_ms must be at least 1".to_string());
        }

        if self.server.log_capacity == 0 {
            return Err("server.log_capacity must be at least 1".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }

    /// Supervisor settings with relative paths resolved against `base`.
    pub fn to_supervisor_settings(&self, base: &Path) -> SupervisorSettings {
        SupervisorSettings {
            server_dir: PathBuf::from(&self.paths.server_dir),
            steamcmd_dir: PathBuf::from(&self.paths.steamcmd_dir),
            steamcmd_url: self.downloads.steamcmd_url.clone(),
            config_dir: PathBuf::from(&self.paths.config_dir),
            plugin_manifest: PathBuf::from(&self.paths.plugin_manifest),
            loader_url: self.downloads.loader_url.clone(),
            scripting_framework: self.plugins.scripting_framework.clone(),
            app_id: self.server.app_id,
            executable: PathBuf::from(&self.server.executable),
            patch_console_subsystem: self.server.patch_console_subsystem,
            clean_on_install: self.server.clean_on_install.iter().map(PathBuf::from).collect(),
            log_capacity: self.server.log_capacity,
            console: ConsoleSettings {
                host: self.console.host.clone(),
                settle_delay: Duration::from_millis(self.console.settle_delay_ms),
                io_timeout: Duration::from_millis(self.console.io_timeout_ms),
            },
        }
        .absolutize(base)
    }
}
