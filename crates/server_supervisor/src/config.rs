//! Supervisor settings and the operator-editable server configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the server configuration inside the config store.
pub const SERVER_CONFIG_NAME: &str = "server.json";

/// Steam app id of the Counter-Strike 2 dedicated server.
pub const CS2_APP_ID: u32 = 730;

// ============================================================================
// Server Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapKind {
    Valve,
    Workshop,
}

/// A map the operator can switch to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMap {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MapKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workshop_id: Option<String>,
    #[serde(default)]
    pub image: String,
}

impl ServerMap {
    pub fn valve(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MapKind::Valve,
            workshop_id: None,
            image: String::new(),
        }
    }

    pub fn workshop(name: impl Into<String>, workshop_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MapKind::Workshop,
            workshop_id: Some(workshop_id.into()),
            image: String::new(),
        }
    }

    /// Console command that loads this map on a running server.
    pub fn change_command(&self) -> String {
        match (&self.kind, &self.workshop_id) {
            (MapKind::Workshop, Some(id)) => format!("host_workshop_map {id}"),
            _ => format!("changelevel {}", self.name),
        }
    }

    /// Launch arguments that load this map at startup.
    pub fn launch_args(&self) -> [String; 2] {
        match (&self.kind, &self.workshop_id) {
            (MapKind::Workshop, Some(id)) => ["+host_workshop_map".to_string(), id.clone()],
            _ => ["+map".to_string(), self.name.clone()],
        }
    }
}

/// Game server settings, stored as `server.json` in the config store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub steam_gslt_token: String,
    pub server_name: String,
    pub server_ip: String,
    pub server_port: u16,
    pub server_lan_only: bool,
    pub server_cheats_enabled: bool,
    pub server_rcon_password: String,
    pub server_max_players: u32,
    pub maps: Vec<ServerMap>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            steam_gslt_token: String::new(),
            server_name: "kzhost".to_string(),
            server_ip: String::new(),
            server_port: 27015,
            server_lan_only: false,
            server_cheats_enabled: false,
            server_rcon_password: String::new(),
            server_max_players: 64,
            maps: vec![ServerMap::valve("de_dust2")],
        }
    }
}

impl ServerConfig {
    pub fn find_map(&self, name: &str) -> Option<&ServerMap> {
        self.maps.iter().find(|map| map.name == name)
    }

    /// Command-line arguments for the dedicated server.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-dedicated",
            "-console",
            "-noshaderapi",
            "-usercon",
            "-toconsole",
            "-nohltv",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();

        args.push("-maxplayers_override".to_string());
        args.push(self.server_max_players.to_string());

        if !self.server_ip.is_empty() {
            args.push("-ip".to_string());
            args.push(self.server_ip.clone());
        }

        let flag = |enabled: bool| if enabled { "1" } else { "0" }.to_string();
        args.extend([
            "+sv_lan".to_string(),
            flag(self.server_lan_only),
            "+sv_cheats".to_string(),
            flag(self.server_cheats_enabled),
            "+hostport".to_string(),
            self.server_port.to_string(),
        ]);

        if !self.server_name.is_empty() {
            args.push("+hostname".to_string());
            args.push(self.server_name.clone());
        }
        if !self.steam_gslt_token.is_empty() {
            args.push("+sv_setsteamaccount".to_string());
            args.push(self.steam_gslt_token.clone());
        }
        if !self.server_rcon_password.is_empty() {
            args.push("+rcon_password".to_string());
            args.push(self.server_rcon_password.clone());
        }

        if let Some(map) = self.maps.first() {
            args.extend(map.launch_args());
        }

        args
    }
}

// ============================================================================
// Supervisor Settings
// ============================================================================

/// Remote-console connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleSettings {
    /// Host the server's console listens on; the port comes from `server.json`
    pub host: String,
    /// Pause between closing a session's socket and forgetting it
    pub settle_delay: Duration,
    /// Bound on every connect, read and write of a console connection
    pub io_timeout: Duration,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            settle_delay: Duration::from_millis(250),
            io_timeout: Duration::from_secs(10),
        }
    }
}

/// Everything the supervisor needs to know about where things live.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Install directory of the dedicated server (`force_install_dir`)
    pub server_dir: PathBuf,
    pub steamcmd_dir: PathBuf,
    pub steamcmd_url: String,
    /// Config blob store directory, holding `server.json`
    pub config_dir: PathBuf,
    pub plugin_manifest: PathBuf,
    /// Loader framework archive; bootstrapping is skipped when unset
    pub loader_url: Option<String>,
    /// Plugin every scripted plugin depends on
    pub scripting_framework: String,
    pub app_id: u32,
    /// Server executable, relative to `server_dir`
    pub executable: PathBuf,
    /// Rewrite the executable's PE subsystem to console after updates
    pub patch_console_subsystem: bool,
    /// Directories wiped before a fresh install
    pub clean_on_install: Vec<PathBuf>,
    pub log_capacity: usize,
    pub console: ConsoleSettings,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            server_dir: PathBuf::from("cs2"),
            steamcmd_dir: PathBuf::from("steamcmd"),
            steamcmd_url: default_steamcmd_url().to_string(),
            config_dir: PathBuf::from("config"),
            plugin_manifest: PathBuf::from("plugins.json"),
            loader_url: None,
            scripting_framework: plugin_system::DEFAULT_SCRIPTING_FRAMEWORK.to_string(),
            app_id: CS2_APP_ID,
            executable: default_executable(),
            patch_console_subsystem: cfg!(windows),
            clean_on_install: Vec::new(),
            log_capacity: 1000,
            console: ConsoleSettings::default(),
        }
    }
}

impl SupervisorSettings {
    /// The `game` directory inside the install.
    pub fn game_dir(&self) -> PathBuf {
        self.server_dir.join("game")
    }

    pub fn executable_path(&self) -> PathBuf {
        self.server_dir.join(&self.executable)
    }

    /// Makes every relative path absolute against `base`.
    pub fn absolutize(mut self, base: &Path) -> Self {
        let fix = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        fix(&mut self.server_dir);
        fix(&mut self.steamcmd_dir);
        fix(&mut self.config_dir);
        fix(&mut self.plugin_manifest);
        for dir in &mut self.clean_on_install {
            fix(dir);
        }
        self
    }
}

pub fn default_executable() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("game/bin/win64/cs2.exe")
    } else {
        PathBuf::from("game/bin/linuxsteamrt64/cs2")
    }
}

pub fn default_steamcmd_url() -> &'static str {
    if cfg!(windows) {
        "https://steamcdn-a.akamaihd.net/client/installer/steamcmd.zip"
    } else {
        "https://steamcdn-a.akamaihd.net/client/installer/steamcmd_linux.tar.gz"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_reads_partial_json() {
        let config: ServerConfig =
            serde_json::from_str(r#"{ "serverPort": 27020, "serverLanOnly": true }"#).unwrap();
        assert_eq!(config.server_port, 27020);
        assert!(config.server_lan_only);
        assert_eq!(config.server_max_players, 64);
    }

    #[test]
    fn test_launch_args() {
        let config = ServerConfig {
            steam_gslt_token: "TOKEN".to_string(),
            server_rcon_password: "secret".to_string(),
            maps: vec![ServerMap::workshop("kz_grotto", "3121168339")],
            ..Default::default()
        };
        let args = config.launch_args();

        assert_eq!(args[0], "-dedicated");
        let joined = args.join(" ");
        assert!(joined.contains("-maxplayers_override 64"));
        assert!(joined.contains("+sv_lan 0"));
        assert!(joined.contains("+hostport 27015"));
        assert!(joined.contains("+sv_setsteamaccount TOKEN"));
        assert!(joined.contains("+rcon_password secret"));
        assert!(joined.ends_with("+host_workshop_map 3121168339"));
        assert!(!joined.contains("-ip"));
    }

    #[test]
    fn test_map_change_command() {
        assert_eq!(
            ServerMap::valve("de_inferno").change_command(),
            "changelevel de_inferno"
        );
        assert_eq!(
            ServerMap::workshop("kz_grotto", "123").change_command(),
            "host_workshop_map 123"
        );
    }

    #[test]
    fn test_absolutize_only_touches_relative_paths() {
        let settings = SupervisorSettings {
            server_dir: PathBuf::from("/srv/cs2"),
            ..Default::default()
        }
        .absolutize(Path::new("/opt/kzhost"));

        assert_eq!(settings.server_dir, PathBuf::from("/srv/cs2"));
        assert_eq!(settings.config_dir, PathBuf::from("/opt/kzhost/config"));
        assert_eq!(settings.game_dir(), PathBuf::from("/srv/cs2/game"));
    }
}
