//! Symbolic directory roots and their resolution to absolute paths.
//!
//! Manifests refer to locations such as `@csgo/cfg` or `@pluginconfig`.
//! Every root is derived from the game install directory and, for the
//! per-plugin roots, from the plugin's name and kind.

use crate::error::{PluginError, Result};
use crate::manifest::{PluginKind, PluginManifest};
use std::path::{Path, PathBuf};

pub const ROOT_SENTINEL: char = '@';

/// Suffix appended to a plugin artifact to deactivate it.
pub const DISABLED_SUFFIX: &str = ".disabled";

/// Named directory roots usable in manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirRoot {
    Game,
    Csgo,
    Addons,
    Metamod,
    Cssharp,
    CssharpPlugins,
    CssharpConfigs,
    CssharpShared,
    Plugin,
    PluginConfig,
}

impl DirRoot {
    pub const ALL: [DirRoot; 10] = [
        DirRoot::Game,
        DirRoot::Csgo,
        DirRoot::Addons,
        DirRoot::Metamod,
        DirRoot::Cssharp,
        DirRoot::CssharpPlugins,
        DirRoot::CssharpConfigs,
        DirRoot::CssharpShared,
        DirRoot::Plugin,
        DirRoot::PluginConfig,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DirRoot::Game => "game",
            DirRoot::Csgo => "csgo",
            DirRoot::Addons => "addons",
            DirRoot::Metamod => "metamod",
            DirRoot::Cssharp => "cssharp",
            DirRoot::CssharpPlugins => "cssharpplugins",
            DirRoot::CssharpConfigs => "cssharpconfigs",
            DirRoot::CssharpShared => "cssharpshared",
            DirRoot::Plugin => "plugin",
            DirRoot::PluginConfig => "pluginconfig",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|root| root.name() == name)
    }
}

/// Splits `@root/rest` into `("root", "rest")`. Returns `None` for paths
/// without the sentinel.
pub fn split_root(dir: &str) -> Option<(&str, &str)> {
    let stripped = dir.strip_prefix(ROOT_SENTINEL)?;
    match stripped.find(['/', '\\']) {
        Some(index) => Some((&stripped[..index], &stripped[index + 1..])),
        None => Some((stripped, "")),
    }
}

pub fn normalize_slashes(path: &str) -> String {
    path.replace('\\', "/")
}

/// `path` with [`DISABLED_SUFFIX`] appended to its file name.
pub fn disabled_path(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(DISABLED_SUFFIX);
    PathBuf::from(raw)
}

// ============================================================================
// Plugin Directories
// ============================================================================

/// Directory layout of a game install.
#[derive(Debug, Clone)]
pub struct PluginDirs {
    game: PathBuf,
}

impl PluginDirs {
    /// `game_dir` is the `game` directory inside the server install.
    pub fn new(game_dir: impl Into<PathBuf>) -> Self {
        Self {
            game: game_dir.into(),
        }
    }

    pub fn game(&self) -> &Path {
        &self.game
    }

    pub fn csgo(&self) -> PathBuf {
        self.game.join("csgo")
    }

    pub fn addons(&self) -> PathBuf {
        self.csgo().join("addons")
    }

    pub fn metamod(&self) -> PathBuf {
        self.addons().join("metamod")
    }

    pub fn cssharp(&self) -> PathBuf {
        self.addons().join("counterstrikesharp")
    }

    pub fn cssharp_plugins(&self) -> PathBuf {
        self.cssharp().join("plugins")
    }

    pub fn cssharp_configs(&self) -> PathBuf {
        self.cssharp().join("configs")
    }

    pub fn cssharp_shared(&self) -> PathBuf {
        self.cssharp().join("shared")
    }

    /// Engine search-path file patched when the loader is bootstrapped.
    pub fn gameinfo(&self) -> PathBuf {
        self.csgo().join("gameinfo.gi")
    }

    /// Where a plugin's files live once installed. `None` for config-only
    /// plugins, which have no directory of their own.
    pub fn plugin_dir(&self, plugin: &PluginManifest) -> Option<PathBuf> {
        match plugin.kind {
            PluginKind::Loader => Some(self.addons().join(&plugin.name)),
            PluginKind::ScriptedPlugin if plugin.is_shared_library => {
                Some(self.cssharp_shared().join(&plugin.name))
            }
            PluginKind::ScriptedPlugin => Some(self.cssharp_plugins().join(&plugin.name)),
            PluginKind::ConfigOnly => None,
        }
    }

    pub fn plugin_config_dir(&self, plugin: &PluginManifest) -> Option<PathBuf> {
        match plugin.kind {
            PluginKind::Loader => Some(self.metamod().join(format!("{}.vdf", plugin.name))),
            PluginKind::ScriptedPlugin => {
                Some(self.cssharp_configs().join("plugins").join(&plugin.name))
            }
            PluginKind::ConfigOnly => None,
        }
    }

    /// The file whose presence (or `.disabled` twin) marks a plugin active.
    pub fn primary_artifact(&self, plugin: &PluginManifest) -> Option<PathBuf> {
        match plugin.kind {
            PluginKind::Loader => Some(self.metamod().join(format!("{}.vdf", plugin.name))),
            PluginKind::ScriptedPlugin => self
                .plugin_dir(plugin)
                .map(|dir| dir.join(format!("{}.dll", plugin.name))),
            PluginKind::ConfigOnly => None,
        }
    }

    pub fn root(&self, root: DirRoot, plugin: &PluginManifest) -> Result<PathBuf> {
        let path = match root {
            DirRoot::Game => Some(self.game.clone()),
            DirRoot::Csgo => Some(self.csgo()),
            DirRoot::Addons => Some(self.addons()),
            DirRoot::Metamod => Some(self.metamod()),
            DirRoot::Cssharp => Some(self.cssharp()),
            DirRoot::CssharpPlugins => Some(self.cssharp_plugins()),
            DirRoot::CssharpConfigs => Some(self.cssharp_configs()),
            DirRoot::CssharpShared => Some(self.cssharp_shared()),
            DirRoot::Plugin => self.plugin_dir(plugin),
            DirRoot::PluginConfig => self.plugin_config_dir(plugin),
        };
        path.ok_or_else(|| {
            PluginError::UnknownRoot(format!(
                "{} (not available for {} plugins)",
                root.name(),
                plugin.kind.as_str()
            ))
        })
    }

    /// Resolves a symbolic or plain directory reference for `plugin`.
    ///
    /// Backslashes are treated as separators. Non-symbolic relative paths
    /// are made absolute against the current working directory.
    pub fn resolve(&self, plugin: &PluginManifest, dir: &str) -> Result<PathBuf> {
        let normalized = normalize_slashes(dir);

        if let Some((root_name, rest)) = split_root(&normalized) {
            let root = DirRoot::from_name(root_name)
                .ok_or_else(|| PluginError::UnknownRoot(root_name.to_string()))?;
            let base = self.root(root, plugin)?;
            let rest = rest.trim_matches('/');
            return Ok(if rest.is_empty() { base } else { base.join(rest) });
        }

        let path = PathBuf::from(&normalized);
        if path.is_absolute() {
            return Ok(path);
        }
        let cwd = std::env::current_dir().map_err(|e| PluginError::io(".", e))?;
        Ok(cwd.join(path))
    }
}
