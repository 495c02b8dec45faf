//! Plugin manifest records and per-record validation.

use crate::error::ValidationReport;
use crate::paths::DirRoot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Extraction root used when a manifest does not name one.
pub const DEFAULT_TARGET_EXTRACT_DIR: &str = "@csgo";

// ============================================================================
// Manifest Types
// ============================================================================

/// How a plugin is laid out on disk and toggled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginKind {
    /// Native add-on hosted by the server's loader framework (metamod)
    #[serde(rename = "loader", alias = "metamod")]
    Loader,
    /// Managed plugin hosted by the scripting framework (counterstrikesharp)
    #[serde(rename = "scripted-plugin", alias = "counterstrikesharp")]
    ScriptedPlugin,
    /// No artifact, only configuration files
    #[serde(rename = "config-only", alias = "configonly")]
    ConfigOnly,
}

impl PluginKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PluginKind::Loader => "loader",
            PluginKind::ScriptedPlugin => "scripted-plugin",
            PluginKind::ConfigOnly => "config-only",
        }
    }

    /// Whether plugins of this kind ship a downloadable archive.
    pub fn has_archive(self) -> bool {
        !matches!(self, PluginKind::ConfigOnly)
    }

    fn from_wire(value: &str) -> Option<Self> {
        match value {
            "loader" | "metamod" => Some(PluginKind::Loader),
            "scripted-plugin" | "counterstrikesharp" => Some(PluginKind::ScriptedPlugin),
            "config-only" | "configonly" => Some(PluginKind::ConfigOnly),
            _ => None,
        }
    }
}

/// A configuration file to materialize for a plugin.
///
/// `config` is either a string (a path to an existing file to copy, or
/// literal file contents) or any other JSON value, which is written out
/// pretty-printed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub target: String,
    pub config: Value,
}

/// Declarative description of one server mod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "type")]
    pub kind: PluginKind,
    #[serde(default)]
    pub download_url: String,
    #[serde(default = "default_target_extract_dir", alias = "targetExtractPath")]
    pub target_extract_dir: String,
    #[serde(
        default,
        alias = "dirInZipToExtract",
        skip_serializing_if = "Option::is_none"
    )]
    pub archive_subpath: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, alias = "isCounterStrikeSharpSharedPlugin")]
    pub is_shared_library: bool,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub configs: Vec<PluginConfig>,
}

fn default_target_extract_dir() -> String {
    DEFAULT_TARGET_EXTRACT_DIR.to_string()
}

fn default_enabled() -> bool {
    true
}

impl PluginManifest {
    /// Manifest with defaults for everything but the identity fields.
    pub fn new(name: impl Into<String>, kind: PluginKind) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            description: String::new(),
            kind,
            download_url: String::new(),
            target_extract_dir: default_target_extract_dir(),
            archive_subpath: None,
            enabled: true,
            is_shared_library: false,
            dependencies: BTreeSet::new(),
            configs: Vec::new(),
        }
    }

    pub fn with_download_url(mut self, url: impl Into<String>) -> Self {
        self.download_url = url.into();
        self
    }

    pub fn with_archive_subpath(mut self, subpath: impl Into<String>) -> Self {
        self.archive_subpath = Some(subpath.into());
        self
    }

    pub fn with_target_extract_dir(mut self, dir: impl Into<String>) -> Self {
        self.target_extract_dir = dir.into();
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.insert(name.into());
        self
    }

    pub fn with_config(mut self, target: impl Into<String>, config: Value) -> Self {
        self.configs.push(PluginConfig {
            target: target.into(),
            config,
        });
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn shared_library(mut self) -> Self {
        self.is_shared_library = true;
        self
    }

    /// Checks the invariants of a single typed record.
    pub fn validate(&self, report: &mut ValidationReport) {
        let label = if self.name.trim().is_empty() {
            "<unnamed>"
        } else {
            self.name.as_str()
        };

        if self.name.trim().is_empty() {
            report.push(label, "name", "must not be empty");
        } else if self.name.contains(['/', '\\']) || self.name == "." || self.name == ".." {
            report.push(label, "name", "must not contain path separators");
        }
        if self.display_name.trim().is_empty() {
            report.push(label, "displayName", "must not be empty");
        }
        if self.kind.has_archive() && self.download_url.trim().is_empty() {
            report.push(
                label,
                "downloadUrl",
                format!("is required for {} plugins", self.kind.as_str()),
            );
        }
        if !is_valid_dir_reference(&self.target_extract_dir) {
            report.push(
                label,
                "targetExtractDir",
                format!("unknown directory root in '{}'", self.target_extract_dir),
            );
        }
        if self.dependencies.contains(&self.name) {
            report.push(label, "dependencies", "a plugin cannot depend on itself");
        }
        for (index, config) in self.configs.iter().enumerate() {
            if config.target.trim().is_empty() {
                report.push(label, format!("configs[{index}].target"), "must not be empty");
            } else if !is_valid_dir_reference(&config.target) {
                report.push(
                    label,
                    format!("configs[{index}].target"),
                    format!("unknown directory root in '{}'", config.target),
                );
            }
        }
    }
}

fn is_valid_dir_reference(dir: &str) -> bool {
    match crate::paths::split_root(dir) {
        Some((root, _)) => DirRoot::from_name(root).is_some(),
        None => true,
    }
}

// ============================================================================
// Raw Record Checks
// ============================================================================

/// Checks the JSON shape of one stored record field by field.
///
/// Serde stops at the first problem; this walks every known field so an
/// operator sees all of them at once.
pub fn schema_issues(index: usize, record: &Value, report: &mut ValidationReport) {
    let Some(object) = record.as_object() else {
        report.push(format!("#{index}"), "record", "must be a JSON object");
        return;
    };

    let label = object
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{index}"));

    for field in ["name", "displayName"] {
        match object.get(field) {
            Some(Value::String(_)) => {}
            Some(_) => report.push(&label, field, "must be a string"),
            None => report.push(&label, field, "is required"),
        }
    }

    match object.get("kind").or_else(|| object.get("type")) {
        Some(Value::String(kind)) if PluginKind::from_wire(kind).is_some() => {}
        Some(Value::String(kind)) => report.push(
            &label,
            "kind",
            format!("unknown plugin kind '{kind}' (expected loader, scripted-plugin or config-only)"),
        ),
        Some(_) => report.push(&label, "kind", "must be a string"),
        None => report.push(&label, "kind", "is required"),
    }

    for field in [
        "description",
        "downloadUrl",
        "targetExtractDir",
        "targetExtractPath",
        "dirInZipToExtract",
        "archiveSubpath",
    ] {
        if let Some(value) = object.get(field) {
            let nullable = matches!(field, "dirInZipToExtract" | "archiveSubpath");
            if !(value.is_string() || (nullable && value.is_null())) {
                report.push(&label, field, "must be a string");
            }
        }
    }

    for field in ["enabled", "isSharedLibrary", "isCounterStrikeSharpSharedPlugin"] {
        if let Some(value) = object.get(field) {
            if !value.is_boolean() {
                report.push(&label, field, "must be a boolean");
            }
        }
    }

    if let Some(value) = object.get("dependencies") {
        match value.as_array() {
            Some(items) if items.iter().all(Value::is_string) => {}
            _ => report.push(&label, "dependencies", "must be an array of plugin names"),
        }
    }

    if let Some(value) = object.get("configs") {
        match value.as_array() {
            Some(items) => {
                for (config_index, item) in items.iter().enumerate() {
                    let target_ok = item.get("target").map(Value::is_string).unwrap_or(false);
                    if !target_ok {
                        report.push(
                            &label,
                            format!("configs[{config_index}].target"),
                            "must be a string",
                        );
                    }
                    if item.get("config").is_none() {
                        report.push(
                            &label,
                            format!("configs[{config_index}].config"),
                            "is required",
                        );
                    }
                }
            }
            None => report.push(&label, "configs", "must be an array"),
        }
    }
}
