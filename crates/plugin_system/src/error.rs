//! Error types for plugin registry, installation and activation.

use server_types::ServerStatus;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A single problem found while validating plugin manifests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Plugin name, or `#<index>` when the record has no usable name
    pub plugin: String,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.plugin, self.field, self.message)
    }
}

/// Every issue found in one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        plugin: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.issues.push(ValidationIssue {
            plugin: plugin.into(),
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn extend(&mut self, other: ValidationReport) {
        self.issues.extend(other.issues);
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// Whether any issue concerns `field` of `plugin`.
    pub fn mentions(&self, plugin: &str, field: &str) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.plugin == plugin && issue.field == field)
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(PluginError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.issues.iter().map(ToString::to_string).collect();
        write!(f, "{}", rendered.join("; "))
    }
}

/// Plugin system errors
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Invalid plugin manifest: {0}")]
    Validation(ValidationReport),

    #[error("Cannot {operation} while the server is {status}; stop the server first")]
    PreconditionFailed {
        operation: &'static str,
        status: ServerStatus,
    },

    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Plugin already exists: {0}")]
    AlreadyExists(String),

    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("Invalid archive from {url}: {reason}")]
    Archive { url: String, reason: String },

    #[error("{plugin} installation failed: {} was not found after extraction", path.display())]
    InstallationFailed { plugin: String, path: PathBuf },

    #[error("Plugin {plugin} is not installed: {} not found", path.display())]
    NotInstalled { plugin: String, path: PathBuf },

    #[error(
        "Plugin {plugin} is enabled but its dependencies are not met. Please enable [{}] to use {plugin}",
        missing.join(", ")
    )]
    DependencyUnmet { plugin: String, missing: Vec<String> },

    #[error("Unknown directory root '@{0}'")]
    UnknownRoot(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PluginError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PluginError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;
