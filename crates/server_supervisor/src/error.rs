//! Error types for the server supervisor.

use plugin_system::PluginError;
use server_types::SessionId;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Guarded lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Install,
    Update,
    PluginOrchestration,
    Start,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Install => "install",
            Operation::Update => "update",
            Operation::PluginOrchestration => "plugin orchestration",
            Operation::Start => "start",
        };
        f.write_str(name)
    }
}

/// Remote-console protocol and transport failures.
#[derive(Debug, Error)]
pub enum RconError {
    #[error("RCON I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RCON authentication rejected")]
    AuthenticationFailed,

    #[error("RCON protocol error: {0}")]
    Protocol(String),

    #[error("RCON connection closed by server")]
    Closed,

    #[error("RCON server did not answer within {0:?}")]
    Timeout(Duration),
}

/// Server supervisor errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Another {0} is already in progress")]
    OperationInProgress(Operation),

    #[error("Server executable not found at {}", .0.display())]
    ExecutableMissing(PathBuf),

    #[error("The server directory {} exists but contains no server executable; remove it or point the server directory elsewhere", .0.display())]
    DirtyInstallDirectory(PathBuf),

    #[error("Server is not running")]
    ServerNotRunning,

    #[error("Unknown RCON session: {0}")]
    UnknownSession(SessionId),

    #[error("RCON session {0} was closed while a command was running")]
    SessionClosed(SessionId),

    #[error("RCON transport error: {0}")]
    RconTransport(#[from] RconError),

    #[error("Failed to spawn {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid executable {}: {reason}", path.display())]
    InvalidExecutable { path: PathBuf, reason: String },

    #[error("Config not found: {0}")]
    ConfigNotFound(String),

    #[error("Invalid config name: {0}")]
    InvalidConfigName(String),

    #[error("Map not found: {0}")]
    MapNotFound(String),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ServerError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
