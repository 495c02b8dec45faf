//! Core types shared by the kzhost crates
//!
//! Holds the identifiers and status values that both the plugin system and
//! the server supervisor need to agree on, so neither has to depend on the
//! other for them.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Server Status
// ============================================================================

/// Observable state of the supervised game server.
///
/// This is always computed from in-progress flags and process liveness; it
/// is never stored as a field that could drift from reality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerStatus {
    Installing,
    Updating,
    Starting,
    UpdatingPlugins,
    Running,
    Stopped,
}

impl ServerStatus {
    /// Plugin files may only be touched by operators in this state.
    pub fn is_stopped(self) -> bool {
        self == ServerStatus::Stopped
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServerStatus::Installing => "INSTALLING",
            ServerStatus::Updating => "UPDATING",
            ServerStatus::Starting => "STARTING",
            ServerStatus::UpdatingPlugins => "UPDATING_PLUGINS",
            ServerStatus::Running => "RUNNING",
            ServerStatus::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Core Identifiers
// ============================================================================

/// Opaque identifier of a remote-console session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Milliseconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
