//! Supervision of a Counter-Strike 2 dedicated server
//!
//! Installs and updates the server through SteamCMD, keeps its plugins in
//! line with their manifests, runs the server process and offers a remote
//! console. [`Orchestrator`] owns all of it; [`OperatorApi`] is the surface
//! an operator drives.

pub mod config;
pub mod config_store;
pub mod error;
pub mod exe;
pub mod fetcher;
pub mod lifecycle;
pub mod logs;
pub mod operator;
pub mod orchestrator;
pub mod process;
pub mod rcon;

pub use config::{
    ConsoleSettings, MapKind, ServerConfig, ServerMap, SupervisorSettings, CS2_APP_ID,
    SERVER_CONFIG_NAME,
};
pub use config_store::{ConfigStore, DirConfigStore};
pub use error::{Operation, RconError, Result, ServerError};
pub use fetcher::{FetchedPackage, PackageFetcher, SteamCmdFetcher};
pub use lifecycle::ServerLifecycle;
pub use logs::{LogKind, ServerLog, ServerLogBuffer};
pub use operator::{DashboardData, OperatorApi};
pub use orchestrator::{Orchestrator, OrchestratorParts};
pub use process::{ProcessSupervisor, ProcessTicket};
pub use rcon::{RconSessions, StatusReport};
pub use server_types::{ServerStatus, SessionId};
