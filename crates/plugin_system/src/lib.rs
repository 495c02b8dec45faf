//! Plugin management for a Counter-Strike 2 dedicated server
//!
//! Mods are described by JSON manifests. This crate validates them,
//! orders them by dependency, installs their archives into the game tree,
//! writes their configuration files and switches them on or off by
//! renaming their primary artifact.

pub mod activation;
pub mod archive;
pub mod error;
pub mod installer;
pub mod manager;
pub mod manifest;
pub mod paths;
pub mod registry;
pub mod source;
pub mod state;
pub mod store;

pub use activation::{ActivationController, Transition};
pub use archive::{Archive, ArchiveEntry, ExtractSummary};
pub use error::{PluginError, Result, ValidationIssue, ValidationReport};
pub use installer::{InstallOutcome, InstallReceipt, InstallationEngine, LOADER_FRAMEWORK_NAME};
pub use manager::{PluginManager, PluginView, SyncReport};
pub use manifest::{PluginConfig, PluginKind, PluginManifest};
pub use paths::{DirRoot, PluginDirs};
pub use registry::{order_by_dependencies, PluginRegistry, DEFAULT_SCRIPTING_FRAMEWORK};
pub use source::{ArchiveSource, HttpArchiveSource, MemoryArchiveSource};
pub use state::InstallationState;
pub use store::{JsonFileManifestStore, ManifestStore, MemoryManifestStore};
