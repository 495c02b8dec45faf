//! Persistence of the plugin manifest collection.

use crate::error::{PluginError, Result, ValidationReport};
use crate::manifest::PluginManifest;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Loads raw manifest records and saves validated ones.
///
/// Records come back untyped so the registry can report every schema
/// problem instead of stopping at the first.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    async fn load(&self) -> Result<Vec<Value>>;
    async fn save(&self, plugins: &[PluginManifest]) -> Result<()>;
}

// ============================================================================
// JSON File Store
// ============================================================================

/// Stores manifests as a pretty-printed JSON array.
pub struct JsonFileManifestStore {
    path: PathBuf,
}

impl JsonFileManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ManifestStore for JsonFileManifestStore {
    async fn load(&self) -> Result<Vec<Value>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Plugin manifest {} not found, starting with no plugins",
                    self.path.display()
                );
                return Ok(Vec::new());
            }
            Err(e) => return Err(PluginError::io(&self.path, e)),
        };

        match serde_json::from_slice::<Value>(&raw)? {
            Value::Array(records) => {
                debug!(
                    "Loaded {} plugin records from {}",
                    records.len(),
                    self.path.display()
                );
                Ok(records)
            }
            _ => {
                let mut report = ValidationReport::new();
                report.push(
                    self.path.display().to_string(),
                    "plugins",
                    "expected a JSON array of plugin records",
                );
                Err(PluginError::Validation(report))
            }
        }
    }

    async fn save(&self, plugins: &[PluginManifest]) -> Result<()> {
        let contents = serde_json::to_vec_pretty(plugins)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PluginError::io(parent, e))?;
        }

        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, contents)
            .await
            .map_err(|e| PluginError::io(&staging, e))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| PluginError::io(&self.path, e))?;

        debug!("Saved {} plugins to {}", plugins.len(), self.path.display());
        Ok(())
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryManifestStore {
    records: Mutex<Vec<Value>>,
    saves: AtomicUsize,
}

impl MemoryManifestStore {
    pub fn new(records: Vec<Value>) -> Self {
        Self {
            records: Mutex::new(records),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<Value> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ManifestStore for MemoryManifestStore {
    async fn load(&self) -> Result<Vec<Value>> {
        Ok(self.records())
    }

    async fn save(&self, plugins: &[PluginManifest]) -> Result<()> {
        let records = plugins
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if let Ok(mut stored) = self.records.lock() {
            *stored = records;
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
