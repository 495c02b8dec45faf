//! The validated collection of plugin manifests.
//!
//! The registry owns the manifests, keeps names unique, injects the
//! scripting framework as an implicit dependency of every scripted plugin
//! and yields plugins in dependency order.

use crate::error::{PluginError, Result, ValidationReport};
use crate::manifest::{schema_issues, PluginKind, PluginManifest};
use crate::store::ManifestStore;
use server_types::ServerStatus;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Plugin every scripted plugin implicitly depends on.
pub const DEFAULT_SCRIPTING_FRAMEWORK: &str = "counterstrikesharp";

/// Ordered, validated plugin manifests backed by a [`ManifestStore`].
///
/// Every mutation validates the whole candidate collection and saves it
/// before it replaces the in-memory copy, so the store and the registry
/// never disagree.
pub struct PluginRegistry {
    plugins: Vec<PluginManifest>,
    framework: String,
    store: Arc<dyn ManifestStore>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugins)
            .field("framework", &self.framework)
            .finish()
    }
}

impl PluginRegistry {
    /// Loads and validates every record from `store`.
    ///
    /// # Arguments
    ///
    /// * `store` - Where the manifest collection lives; mutations save back to it
    /// * `framework` - Name of the plugin every scripted plugin depends on
    ///
    /// # Errors
    ///
    /// * `Validation` listing every offending field across all records
    /// * `Io` or `Serialization` if the collection cannot be read
    pub async fn load(store: Arc<dyn ManifestStore>, framework: impl Into<String>) -> Result<Self> {
        let records = store.load().await?;

        let mut report = ValidationReport::new();
        for (index, record) in records.iter().enumerate() {
            schema_issues(index, record, &mut report);
        }
        report.into_result()?;

        let manifests = records
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<PluginManifest>, _>>()?;

        let registry = Self::from_manifests(manifests, framework, store)?;
        info!("Loaded {} plugin manifests", registry.len());
        Ok(registry)
    }

    /// Builds a registry from typed manifests, validating them as a whole.
    pub fn from_manifests(
        mut manifests: Vec<PluginManifest>,
        framework: impl Into<String>,
        store: Arc<dyn ManifestStore>,
    ) -> Result<Self> {
        let framework = framework.into();
        validate_collection(&manifests).into_result()?;
        for manifest in &mut manifests {
            augment(manifest, &framework);
        }

        Ok(Self {
            plugins: manifests,
            framework,
            store,
        })
    }

    /// Name of the implicit scripting-framework dependency.
    pub fn framework(&self) -> &str {
        &self.framework
    }

    /// Manifests in stored order.
    pub fn plugins(&self) -> &[PluginManifest] {
        &self.plugins
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&PluginManifest> {
        self.plugins.iter().find(|plugin| plugin.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PluginManifest> {
        self.plugins.iter_mut().find(|plugin| plugin.name == name)
    }

    /// Plugins in an order where every resolvable dependency precedes its
    /// dependents.
    pub fn ordered(&self) -> Result<Vec<&PluginManifest>> {
        order_by_dependencies(&self.plugins)
    }

    /// Names of [`PluginRegistry::ordered`].
    pub fn ordered_names(&self) -> Result<Vec<String>> {
        Ok(self
            .ordered()?
            .into_iter()
            .map(|plugin| plugin.name.clone())
            .collect())
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Adds a new plugin.
    ///
    /// # Errors
    ///
    /// * `PreconditionFailed` unless `status` is `STOPPED`
    /// * `AlreadyExists` if a plugin with the same name is registered
    /// * `Validation` if the resulting collection is invalid
    pub async fn add(&mut self, plugin: PluginManifest, status: ServerStatus) -> Result<()> {
        require_stopped("add plugins", status)?;
        if self.get(&plugin.name).is_some() {
            return Err(PluginError::AlreadyExists(plugin.name));
        }

        let name = plugin.name.clone();
        let mut candidate = self.plugins.clone();
        candidate.push(plugin);
        self.commit(candidate).await?;
        info!("Added plugin {}", name);
        Ok(())
    }

    /// Replaces the manifest with the same name.
    ///
    /// # Errors
    ///
    /// * `PreconditionFailed` unless `status` is `STOPPED`
    /// * `NotFound` if no plugin has that name
    pub async fn update(&mut self, plugin: PluginManifest, status: ServerStatus) -> Result<()> {
        require_stopped("update plugins", status)?;
        let Some(index) = self.position(&plugin.name) else {
            return Err(PluginError::NotFound(plugin.name));
        };

        let name = plugin.name.clone();
        let mut candidate = self.plugins.clone();
        candidate[index] = plugin;
        self.commit(candidate).await?;
        debug!("Updated plugin {}", name);
        Ok(())
    }

    /// Adds or replaces a plugin by name. Returns true when it was new.
    pub async fn upsert(&mut self, plugin: PluginManifest, status: ServerStatus) -> Result<bool> {
        if self.get(&plugin.name).is_some() {
            self.update(plugin, status).await?;
            Ok(false)
        } else {
            self.add(plugin, status).await?;
            Ok(true)
        }
    }

    /// Removes a plugin from the collection. Its files stay on disk.
    pub async fn remove(&mut self, name: &str, status: ServerStatus) -> Result<PluginManifest> {
        require_stopped("remove plugins", status)?;
        let index = self
            .position(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        let mut candidate = self.plugins.clone();
        let removed = candidate.remove(index);
        self.commit(candidate).await?;
        info!("Removed plugin {}", name);
        Ok(removed)
    }

    /// Saves the current collection.
    pub async fn persist(&self) -> Result<()> {
        self.store.save(&self.plugins).await
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.plugins.iter().position(|plugin| plugin.name == name)
    }

    async fn commit(&mut self, mut candidate: Vec<PluginManifest>) -> Result<()> {
        validate_collection(&candidate).into_result()?;
        for manifest in &mut candidate {
            augment(manifest, &self.framework);
        }
        self.store.save(&candidate).await?;
        self.plugins = candidate;
        Ok(())
    }
}

fn require_stopped(operation: &'static str, status: ServerStatus) -> Result<()> {
    if status.is_stopped() {
        Ok(())
    } else {
        Err(PluginError::PreconditionFailed { operation, status })
    }
}

/// Adds the scripting framework to a scripted plugin's dependencies.
fn augment(plugin: &mut PluginManifest, framework: &str) {
    if plugin.kind == PluginKind::ScriptedPlugin && plugin.name != framework {
        plugin.dependencies.insert(framework.to_string());
    }
}

/// Per-record checks plus name uniqueness.
pub fn validate_collection(plugins: &[PluginManifest]) -> ValidationReport {
    let mut report = ValidationReport::new();
    let mut seen = HashSet::new();
    for plugin in plugins {
        plugin.validate(&mut report);
        if !plugin.name.is_empty() && !seen.insert(plugin.name.as_str()) {
            report.push(&plugin.name, "name", "is used by more than one plugin");
        }
    }
    report
}

// ============================================================================
// Dependency Ordering
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first post-order over the dependency graph.
///
/// Dependencies naming unknown plugins are skipped. A cycle is an error
/// naming the plugins on it.
pub fn order_by_dependencies(plugins: &[PluginManifest]) -> Result<Vec<&PluginManifest>> {
    let index: HashMap<&str, &PluginManifest> = plugins
        .iter()
        .map(|plugin| (plugin.name.as_str(), plugin))
        .collect();
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut path = Vec::new();
    let mut ordered = Vec::with_capacity(plugins.len());

    for plugin in plugins {
        visit(plugin, &index, &mut marks, &mut path, &mut ordered)?;
    }
    Ok(ordered)
}

fn visit<'a>(
    plugin: &'a PluginManifest,
    index: &HashMap<&'a str, &'a PluginManifest>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
    ordered: &mut Vec<&'a PluginManifest>,
) -> Result<()> {
    let name = plugin.name.as_str();
    match marks.get(name) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = path.iter().position(|entry| *entry == name).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
            cycle.push(name.to_string());
            return Err(PluginError::DependencyCycle(cycle));
        }
        None => {}
    }

    marks.insert(name, Mark::Visiting);
    path.push(name);
    for dependency in &plugin.dependencies {
        if let Some(dependency) = index.get(dependency.as_str()) {
            visit(dependency, index, marks, path, ordered)?;
        }
    }
    path.pop();
    marks.insert(name, Mark::Done);
    ordered.push(plugin);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryManifestStore;
    use serde_json::json;

    fn scripted(name: &str) -> PluginManifest {
        PluginManifest::new(name, PluginKind::ScriptedPlugin)
            .with_download_url(format!("https://example.invalid/{name}.zip"))
    }

    fn names(plugins: &[&PluginManifest]) -> Vec<String> {
        plugins.iter().map(|p| p.name.clone()).collect()
    }

    fn memory_store() -> Arc<MemoryManifestStore> {
        Arc::new(MemoryManifestStore::default())
    }

    #[test]
    fn test_dependencies_come_first_and_unknown_names_are_skipped() {
        let plugins = vec![
            scripted("c").with_dependency("b").with_dependency("ghost"),
            scripted("b").with_dependency("a"),
            scripted("a"),
        ];
        let ordered = order_by_dependencies(&plugins).unwrap();
        assert_eq!(names(&ordered), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let plugins = vec![
            scripted("a").with_dependency("b"),
            scripted("b").with_dependency("a"),
        ];
        match order_by_dependencies(&plugins) {
            Err(PluginError::DependencyCycle(cycle)) => {
                assert_eq!(cycle, vec!["a", "b", "a"]);
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_framework_dependency_is_injected() {
        let registry = PluginRegistry::from_manifests(
            vec![
                scripted("counterstrikesharp"),
                scripted("gokz"),
                PluginManifest::new("cfg", PluginKind::ConfigOnly),
            ],
            DEFAULT_SCRIPTING_FRAMEWORK,
            memory_store(),
        )
        .unwrap();

        assert!(registry
            .get("gokz")
            .unwrap()
            .dependencies
            .contains(DEFAULT_SCRIPTING_FRAMEWORK));
        assert!(registry
            .get("counterstrikesharp")
            .unwrap()
            .dependencies
            .is_empty());
        assert!(registry.get("cfg").unwrap().dependencies.is_empty());
        assert_eq!(
            registry.ordered_names().unwrap(),
            vec!["counterstrikesharp", "gokz", "cfg"]
        );
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let err = PluginRegistry::from_manifests(
            vec![scripted("a"), scripted("a")],
            DEFAULT_SCRIPTING_FRAMEWORK,
            memory_store(),
        )
        .unwrap_err();
        match err {
            PluginError::Validation(report) => assert!(report.mentions("a", "name")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_reports_every_bad_record() {
        let store = Arc::new(MemoryManifestStore::new(vec![
            json!({ "name": "ok", "displayName": "Ok", "kind": "config-only" }),
            json!({ "displayName": "No name", "kind": "loader" }),
            json!({ "name": "bad", "displayName": "Bad", "kind": "mystery" }),
        ]));

        match PluginRegistry::load(store, DEFAULT_SCRIPTING_FRAMEWORK).await {
            Err(PluginError::Validation(report)) => {
                assert!(report.mentions("#1", "name"));
                assert!(report.mentions("bad", "kind"));
                assert_eq!(report.issues().len(), 2);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_add_and_remove_require_stopped_server() {
        let store = memory_store();
        let mut registry =
            PluginRegistry::from_manifests(vec![], DEFAULT_SCRIPTING_FRAMEWORK, store.clone())
                .unwrap();

        let err = registry
            .add(scripted("gokz"), ServerStatus::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::PreconditionFailed { .. }));
        assert!(registry.is_empty());
        assert_eq!(store.save_count(), 0);

        registry
            .add(scripted("gokz"), ServerStatus::Stopped)
            .await
            .unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.records()[0]["name"], "gokz");

        let err = registry
            .remove("gokz", ServerStatus::UpdatingPlugins)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::PreconditionFailed { .. }));
        assert_eq!(registry.len(), 1);

        registry.remove("gokz", ServerStatus::Stopped).await.unwrap();
        assert!(registry.is_empty());
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_update_leaves_registry_untouched() {
        let store = memory_store();
        let mut registry = PluginRegistry::from_manifests(
            vec![scripted("gokz")],
            DEFAULT_SCRIPTING_FRAMEWORK,
            store.clone(),
        )
        .unwrap();

        let broken = PluginManifest::new("gokz", PluginKind::ScriptedPlugin);
        assert!(matches!(
            registry.update(broken, ServerStatus::Stopped).await,
            Err(PluginError::Validation(_))
        ));
        assert!(!registry.get("gokz").unwrap().download_url.is_empty());
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_upsert_reports_creation() {
        let mut registry = PluginRegistry::from_manifests(
            vec![],
            DEFAULT_SCRIPTING_FRAMEWORK,
            memory_store(),
        )
        .unwrap();

        assert!(registry
            .upsert(scripted("gokz"), ServerStatus::Stopped)
            .await
            .unwrap());
        let disabled = scripted("gokz").with_enabled(false);
        assert!(matches!(
            registry.upsert(disabled.clone(), ServerStatus::Starting).await,
            Err(PluginError::PreconditionFailed { .. })
        ));
        assert!(!registry
            .upsert(disabled, ServerStatus::Stopped)
            .await
            .unwrap());
        assert!(!registry.get("gokz").unwrap().enabled);
    }
}
