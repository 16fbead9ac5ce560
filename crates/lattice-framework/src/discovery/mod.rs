//! Plugin discovery: manifest scanning, dependency resolution, and
//! implementation loading.
//!
//! [`PluginDiscovery`] scans configured paths for plugin directories (a
//! directory containing a recognized manifest file) and standalone
//! `*.plugin.{json,yaml,yml,toml}` manifests, parses them into
//! [`PluginManifest`] records, resolves each manifest to a loader entry
//! point, and computes dependency load order with a depth-first topological
//! sort.
//!
//! A manifest that fails to parse is logged and omitted from the discovered
//! set — discovery failures for one plugin never abort the scan.

pub mod loader;
pub mod manifest;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use lattice_core::{PluginError, PluginInstance, PluginResult};

pub use loader::{PluginFactory, PluginLoader, StaticPluginLoader};
pub use manifest::{ManifestConfiguration, ManifestError, PluginManifest};

/// Manifest file names recognized inside a plugin directory, in probe order.
const MANIFEST_NAMES: &[&str] = &[
    "plugin.json",
    "plugin.yaml",
    "plugin.yml",
    "plugin.toml",
    "manifest.json",
    "manifest.yaml",
    "manifest.yml",
    "manifest.toml",
];

/// Suffixes marking a standalone manifest file directly inside a discovery
/// path.
const STANDALONE_SUFFIXES: &[&str] = &[
    ".plugin.json",
    ".plugin.yaml",
    ".plugin.yml",
    ".plugin.toml",
];

/// Discovers plugins and resolves their implementations and load order.
pub struct PluginDiscovery {
    loader: Arc<dyn PluginLoader>,
    manifests: BTreeMap<String, PluginManifest>,
    /// Plugin name → resolved loader entry point.
    entry_points: HashMap<String, String>,
}

impl PluginDiscovery {
    /// Creates a discovery backed by the given implementation loader.
    pub fn new(loader: Arc<dyn PluginLoader>) -> Self {
        Self {
            loader,
            manifests: BTreeMap::new(),
            entry_points: HashMap::new(),
        }
    }

    /// Scans `paths` for plugin manifests, replacing the previous discovered
    /// set. Returns a copy of the discovered manifests.
    pub async fn discover(&mut self, paths: &[PathBuf]) -> BTreeMap<String, PluginManifest> {
        self.manifests.clear();
        self.entry_points.clear();

        for path in paths {
            if path.is_dir() {
                self.scan_directory(path).await;
            } else {
                warn!(path = %path.display(), "Plugin discovery path does not exist");
            }
        }

        info!(count = self.manifests.len(), "Plugin discovery complete");
        self.manifests.clone()
    }

    async fn scan_directory(&mut self, directory: &Path) {
        debug!(path = %directory.display(), "Scanning directory for plugins");
        let mut entries = match tokio::fs::read_dir(directory).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %directory.display(), error = %e, "Could not read discovery path");
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let entry_path = entry.path();
            if entry_path.is_dir() {
                self.scan_plugin_directory(&entry_path).await;
            } else if is_standalone_manifest(&entry_path) {
                self.load_and_register(&entry_path).await;
            }
        }
    }

    /// Probes a plugin directory for a recognized manifest file name.
    async fn scan_plugin_directory(&mut self, plugin_dir: &Path) {
        let Some(manifest_path) = MANIFEST_NAMES
            .iter()
            .map(|name| plugin_dir.join(name))
            .find(|candidate| candidate.is_file())
        else {
            debug!(path = %plugin_dir.display(), "No manifest in plugin directory");
            return;
        };
        self.load_and_register(&manifest_path).await;
    }

    async fn load_and_register(&mut self, manifest_path: &Path) {
        match PluginManifest::load(manifest_path).await {
            Ok(manifest) => self.register_manifest(manifest, manifest_path).await,
            Err(e) => {
                warn!(path = %manifest_path.display(), error = %e, "Skipping unparseable manifest");
            }
        }
    }

    async fn register_manifest(&mut self, manifest: PluginManifest, path: &Path) {
        let Some(entry_point) = self.resolve_entry_point(&manifest).await else {
            warn!(
                plugin = %manifest.name,
                path = %path.display(),
                "Entry point not found for plugin — manifest ignored"
            );
            return;
        };

        if self.manifests.contains_key(&manifest.name) {
            warn!(
                plugin = %manifest.name,
                "Duplicate plugin manifest — last discovered wins"
            );
        }
        debug!(
            plugin = %manifest.name,
            entry_point = %entry_point,
            path = %path.display(),
            "Discovered plugin"
        );
        self.entry_points.insert(manifest.name.clone(), entry_point);
        self.manifests.insert(manifest.name.clone(), manifest);
    }

    /// Resolves the loader entry point for a manifest: the explicit
    /// `entry_point`, then the plugin name, then `main`.
    async fn resolve_entry_point(&self, manifest: &PluginManifest) -> Option<String> {
        let mut candidates: Vec<&str> = Vec::new();
        if let Some(explicit) = manifest.entry_point.as_deref() {
            candidates.push(explicit);
        }
        candidates.push(manifest.name.as_str());
        candidates.push("main");

        for candidate in candidates {
            if self.loader.contains(candidate).await {
                return Some(candidate.to_string());
            }
        }
        None
    }

    /// All discovered manifests.
    pub fn discovered(&self) -> &BTreeMap<String, PluginManifest> {
        &self.manifests
    }

    /// Manifest of a discovered plugin.
    pub fn manifest(&self, name: &str) -> Option<&PluginManifest> {
        self.manifests.get(name)
    }

    /// Instantiates the active implementation of a discovered plugin.
    pub async fn instantiate(&self, name: &str) -> PluginResult<PluginInstance> {
        let manifest = self.manifests.get(name).ok_or_else(|| PluginError::NotFound {
            plugin: name.to_string(),
        })?;
        let entry_point =
            self.entry_points
                .get(name)
                .ok_or_else(|| PluginError::NotFound {
                    plugin: name.to_string(),
                })?;

        let instance = self.loader.load(entry_point).await?;
        if instance.capability() != manifest.plugin_type {
            warn!(
                plugin = %name,
                manifest_type = %manifest.plugin_type,
                instance_type = %instance.capability(),
                "Manifest capability type disagrees with the implementation"
            );
        }
        Ok(instance)
    }

    /// Swaps a discovered plugin's implementation to its newest version.
    pub async fn refresh(&self, name: &str) -> PluginResult<()> {
        let entry_point =
            self.entry_points
                .get(name)
                .ok_or_else(|| PluginError::NotFound {
                    plugin: name.to_string(),
                })?;
        self.loader.reload(entry_point).await
    }

    /// Computes the load order for `names`: a depth-first topological sort
    /// in which every plugin appears after all of its dependencies.
    ///
    /// Ties are broken by request order, so the result is deterministic for
    /// a fixed discovered set. Fails on a dependency cycle (naming a plugin
    /// in the cycle) or on a dependency absent from the discovered set —
    /// before anything is instantiated.
    pub fn resolve_dependencies(&self, names: &[String]) -> PluginResult<Vec<String>> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut in_progress: HashSet<String> = HashSet::new();
        let mut order: Vec<String> = Vec::new();

        for name in names {
            self.visit(name, None, &mut visited, &mut in_progress, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        name: &str,
        required_by: Option<&str>,
        visited: &mut HashSet<String>,
        in_progress: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> PluginResult<()> {
        if in_progress.contains(name) {
            return Err(PluginError::DependencyCycle {
                plugin: name.to_string(),
            });
        }
        if visited.contains(name) {
            return Ok(());
        }

        let manifest = self.manifests.get(name).ok_or_else(|| match required_by {
            Some(parent) => PluginError::MissingDependency {
                plugin: parent.to_string(),
                dependency: name.to_string(),
            },
            None => PluginError::NotFound {
                plugin: name.to_string(),
            },
        })?;

        in_progress.insert(name.to_string());
        for dependency in &manifest.dependencies {
            self.visit(dependency, Some(name), visited, in_progress, order)?;
        }
        in_progress.remove(name);

        visited.insert(name.to_string());
        order.push(name.to_string());
        Ok(())
    }
}

fn is_standalone_manifest(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| STANDALONE_SUFFIXES.iter().any(|s| name.ends_with(s)))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lattice_core::{
        BoxError, Plugin, PluginConfig, PluginMetadata, PluginState, PluginType,
    };

    struct Stub {
        meta: PluginMetadata,
        state: PluginState,
    }

    #[async_trait]
    impl Plugin for Stub {
        fn metadata(&self) -> &PluginMetadata {
            &self.meta
        }
        fn state(&self) -> &PluginState {
            &self.state
        }
        async fn on_initialize(&self, _config: &PluginConfig) -> Result<(), BoxError> {
            Ok(())
        }
        async fn on_start(&self) -> Result<(), BoxError> {
            Ok(())
        }
        async fn on_stop(&self) -> Result<(), BoxError> {
            Ok(())
        }
    }

    fn stub_factory(name: &str) -> impl Fn() -> PluginInstance {
        let name = name.to_string();
        move || {
            PluginInstance::Extension(Arc::new(Stub {
                meta: PluginMetadata::new(name.clone(), "1.0.0", PluginType::Extension),
                state: PluginState::new(),
            }))
        }
    }

    fn manifest_named(name: &str, dependencies: &[&str]) -> PluginManifest {
        PluginManifest {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            plugin_type: PluginType::Extension,
            description: String::new(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            entry_point: None,
            configuration: ManifestConfiguration::default(),
            hot_reload: true,
            priority: 100,
        }
    }

    fn discovery_with(manifests: Vec<PluginManifest>) -> PluginDiscovery {
        let mut discovery = PluginDiscovery::new(Arc::new(StaticPluginLoader::new()));
        for manifest in manifests {
            discovery
                .entry_points
                .insert(manifest.name.clone(), manifest.name.clone());
            discovery.manifests.insert(manifest.name.clone(), manifest);
        }
        discovery
    }

    #[test]
    fn topological_order_puts_dependencies_first() {
        let discovery = discovery_with(vec![
            manifest_named("app", &["cache", "db"]),
            manifest_named("cache", &["db"]),
            manifest_named("db", &[]),
        ]);

        let order = discovery
            .resolve_dependencies(&["app".to_string()])
            .unwrap();
        assert_eq!(order, vec!["db", "cache", "app"]);

        // Every name appears after all of its dependencies.
        for (i, name) in order.iter().enumerate() {
            for dep in &discovery.manifests[name].dependencies {
                let dep_pos = order.iter().position(|n| n == dep).unwrap();
                assert!(dep_pos < i);
            }
        }
    }

    #[test]
    fn request_order_breaks_ties_deterministically() {
        let discovery = discovery_with(vec![
            manifest_named("a", &[]),
            manifest_named("b", &[]),
            manifest_named("c", &[]),
        ]);
        let order = discovery
            .resolve_dependencies(&["c".to_string(), "a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn a_cycle_fails_naming_a_participant() {
        let discovery = discovery_with(vec![
            manifest_named("a", &["b"]),
            manifest_named("b", &["a"]),
        ]);
        let err = discovery
            .resolve_dependencies(&["a".to_string()])
            .unwrap_err();
        match err {
            PluginError::DependencyCycle { plugin } => {
                assert!(plugin == "a" || plugin == "b");
            }
            other => panic!("expected a cycle error, got {other}"),
        }
    }

    #[test]
    fn a_missing_dependency_fails_naming_both_plugins() {
        let discovery = discovery_with(vec![manifest_named("a", &["ghost"])]);
        let err = discovery
            .resolve_dependencies(&["a".to_string()])
            .unwrap_err();
        match err {
            PluginError::MissingDependency { plugin, dependency } => {
                assert_eq!(plugin, "a");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("expected a missing-dependency error, got {other}"),
        }
    }

    #[tokio::test]
    async fn scans_plugin_directories_and_standalone_manifests() {
        let dir = tempfile::tempdir().unwrap();

        let echo_dir = dir.path().join("echo");
        std::fs::create_dir(&echo_dir).unwrap();
        std::fs::write(
            echo_dir.join("plugin.yaml"),
            "name: echo\nversion: 1.0.0\ntype: extension\n",
        )
        .unwrap();

        std::fs::write(
            dir.path().join("store.plugin.json"),
            r#"{"name": "store", "version": "1.0.0", "type": "extension"}"#,
        )
        .unwrap();

        // A broken manifest is skipped, not fatal.
        let bad_dir = dir.path().join("bad");
        std::fs::create_dir(&bad_dir).unwrap();
        std::fs::write(bad_dir.join("plugin.json"), "{broken").unwrap();

        // A manifest with no loadable implementation is ignored.
        let ghost_dir = dir.path().join("ghost");
        std::fs::create_dir(&ghost_dir).unwrap();
        std::fs::write(
            ghost_dir.join("plugin.json"),
            r#"{"name": "ghost", "version": "1.0.0", "type": "extension"}"#,
        )
        .unwrap();

        let loader = Arc::new(StaticPluginLoader::new());
        loader.register("echo", stub_factory("echo"));
        loader.register("store", stub_factory("store"));

        let mut discovery = PluginDiscovery::new(loader);
        let found = discovery.discover(&[dir.path().to_path_buf()]).await;

        assert_eq!(
            found.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["echo", "store"],
            "only manifests with implementations are discovered"
        );

        let instance = discovery.instantiate("echo").await.unwrap();
        assert_eq!(instance.name(), "echo");
        assert!(matches!(
            discovery.instantiate("ghost").await.unwrap_err(),
            PluginError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn explicit_entry_point_wins_over_conventions() {
        let dir = tempfile::tempdir().unwrap();
        let plugin_dir = dir.path().join("renamed");
        std::fs::create_dir(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join("plugin.json"),
            r#"{"name": "renamed", "version": "1.0.0", "type": "extension", "entry_point": "custom_impl"}"#,
        )
        .unwrap();

        let loader = Arc::new(StaticPluginLoader::new());
        loader.register("custom_impl", stub_factory("renamed"));

        let mut discovery = PluginDiscovery::new(loader);
        discovery.discover(&[dir.path().to_path_buf()]).await;

        assert!(discovery.manifest("renamed").is_some());
        assert!(discovery.instantiate("renamed").await.is_ok());
    }
}
