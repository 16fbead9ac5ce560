//! Plugin manifest parsing.
//!
//! A manifest declares a discoverable plugin: identity, capability type,
//! dependencies, entry point, and configuration schema. Manifests are
//! written in JSON, YAML, or TOML; the format is detected from the file
//! extension.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use lattice_core::ConfigSchema;
use lattice_core::PluginType;

use crate::config::ConfigFormat;

/// Errors raised while reading or parsing a manifest file.
#[derive(Debug, Clone, Error)]
pub enum ManifestError {
    /// The manifest file could not be read.
    #[error("failed to read manifest '{path}': {cause}")]
    Read {
        /// Path of the unreadable manifest.
        path: String,
        /// Rendered I/O error.
        cause: String,
    },

    /// The manifest file could not be parsed.
    #[error("failed to parse manifest '{path}': {cause}")]
    Parse {
        /// Path of the malformed manifest.
        path: String,
        /// Rendered parse error.
        cause: String,
    },
}

/// The `configuration` section of a manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestConfiguration {
    /// Schema of the plugin's configuration keys.
    #[serde(default)]
    pub schema: ConfigSchema,
}

fn default_hot_reload() -> bool {
    true
}

fn default_priority() -> i64 {
    100
}

/// Declarative description of a discoverable plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Unique plugin name.
    pub name: String,
    /// Semver version string.
    pub version: String,
    /// Capability the plugin provides.
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    /// One-line description.
    #[serde(default)]
    pub description: String,
    /// Names of plugins that must load first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Loader key of the implementation; conventions apply when absent.
    #[serde(default)]
    pub entry_point: Option<String>,
    /// Configuration schema section.
    #[serde(default)]
    pub configuration: ManifestConfiguration,
    /// Whether the plugin supports hot-reload. Defaults to true.
    #[serde(default = "default_hot_reload")]
    pub hot_reload: bool,
    /// Ordering tie-break. Defaults to 100.
    #[serde(default = "default_priority")]
    pub priority: i64,
}

impl PluginManifest {
    /// Parses manifest `content` in the given format.
    pub fn parse(content: &str, format: ConfigFormat, path: &Path) -> Result<Self, ManifestError> {
        let parse_err = |cause: String| ManifestError::Parse {
            path: path.display().to_string(),
            cause,
        };
        match format {
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| parse_err(e.to_string())),
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| parse_err(e.to_string())),
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| parse_err(e.to_string())),
        }
    }

    /// Reads and parses the manifest at `path`, detecting the format from
    /// the extension.
    pub async fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ManifestError::Read {
                path: path.display().to_string(),
                cause: e.to_string(),
            })?;
        Self::parse(&content, ConfigFormat::detect(path), path)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::SchemaType;

    #[test]
    fn parses_a_full_json_manifest() {
        let content = r#"{
            "name": "echo",
            "version": "1.2.0",
            "type": "agent",
            "description": "Echoes messages",
            "dependencies": ["memory-store"],
            "entry_point": "echo_agent",
            "configuration": {
                "schema": {
                    "greeting": {"type": "string", "required": true, "description": "Prefix"},
                    "limit": {"type": "integer", "default": 10}
                }
            },
            "priority": 50
        }"#;
        let manifest =
            PluginManifest::parse(content, ConfigFormat::Json, Path::new("plugin.json")).unwrap();

        assert_eq!(manifest.name, "echo");
        assert_eq!(manifest.plugin_type, PluginType::Agent);
        assert_eq!(manifest.dependencies, vec!["memory-store"]);
        assert_eq!(manifest.entry_point.as_deref(), Some("echo_agent"));
        assert_eq!(manifest.priority, 50);
        assert!(manifest.hot_reload);

        let greeting = &manifest.configuration.schema["greeting"];
        assert!(greeting.required);
        assert_eq!(greeting.value_type, Some(SchemaType::String));
    }

    #[test]
    fn parses_minimal_yaml_and_toml_manifests() {
        let yaml = "name: store\nversion: 0.1.0\ntype: memory\n";
        let from_yaml =
            PluginManifest::parse(yaml, ConfigFormat::Yaml, Path::new("plugin.yaml")).unwrap();
        assert_eq!(from_yaml.plugin_type, PluginType::Memory);
        assert!(from_yaml.dependencies.is_empty());
        assert!(from_yaml.hot_reload);
        assert_eq!(from_yaml.priority, 100);

        let toml = "name = \"store\"\nversion = \"0.1.0\"\ntype = \"memory\"\nhot_reload = false\n";
        let from_toml =
            PluginManifest::parse(toml, ConfigFormat::Toml, Path::new("plugin.toml")).unwrap();
        assert_eq!(from_toml.name, from_yaml.name);
        assert!(!from_toml.hot_reload);
    }

    #[test]
    fn missing_required_fields_fail_to_parse() {
        let err = PluginManifest::parse(r#"{"name": "x"}"#, ConfigFormat::Json, Path::new("p.json"))
            .unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let content = r#"{"name": "x", "version": "1.0.0", "type": "quantum"}"#;
        assert!(
            PluginManifest::parse(content, ConfigFormat::Json, Path::new("p.json")).is_err()
        );
    }
}
