//! Plugin identity, capability tags, lifecycle status, and the configuration
//! schema carried by every plugin.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PluginError, PluginResult};

/// Plugin configuration values, keyed by schema key.
pub type PluginConfig = serde_json::Map<String, Value>;

// =============================================================================
// Capability tag
// =============================================================================

/// Functional capability a plugin provides.
///
/// The tag is carried in [`PluginMetadata`] and mirrored by the variant of
/// [`PluginInstance`](crate::plugin::PluginInstance); capability dispatch is
/// always a `match` on this tag, never downcast probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    /// Conversational agent: processes messages, owns a memory namespace.
    Agent,
    /// Text embedding provider.
    Embedding,
    /// Namespaced storage provider.
    Memory,
    /// Cross-cutting middleware with no specialized contract.
    Middleware,
    /// Generic extension with no specialized contract.
    Extension,
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Agent => "agent",
            Self::Embedding => "embedding",
            Self::Memory => "memory",
            Self::Middleware => "middleware",
            Self::Extension => "extension",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Lifecycle status
// =============================================================================

/// Lifecycle status of a plugin instance.
///
/// The legal transitions are driven exclusively by the provided lifecycle
/// methods on [`Plugin`](crate::plugin::Plugin):
///
/// ```text
/// Inactive ──initialize──► Loading ──start──► Active ──stop──► Stopping ──► Stopped
///     any state ──unhandled failure──► Error
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    /// Constructed but not initialized.
    #[default]
    Inactive,
    /// `initialize` in progress or completed; not yet started.
    Loading,
    /// Started and serving.
    Active,
    /// A lifecycle step failed; the plugin is non-functional.
    Error,
    /// `stop` in progress.
    Stopping,
    /// Stopped cleanly.
    Stopped,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Inactive => "inactive",
            Self::Loading => "loading",
            Self::Active => "active",
            Self::Error => "error",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Configuration schema
// =============================================================================

/// Expected JSON type of a configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    /// A JSON string.
    String,
    /// A JSON integer.
    Integer,
    /// Any JSON number.
    Float,
    /// A JSON boolean.
    Boolean,
    /// A JSON array.
    Array,
    /// A JSON object.
    Object,
}

impl SchemaType {
    /// Whether `value` is of this type. Integers satisfy `Float`.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// Declaration of a single configuration key in a plugin's schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaField {
    /// Expected type of the value, if constrained.
    #[serde(rename = "type", default)]
    pub value_type: Option<SchemaType>,
    /// Whether the key must be present at `initialize` time.
    #[serde(default)]
    pub required: bool,
    /// Value applied when the key is absent from the effective configuration.
    #[serde(default)]
    pub default: Option<Value>,
    /// Human-readable description, shown in manifests and registries.
    #[serde(default)]
    pub description: String,
}

/// Configuration schema: key → declaration.
pub type ConfigSchema = BTreeMap<String, SchemaField>;

/// Validates `config` against `schema` on behalf of plugin `name`.
///
/// Fails when a required key is absent, or when a present value does not
/// match the declared type.
pub fn validate_config(
    name: &str,
    schema: &ConfigSchema,
    config: &PluginConfig,
) -> PluginResult<()> {
    for (key, field) in schema {
        match config.get(key) {
            None if field.required => {
                return Err(PluginError::Config {
                    plugin: name.to_string(),
                    message: format!("required configuration key '{key}' missing"),
                });
            }
            Some(value) => {
                if let Some(expected) = field.value_type
                    && !expected.matches(value)
                {
                    return Err(PluginError::Config {
                        plugin: name.to_string(),
                        message: format!("configuration key '{key}' has the wrong type"),
                    });
                }
            }
            None => {}
        }
    }
    Ok(())
}

// =============================================================================
// PluginMetadata
// =============================================================================

/// Immutable identity of a plugin.
///
/// Built once when the plugin implementation is constructed and never mutated
/// afterwards; the builder-style `with_*` methods are consumed at
/// construction time.
#[derive(Debug, Clone)]
pub struct PluginMetadata {
    /// Unique plugin name, used as the key in every registry.
    pub name: String,
    /// Semver version string.
    pub version: String,
    /// Capability provided by the plugin.
    pub plugin_type: PluginType,
    /// One-line description shown in logs and registries.
    pub description: String,
    /// Names of plugins that must be loaded before this one.
    pub dependencies: Vec<String>,
    /// Schema the effective configuration is validated against.
    pub config_schema: ConfigSchema,
    /// Whether [`reload`](crate::plugin::Plugin::reload) is supported.
    pub hot_reload: bool,
    /// Tie-break used when ordering plugins of equal dependency depth.
    pub priority: i64,
}

impl PluginMetadata {
    /// Creates metadata with defaults: no dependencies, empty schema,
    /// hot-reload enabled, priority 100.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        plugin_type: PluginType,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            plugin_type,
            description: String::new(),
            dependencies: Vec::new(),
            config_schema: ConfigSchema::new(),
            hot_reload: true,
            priority: 100,
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the dependency list.
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Sets the configuration schema.
    pub fn with_config_schema(mut self, schema: ConfigSchema) -> Self {
        self.config_schema = schema;
        self
    }

    /// Enables or disables hot-reload support.
    pub fn with_hot_reload(mut self, hot_reload: bool) -> Self {
        self.hot_reload = hot_reload;
        self
    }

    /// Sets the ordering priority.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema_with(key: &str, field: SchemaField) -> ConfigSchema {
        let mut schema = ConfigSchema::new();
        schema.insert(key.to_string(), field);
        schema
    }

    #[test]
    fn missing_required_key_fails_validation() {
        let schema = schema_with(
            "endpoint",
            SchemaField {
                required: true,
                ..Default::default()
            },
        );
        let err = validate_config("p", &schema, &PluginConfig::new()).unwrap_err();
        assert!(matches!(err, PluginError::Config { .. }));
        assert!(err.to_string().contains("endpoint"));
    }

    #[test]
    fn type_mismatch_fails_validation() {
        let schema = schema_with(
            "limit",
            SchemaField {
                value_type: Some(SchemaType::Integer),
                ..Default::default()
            },
        );
        let mut config = PluginConfig::new();
        config.insert("limit".into(), json!("ten"));
        assert!(validate_config("p", &schema, &config).is_err());
    }

    #[test]
    fn optional_absent_key_passes() {
        let schema = schema_with(
            "limit",
            SchemaField {
                value_type: Some(SchemaType::Integer),
                default: Some(json!(10)),
                ..Default::default()
            },
        );
        assert!(validate_config("p", &schema, &PluginConfig::new()).is_ok());
    }

    #[test]
    fn integer_satisfies_float() {
        assert!(SchemaType::Float.matches(&json!(3)));
        assert!(SchemaType::Float.matches(&json!(3.5)));
        assert!(!SchemaType::Integer.matches(&json!(3.5)));
    }
}
