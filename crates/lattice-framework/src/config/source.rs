//! Configuration source descriptors, format detection, and the environment
//! variable overlay.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde_json::{Map, Value};
use thiserror::Error;

/// Serialization format of a configuration source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON document.
    Json,
    /// YAML document.
    Yaml,
    /// TOML document.
    Toml,
}

impl ConfigFormat {
    /// Detects the format from the file extension; unknown extensions are
    /// treated as JSON.
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::Yaml,
            Some("toml") => Self::Toml,
            _ => Self::Json,
        }
    }

    /// Lowercase format name, used in log lines and errors.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Toml => "toml",
        }
    }

    /// Parses `content` into a JSON value.
    pub fn parse(self, content: &str) -> Result<Value, String> {
        match self {
            Self::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            Self::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            Self::Toml => {
                let value: toml::Value = toml::from_str(content).map_err(|e| e.to_string())?;
                serde_json::to_value(value).map_err(|e| e.to_string())
            }
        }
    }
}

impl std::fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered configuration source.
///
/// Sources are merged in ascending `priority` order, so a higher-priority
/// source overwrites a lower one key-by-key.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Unique source name, used by `reload_source`.
    pub name: String,
    /// File path of the source.
    pub path: PathBuf,
    /// Serialization format.
    pub format: ConfigFormat,
    /// Merge priority; higher overrides lower.
    pub priority: i64,
    /// Whether the file is polled for modification.
    pub watch: bool,
    /// Modification time observed at the last successful load.
    pub last_modified: Option<SystemTime>,
}

/// Errors raised while loading or merging configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// No source is registered under the given name.
    #[error("configuration source '{name}' not found")]
    SourceNotFound {
        /// The unknown source name.
        name: String,
    },

    /// The source file could not be read.
    #[error("failed to read configuration file '{path}': {cause}")]
    Read {
        /// Path of the unreadable file.
        path: String,
        /// Rendered I/O error.
        cause: String,
    },

    /// The source file could not be parsed.
    #[error("failed to parse '{path}' as {format}: {cause}")]
    Parse {
        /// Path of the malformed file.
        path: String,
        /// Format the file was parsed as.
        format: &'static str,
        /// Rendered parse error.
        cause: String,
    },

    /// The merged configuration could not be extracted.
    #[error("failed to merge configuration: {0}")]
    Merge(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Environment overlay
// =============================================================================

/// Coerces an environment variable string into a typed JSON value.
///
/// `true`/`false`/`yes`/`no` (case-insensitive) become booleans, numeric
/// strings become numbers, strings starting with `{` or `[` are parsed as
/// JSON (falling back to the raw string), everything else stays a string.
pub fn coerce_env_value(raw: &str) -> Value {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" => return Value::Bool(true),
        "false" | "no" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = raw.parse::<f64>() {
        return Value::from(float);
    }
    if raw.starts_with('{') || raw.starts_with('[') {
        if let Ok(json) = serde_json::from_str::<Value>(raw) {
            return json;
        }
    }
    Value::String(raw.to_string())
}

/// Builds the environment overlay: variables under `prefix` are translated
/// to nested keys (`__` separates nesting levels, segments are lowercased)
/// and their values are coerced with [`coerce_env_value`].
///
/// `LATTICE_PLUGINS__AUTO_LOAD=false` → `{"plugins": {"auto_load": false}}`.
pub fn env_overlay(prefix: &str) -> Value {
    let mut root = Map::new();
    for (key, raw) in std::env::vars() {
        let Some(stripped) = key.strip_prefix(prefix) else {
            continue;
        };
        if stripped.is_empty() {
            continue;
        }
        let segments: Vec<String> = stripped
            .split("__")
            .map(|s| s.to_ascii_lowercase())
            .collect();
        insert_nested(&mut root, &segments, coerce_env_value(&raw));
    }
    if root.is_empty() {
        Value::Null
    } else {
        Value::Object(root)
    }
}

fn insert_nested(map: &mut Map<String, Value>, segments: &[String], value: Value) {
    match segments {
        [] => {}
        [leaf] => {
            map.insert(leaf.clone(), value);
        }
        [head, rest @ ..] => {
            let entry = map
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                // A scalar at an intermediate position is replaced by a map.
                *entry = Value::Object(Map::new());
            }
            if let Some(child) = entry.as_object_mut() {
                insert_nested(child, rest, value);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn format_detection_follows_the_extension() {
        assert_eq!(ConfigFormat::detect(Path::new("a.yaml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::detect(Path::new("a.yml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::detect(Path::new("a.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::detect(Path::new("a.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::detect(Path::new("a.conf")), ConfigFormat::Json);
    }

    #[test]
    fn parses_all_three_formats() {
        let json = ConfigFormat::Json.parse(r#"{"a": {"b": 1}}"#).unwrap();
        let yaml = ConfigFormat::Yaml.parse("a:\n  b: 1\n").unwrap();
        let toml = ConfigFormat::Toml.parse("[a]\nb = 1\n").unwrap();
        assert_eq!(json, yaml);
        assert_eq!(yaml, toml);
    }

    #[test]
    fn env_values_are_coerced() {
        assert_eq!(coerce_env_value("true"), json!(true));
        assert_eq!(coerce_env_value("No"), json!(false));
        assert_eq!(coerce_env_value("42"), json!(42));
        assert_eq!(coerce_env_value("2.5"), json!(2.5));
        assert_eq!(coerce_env_value(r#"{"k": 1}"#), json!({"k": 1}));
        assert_eq!(coerce_env_value("[1, 2]"), json!([1, 2]));
        assert_eq!(coerce_env_value("{not json"), json!("{not json"));
        assert_eq!(coerce_env_value("plain"), json!("plain"));
    }

    #[test]
    fn nested_insertion_builds_objects() {
        let mut map = Map::new();
        insert_nested(
            &mut map,
            &["plugins".into(), "auto_load".into()],
            json!(false),
        );
        insert_nested(&mut map, &["plugins".into(), "hot_reload".into()], json!(true));
        assert_eq!(
            Value::Object(map),
            json!({"plugins": {"auto_load": false, "hot_reload": true}})
        );
    }
}
