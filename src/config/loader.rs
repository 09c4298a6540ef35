//! Pluggable configuration loaders.
//!
//! The orchestrator only asks for "the config object behind this
//! path"; how the object is obtained is the loader's business. The
//! built-in loaders deserialize TOML and JSON config modules. A host
//! embedding this crate can substitute its own loader (e.g. one that
//! evaluates a scripted config in a subprocess) without touching the
//! orchestrator.

use std::fs;
use std::path::Path;

use super::error::ConfigError;
use super::ProjectConfig;

/// Loads and validates one project configuration file.
pub trait ConfigLoader {
    /// File name this loader recognizes in the project root.
    fn file_name(&self) -> &'static str;

    /// Parse `path` into a validated config.
    ///
    /// Implementations must reject unknown keys and wrong types; the
    /// deserializer's message is surfaced verbatim.
    fn load(&self, path: &Path) -> Result<ProjectConfig, ConfigError>;
}

/// `kiln.config.toml`
pub struct TomlConfigLoader;

impl ConfigLoader for TomlConfigLoader {
    fn file_name(&self) -> &'static str {
        "kiln.config.toml"
    }

    fn load(&self, path: &Path) -> Result<ProjectConfig, ConfigError> {
        let text =
            fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        let de = toml::Deserializer::new(&text);
        let mut unknown = Vec::new();
        let config: ProjectConfig =
            serde_ignored::deserialize(de, |field| unknown.push(field.to_string())).map_err(
                |e| ConfigError::Schema {
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                },
            )?;

        reject_unknown(path, unknown)?;
        Ok(config)
    }
}

/// `kiln.config.json`
pub struct JsonConfigLoader;

impl ConfigLoader for JsonConfigLoader {
    fn file_name(&self) -> &'static str {
        "kiln.config.json"
    }

    fn load(&self, path: &Path) -> Result<ProjectConfig, ConfigError> {
        let text =
            fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        let mut de = serde_json::Deserializer::from_str(&text);
        let mut unknown = Vec::new();
        let config: ProjectConfig =
            serde_ignored::deserialize(&mut de, |field| unknown.push(field.to_string())).map_err(
                |e| ConfigError::Schema {
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                },
            )?;

        reject_unknown(path, unknown)?;
        Ok(config)
    }
}

fn reject_unknown(path: &Path, unknown: Vec<String>) -> Result<(), ConfigError> {
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::UnknownFields {
            path: path.to_path_buf(),
            keys: unknown.join(", "),
        })
    }
}

/// The built-in loaders, in recognition priority order.
pub fn builtin_loaders() -> Vec<Box<dyn ConfigLoader>> {
    vec![Box::new(TomlConfigLoader), Box::new(JsonConfigLoader)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_toml_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kiln.config.toml");
        fs::write(
            &path,
            "sourceMap = false\n\n[runtimeOptions]\npoweredByHeader = false\n",
        )
        .unwrap();

        let config = TomlConfigLoader.load(&path).unwrap();
        assert_eq!(config.source_map, Some(false));
        assert!(!config.runtime_options.powered_by_header);
    }

    #[test]
    fn test_json_load_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kiln.config.json");
        fs::write(&path, "{}").unwrap();

        let config = JsonConfigLoader.load(&path).unwrap();
        assert_eq!(config.source_map, None);
        assert!(config.runtime_options.powered_by_header);
    }

    #[test]
    fn test_wrong_type_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kiln.config.toml");
        fs::write(&path, "sourceMap = \"yes\"\n").unwrap();

        let err = TomlConfigLoader.load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Schema { .. }));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kiln.config.json");
        fs::write(&path, r#"{"sourceMaps": true}"#).unwrap();

        let err = JsonConfigLoader.load(&path).unwrap_err();
        match err {
            ConfigError::UnknownFields { keys, .. } => assert!(keys.contains("sourceMaps")),
            other => panic!("expected UnknownFields, got {other:?}"),
        }
    }
}
