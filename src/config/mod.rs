//! Project configuration for `kiln.config.toml` / `kiln.config.json`.
//!
//! The schema is deliberately small; anything unknown is an error so a
//! typo never silently changes build behavior. A configuration change
//! of any kind invalidates the whole build cache (the manifest records
//! the config file's fingerprint).

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::{ConfigLoader, JsonConfigLoader, TomlConfigLoader, builtin_loaders};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::{BuildMode, ProjectPaths};

/// Recognized config file names, in priority order.
pub const CONFIG_FILE_NAMES: &[&str] = &["kiln.config.toml", "kiln.config.json"];

/// Options forwarded verbatim to the request runtime via the manifest.
///
/// Unknown keys are collected by the loaders (serde_ignored) and
/// rejected there, so the schema stays strict without
/// `deny_unknown_fields`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeOptions {
    /// Whether the runtime advertises itself in a response header.
    #[serde(default = "default_true")]
    pub powered_by_header: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            powered_by_header: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// The validated project configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Emit source maps alongside compiled stylesheets.
    /// Defaults to on for production builds, off for development.
    #[serde(default)]
    pub source_map: Option<bool>,

    #[serde(default)]
    pub runtime_options: RuntimeOptions,
}

impl ProjectConfig {
    /// Resolve the effective source-map setting for a build mode.
    pub fn source_map(&self, mode: BuildMode) -> bool {
        self.source_map.unwrap_or(!mode.is_dev())
    }
}

/// A loaded configuration plus the path it came from (the path is
/// fingerprinted into the manifest for global invalidation).
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: ProjectConfig,
    pub path: PathBuf,
}

/// Find and load the project configuration.
///
/// Loaders are tried in priority order against the project root; the
/// first whose file exists wins. A missing config file is fatal.
pub fn load_config(
    paths: &ProjectPaths,
    loaders: &[Box<dyn ConfigLoader>],
) -> Result<LoadedConfig, ConfigError> {
    for loader in loaders {
        let candidate = paths.root.join(loader.file_name());
        if candidate.is_file() {
            let config = loader.load(&candidate)?;
            return Ok(LoadedConfig {
                config,
                path: candidate,
            });
        }
    }
    Err(ConfigError::Missing(CONFIG_FILE_NAMES))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn test_source_map_default_by_mode() {
        let config = ProjectConfig::default();
        assert!(config.source_map(BuildMode::Production));
        assert!(!config.source_map(BuildMode::Development));

        let explicit = ProjectConfig {
            source_map: Some(true),
            ..ProjectConfig::default()
        };
        assert!(explicit.source_map(BuildMode::Development));
    }

    #[test]
    fn test_toml_wins_over_json() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("kiln.config.toml"), "sourceMap = true\n").unwrap();
        fs::write(dir.path().join("kiln.config.json"), r#"{"sourceMap": false}"#).unwrap();

        let paths = ProjectPaths::new(dir.path());
        let loaded = load_config(&paths, &builtin_loaders()).unwrap();
        assert_eq!(loaded.config.source_map, Some(true));
        assert!(loaded.path.ends_with("kiln.config.toml"));
    }

    #[test]
    fn test_missing_config_is_fatal() {
        let paths = ProjectPaths::new(Path::new("/definitely/not/here"));
        assert!(matches!(
            load_config(&paths, &builtin_loaders()),
            Err(ConfigError::Missing(_))
        ));
    }
}
