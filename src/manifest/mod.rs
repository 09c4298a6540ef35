//! The build manifest (`bundle.json`).
//!
//! The manifest is the contract between the build and the request
//! runtime: routes, runtime options, and the per-unit checksum records
//! the next build uses for reuse decisions. A previous manifest is only
//! ever loaded read-only for comparison; the new one is written as the
//! final step of a successful build, so a failed build can never
//! clobber a valid manifest with a corrupt one.

use std::fs;
use std::io;
use std::collections::BTreeMap;

use anyhow::{Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::config::RuntimeOptions;
use crate::core::ProjectPaths;
use crate::log;
use crate::route::RouteDescriptor;

/// Builder version stamped into every manifest.
pub const BUILDER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Per-unit dependency and output fingerprints.
///
/// A record proves a unit reusable iff every `requires` entry AND every
/// `emitted` entry still fingerprints to the stored value. Checking the
/// emitted side guards against output files corrupted or deleted behind
/// the build's back, not just source edits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChecksumRecord {
    /// Project-relative path of every file the compiled output depends
    /// on, mapped to its fingerprint at build time.
    pub requires: BTreeMap<String, String>,
    /// Project-relative path of every file emitted for this unit,
    /// mapped to its fingerprint at build time.
    pub emitted: BTreeMap<String, String>,
}

/// Fingerprints of the project's own configuration inputs. Any change
/// here invalidates every cached unit unconditionally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigChecksums {
    /// The kiln config file.
    pub config: String,
    /// `tsconfig.json`, when the project has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tsconfig: Option<String>,
}

/// The persisted build manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BuildManifest {
    pub version: String,
    pub runtime_options: RuntimeOptions,
    /// Route table, pre-sorted by specificity.
    pub pages: Vec<RouteDescriptor>,
    /// Compiled middleware destination, when the project has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middleware: Option<String>,
    pub config_checksums: ConfigChecksums,
    /// Unit path -> checksum record.
    pub checksums: BTreeMap<String, ChecksumRecord>,
}

impl BuildManifest {
    pub fn new(runtime_options: RuntimeOptions, config_checksums: ConfigChecksums) -> Self {
        Self {
            version: BUILDER_VERSION.to_string(),
            runtime_options,
            pages: Vec::new(),
            middleware: None,
            config_checksums,
            checksums: BTreeMap::new(),
        }
    }
}

/// Semantic-version compatibility between builder and manifest.
///
/// Same major is compatible; while the major is 0 the minor must match
/// too (pre-1.0 minors may change the manifest shape).
fn version_compatible(current: &Version, stored: &Version) -> bool {
    current.major == stored.major && (current.major != 0 || current.minor == stored.minor)
}

/// Load the previous manifest if it exists and is usable.
///
/// Missing file, corrupt JSON, schema mismatch, or an incompatible
/// version all degrade to `None` ("build as if no cache existed") with
/// a warning; only unexpected I/O errors are fatal.
pub fn load_previous(paths: &ProjectPaths) -> Result<Option<BuildManifest>> {
    let text = match fs::read_to_string(&paths.bundle_manifest) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| {
                format!("failed to read {}", paths.bundle_manifest.display())
            });
        }
    };

    let parsed: BuildManifest = match serde_json::from_str(&text) {
        Ok(parsed) => parsed,
        Err(e) => {
            log!("cache"; "discarding previous manifest: {}", e);
            return Ok(None);
        }
    };

    match (Version::parse(BUILDER_VERSION), Version::parse(&parsed.version)) {
        (Ok(current), Ok(stored)) if version_compatible(&current, &stored) => Ok(Some(parsed)),
        (Ok(current), Ok(stored)) => {
            log!(
                "cache";
                "builder v{} does not satisfy previous bundle v{}, rebuilding from scratch",
                current, stored
            );
            Ok(None)
        }
        _ => {
            log!("cache"; "previous manifest has an unparseable version, rebuilding from scratch");
            Ok(None)
        }
    }
}

/// Persist the manifest and the module-type descriptor.
///
/// Called exactly once, after every unit has been processed.
pub fn write(paths: &ProjectPaths, manifest: &BuildManifest) -> Result<()> {
    fs::create_dir_all(&paths.output)
        .with_context(|| format!("failed to create {}", paths.output.display()))?;

    let json = serde_json::to_string(manifest).context("failed to serialize manifest")?;
    fs::write(&paths.bundle_manifest, json)
        .with_context(|| format!("failed to write {}", paths.bundle_manifest.display()))?;

    // Emitted scripts are CommonJS; tell the module loader so.
    fs::write(&paths.package_descriptor, r#"{"type":"commonjs"}"#).with_context(|| {
        format!("failed to write {}", paths.package_descriptor.display())
    })?;

    Ok(())
}
