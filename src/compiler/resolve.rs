//! Import classification: bundled-inline vs runtime dependency.
//!
//! The boundary decision for every import encountered during graph
//! traversal. Project-relative specifiers resolve with Node-style
//! extension and index probing; a resolution landing under `src/` is
//! internal (bundled), anything else stays a runtime `require`. A
//! relative specifier that fails to resolve is retested against the
//! asset-pipeline filters before being declared unresolvable. Bare
//! specifiers are runtime dependencies; when no `node_modules` entry
//! is found the warning is suppressed, since some imports (the
//! framework runtime itself, peer tooling) legitimately resolve only
//! at request time.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

use crate::core::ProjectPaths;
use crate::debug;
use crate::pipeline::{AssetPipeline, ImageRequest, ModuleRequest, media};
use crate::unit::SCRIPT_EXTENSIONS;

/// Where an import specifier points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A project script, inlined into the bundle.
    Internal(PathBuf),
    /// A non-script asset, handled by a pipeline.
    Asset(ModuleRequest),
    /// Left as an unresolved runtime dependency.
    External(String),
}

/// Classify one import specifier found in `importer`.
pub fn resolve_import(
    specifier: &str,
    importer: &Path,
    paths: &ProjectPaths,
    pipelines: &[Box<dyn AssetPipeline>],
) -> Result<Resolution> {
    let importer_dir = importer.parent().unwrap_or(Path::new("."));

    // optimizeImage virtual modules carry their parameters in the
    // specifier; decode to the structured form immediately.
    if let Some((params, relative)) = media::parse_specifier(specifier) {
        let source = normalize(&importer_dir.join(relative));
        if !source.is_file() {
            bail!(
                "unresolvable image import {:?} in {}",
                relative,
                importer.display()
            );
        }
        return Ok(Resolution::Asset(ModuleRequest::OptimizedImage(
            ImageRequest { source, params },
        )));
    }

    if specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/') {
        let base = if specifier.starts_with('/') {
            PathBuf::from(specifier)
        } else {
            importer_dir.join(specifier)
        };

        if let Some(resolved) = probe(&base) {
            if !resolved.starts_with(&paths.src) {
                // Resolved outside the source tree: a runtime concern.
                return Ok(Resolution::External(specifier.to_string()));
            }
            let request = ModuleRequest::Source(resolved.clone());
            if pipelines.iter().any(|p| p.claims(&request)) {
                return Ok(Resolution::Asset(request));
            }
            return Ok(Resolution::Internal(resolved));
        }

        bail!(
            "unresolvable internal import {:?} in {}",
            specifier,
            importer.display()
        );
    }

    // Bare specifier: a package dependency, resolved at request time.
    if !package_exists(specifier, importer_dir, &paths.root) {
        debug!(
            "resolve";
            "{:?} not found in node_modules (deferred to runtime)", specifier
        );
    }
    Ok(Resolution::External(specifier.to_string()))
}

/// Node-style probing: exact file, appended script extensions, then
/// directory index files.
fn probe(base: &Path) -> Option<PathBuf> {
    if base.is_file() {
        return Some(normalize(base));
    }

    let name = base.file_name()?.to_str()?;
    for ext in SCRIPT_EXTENSIONS {
        let candidate = base.with_file_name(format!("{name}.{ext}"));
        if candidate.is_file() {
            return Some(normalize(&candidate));
        }
    }

    if base.is_dir() {
        for ext in SCRIPT_EXTENSIONS {
            let candidate = base.join(format!("index.{ext}"));
            if candidate.is_file() {
                return Some(normalize(&candidate));
            }
        }
    }

    None
}

/// Walk `node_modules` directories from the importer up to the
/// project root looking for the package.
fn package_exists(specifier: &str, importer_dir: &Path, root: &Path) -> bool {
    let package = package_name(specifier);
    let mut dir = Some(importer_dir);
    while let Some(current) = dir {
        if current.join("node_modules").join(package).exists() {
            return true;
        }
        if current == root {
            break;
        }
        dir = current.parent();
    }
    false
}

/// `@scope/pkg/sub` -> `@scope/pkg`; `pkg/sub` -> `pkg`.
fn package_name(specifier: &str) -> &str {
    let mut segments = specifier.splitn(3, '/');
    match (segments.next(), segments.next()) {
        (Some(scope), Some(name)) if scope.starts_with('@') => {
            &specifier[..scope.len() + 1 + name.len()]
        }
        (Some(name), _) => name,
        (None, _) => specifier,
    }
}

/// Lexically remove `.` and `..` components so registry keys and
/// `src/`-prefix checks are stable.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
