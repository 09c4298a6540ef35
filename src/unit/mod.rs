//! Source unit discovery.
//!
//! A unit is one script file under `src/` that compiles to exactly one
//! output script under `dist/`. Discovery runs once at the start of a
//! build; the unit set is immutable for the rest of the pass.

use std::path::{Path, PathBuf};

use jwalk::WalkDir;

use crate::core::ProjectPaths;

/// Script extensions that form compilable units.
pub const SCRIPT_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx"];

/// Middleware filename candidates, in priority order.
///
/// When several exist side by side, the first match wins; the order is
/// fixed so the choice never depends on directory enumeration.
const MIDDLEWARE_CANDIDATES: &[&str] = &[
    "middleware.ts",
    "middleware.tsx",
    "middleware.js",
    "middleware.jsx",
];

/// What a unit is for, derived from its location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// Lives under `src/pages`; contributes a route.
    Page,
    /// `src/middleware.<ext>`; at most one per project.
    Middleware,
    /// Any other script under `src/`.
    Module,
}

/// One discovered source unit.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    /// Absolute path to the source file.
    pub path: PathBuf,
    /// Project-relative path with `/` separators (manifest key).
    pub relative: String,
    pub kind: UnitKind,
}

/// Check whether a path has a compilable script extension.
pub fn is_script(path: &Path) -> bool {
    // Declaration files produce no runtime code.
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if name.ends_with(".d.ts") {
        return false;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SCRIPT_EXTENSIONS.contains(&ext))
}

/// Enumerate all source units under `src/`, sorted by relative path.
pub fn discover_units(paths: &ProjectPaths) -> Vec<SourceUnit> {
    let mut files: Vec<PathBuf> = WalkDir::new(&paths.src)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path())
        .filter(|p| is_script(p))
        .filter(|p| !p.components().any(|c| c.as_os_str() == "node_modules"))
        .collect();
    files.sort();

    let middleware = find_middleware(paths);

    files
        .into_iter()
        .map(|path| {
            let kind = if Some(&path) == middleware.as_ref() {
                UnitKind::Middleware
            } else if path.starts_with(&paths.src_pages) {
                UnitKind::Page
            } else {
                UnitKind::Module
            };
            SourceUnit {
                relative: paths.relative(&path),
                path,
                kind,
            }
        })
        .collect()
}

/// Locate the middleware unit, if any, by fixed extension precedence.
fn find_middleware(paths: &ProjectPaths) -> Option<PathBuf> {
    MIDDLEWARE_CANDIDATES
        .iter()
        .map(|name| paths.src.join(name))
        .find(|candidate| candidate.is_file())
}
