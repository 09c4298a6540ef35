//! Project directory layout.
//!
//! Everything the build reads lives under `src/`; everything it writes
//! lives under `.kiln/`. The runtime only ever reads `.kiln/`.

use std::path::{Path, PathBuf};

/// Resolved absolute paths for one project.
///
/// ```text
/// project/
/// ├── kiln.config.toml      config (or kiln.config.json)
/// ├── src/                  source tree (the internal-import boundary)
/// │   ├── pages/            page units -> routes
/// │   └── middleware.ts     optional middleware unit
/// └── .kiln/                build output
///     ├── bundle.json       build manifest
///     ├── package.json      module-type descriptor
///     ├── dist/             compiled scripts, mirrored from src/
///     └── static/           content-addressed assets (css/, media/)
/// ```
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub src: PathBuf,
    pub src_pages: PathBuf,
    pub output: PathBuf,
    pub dist: PathBuf,
    pub output_static: PathBuf,
    pub bundle_manifest: PathBuf,
    pub package_descriptor: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: &Path) -> Self {
        let root = root.to_path_buf();
        let src = root.join("src");
        let output = root.join(".kiln");
        Self {
            src_pages: src.join("pages"),
            dist: output.join("dist"),
            output_static: output.join("static"),
            bundle_manifest: output.join("bundle.json"),
            package_descriptor: output.join("package.json"),
            root,
            src,
            output,
        }
    }

    /// Compiled destination for a source unit, mirrored from `src/`.
    ///
    /// `src/pages/blog/index.tsx` -> `.kiln/dist/pages/blog/index.js`
    pub fn dist_target(&self, unit_path: &Path) -> PathBuf {
        let rel = unit_path.strip_prefix(&self.src).unwrap_or(unit_path);
        self.dist.join(rel).with_extension("js")
    }

    /// Express a path relative to the project root, with `/` separators
    /// (manifest keys must not vary by platform).
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let mut out = String::new();
        for component in rel.components() {
            if !out.is_empty() {
                out.push('/');
            }
            out.push_str(&component.as_os_str().to_string_lossy());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = ProjectPaths::new(Path::new("/proj"));
        assert_eq!(paths.output, Path::new("/proj/.kiln"));
        assert_eq!(paths.bundle_manifest, Path::new("/proj/.kiln/bundle.json"));
        assert_eq!(paths.src_pages, Path::new("/proj/src/pages"));
    }

    #[test]
    fn test_dist_target_mirrors_src() {
        let paths = ProjectPaths::new(Path::new("/proj"));
        assert_eq!(
            paths.dist_target(Path::new("/proj/src/pages/blog/index.tsx")),
            Path::new("/proj/.kiln/dist/pages/blog/index.js")
        );
        assert_eq!(
            paths.dist_target(Path::new("/proj/src/middleware.ts")),
            Path::new("/proj/.kiln/dist/middleware.js")
        );
    }

    #[test]
    fn test_relative_uses_forward_slashes() {
        let paths = ProjectPaths::new(Path::new("/proj"));
        assert_eq!(
            paths.relative(Path::new("/proj/src/pages/index.tsx")),
            "src/pages/index.tsx"
        );
    }
}
