//! Incremental build orchestrator.
//!
//! One build invocation is a fixed sequence: discover units, load and
//! validate config, load the previous manifest (version and
//! config-fingerprint gated), compute the route table, decide reuse
//! per unit, statically verify the stale set, compile it, and persist
//! the new manifest. The manifest write is the single join barrier —
//! nothing is persisted until every unit has finished, so a failed
//! build can never leave a manifest describing a half-consistent
//! output tree.

pub mod check;
mod stale;

use std::path::Path;

use anyhow::{Context, Result, bail};
use rayon::prelude::*;

use crate::checksum::FingerprintCache;
use crate::compiler::Compiler;
use crate::config::{self, builtin_loaders};
use crate::core::{BuildMode, ProjectPaths};
use crate::manifest::{self, BuildManifest, ChecksumRecord, ConfigChecksums};
use crate::pipeline::standard_pipelines;
use crate::route::route_table;
use crate::unit::{SourceUnit, UnitKind, discover_units};
use crate::{debug, log};

use check::{NoCheck, StaticCheck};

/// Orchestrator inputs.
pub struct BuildOptions {
    pub mode: BuildMode,
    pub checker: Box<dyn StaticCheck>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            mode: BuildMode::Production,
            checker: Box::new(NoCheck),
        }
    }
}

/// Outcome of a successful build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSummary {
    /// Units actually sent through the compiler.
    pub compiled: usize,
    /// Units whose previous record verified and was carried forward.
    pub reused: usize,
    pub pages: usize,
}

/// Run one full build for the project at `root`.
pub fn build(root: &Path, options: &BuildOptions) -> Result<BuildSummary> {
    let paths = ProjectPaths::new(root);
    let cache = FingerprintCache::new();

    // 1. Discover source units.
    let units = discover_units(&paths);
    debug!("discover"; "{} source units", units.len());

    // 2. Load and validate configuration. Failure here is fatal and
    // leaves the output directory untouched.
    let loaded = config::load_config(&paths, &builtin_loaders())?;
    let source_map = loaded.config.source_map(options.mode);

    let config_checksums = ConfigChecksums {
        config: cache
            .file(&loaded.path)
            .with_context(|| format!("failed to fingerprint {}", loaded.path.display()))?
            .to_hex(),
        tsconfig: tsconfig_checksum(&paths, &cache)?,
    };

    // 3. Previous manifest, discarded wholesale if the project
    // configuration changed since it was written.
    let previous = manifest::load_previous(&paths)?.filter(|prev| {
        if prev.config_checksums == config_checksums {
            true
        } else {
            log!("cache"; "configuration changed, discarding previous manifest");
            false
        }
    });

    // 4. Route table, sorted before it ever reaches the manifest.
    let mut new_manifest =
        BuildManifest::new(loaded.config.runtime_options.clone(), config_checksums);
    new_manifest.pages = route_table(&paths, &units);
    new_manifest.middleware = units
        .iter()
        .find(|u| u.kind == UnitKind::Middleware)
        .map(|u| paths.relative(&paths.dist_target(&u.path)));

    // 5. Reuse decision, independently per unit.
    let reusable: Vec<Option<ChecksumRecord>> = units
        .par_iter()
        .map(|unit| {
            previous
                .as_ref()
                .and_then(|prev| prev.checksums.get(&unit.relative))
                .filter(|record| stale::record_verifies(record, &paths.root, &cache))
                .cloned()
        })
        .collect();

    let stale_units: Vec<&SourceUnit> = units
        .iter()
        .zip(&reusable)
        .filter(|(_, record)| record.is_none())
        .map(|(unit, _)| unit)
        .collect();

    // 6. Static verification over exactly the stale units, before any
    // compilation starts.
    let diagnostics = options.checker.check(&stale_units)?;
    if !diagnostics.is_empty() {
        for diagnostic in &diagnostics {
            if diagnostic.unit.is_empty() {
                log!("error"; "{}", diagnostic.message);
            } else {
                log!("error"; "{}: {}", diagnostic.unit, diagnostic.message);
            }
        }
        bail!(
            "static verification failed with {} error(s)",
            diagnostics.len()
        );
    }

    // 7. Compile the stale units. Fresh units carry their previous
    // record forward untouched.
    let pipelines = standard_pipelines();
    let compiler = Compiler::new(&paths, &pipelines, &cache, source_map);
    let compiled: Vec<(String, ChecksumRecord)> = stale_units
        .par_iter()
        .map(|unit| {
            log!("compile"; "{}", unit.relative);
            compiler.compile_unit(unit).map(|result| {
                (
                    unit.relative.clone(),
                    ChecksumRecord {
                        requires: result.requires,
                        emitted: result.emitted,
                    },
                )
            })
        })
        .collect::<Result<_>>()?;
    let compiled_count = compiled.len();

    for (unit, record) in units.iter().zip(reusable) {
        if let Some(record) = record {
            debug!("cache"; "reusing {}", unit.relative);
            new_manifest.checksums.insert(unit.relative.clone(), record);
        }
    }
    for (key, record) in compiled {
        new_manifest.checksums.insert(key, record);
    }

    // 8. Persist, strictly after all per-unit work completed.
    manifest::write(&paths, &new_manifest)?;

    let summary = BuildSummary {
        compiled: compiled_count,
        reused: units.len() - compiled_count,
        pages: new_manifest.pages.len(),
    };
    log!(
        "build";
        "{} compiled, {} reused, {} page(s)",
        summary.compiled, summary.reused, summary.pages
    );
    Ok(summary)
}

fn tsconfig_checksum(paths: &ProjectPaths, cache: &FingerprintCache) -> Result<Option<String>> {
    let tsconfig = paths.root.join("tsconfig.json");
    if !tsconfig.is_file() {
        return Ok(None);
    }
    let hash = cache
        .file(&tsconfig)
        .with_context(|| format!("failed to fingerprint {}", tsconfig.display()))?;
    Ok(Some(hash.to_hex()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::check::CheckDiagnostic;
    use std::fs;
    use tempfile::TempDir;

    const CONFIG: &str = "sourceMap = false\n";
    const PAGE: &str = "export default function Page() { return <div>hi</div>; }\n";

    fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("kiln.config.toml"), CONFIG).unwrap();
        for (file, contents) in files {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, contents).unwrap();
        }
        dir
    }

    fn run(dir: &TempDir) -> Result<BuildSummary> {
        build(dir.path(), &BuildOptions::default())
    }

    fn manifest_json(dir: &TempDir) -> serde_json::Value {
        let text = fs::read_to_string(dir.path().join(".kiln/bundle.json")).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn test_fresh_project_single_page() {
        let dir = project(&[("src/pages/index.tsx", PAGE)]);

        let summary = run(&dir).unwrap();
        assert_eq!(summary.compiled, 1);
        assert_eq!(summary.reused, 0);
        assert_eq!(summary.pages, 1);

        assert!(dir.path().join(".kiln/dist/pages/index.js").is_file());
        assert_eq!(
            fs::read_to_string(dir.path().join(".kiln/package.json")).unwrap(),
            r#"{"type":"commonjs"}"#
        );

        let manifest = manifest_json(&dir);
        assert_eq!(manifest["pages"][0]["route"], "/");
        assert_eq!(manifest["pages"][0]["src"], ".kiln/dist/pages/index.js");
        assert_eq!(manifest["checksums"].as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_noop_rebuild_reuses_everything() {
        let dir = project(&[
            ("src/pages/index.tsx", PAGE),
            ("src/pages/about.tsx", PAGE),
        ]);

        run(&dir).unwrap();
        let first = fs::read(dir.path().join(".kiln/bundle.json")).unwrap();

        let summary = run(&dir).unwrap();
        assert_eq!(summary.compiled, 0);
        assert_eq!(summary.reused, 2);

        let second = fs::read(dir.path().join(".kiln/bundle.json")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_single_change_recompiles_only_that_unit() {
        let dir = project(&[
            ("src/pages/index.tsx", PAGE),
            ("src/pages/about.tsx", PAGE),
        ]);
        run(&dir).unwrap();

        fs::write(
            dir.path().join("src/pages/about.tsx"),
            "export default function Page() { return <div>changed</div>; }\n",
        )
        .unwrap();

        let summary = run(&dir).unwrap();
        assert_eq!(summary.compiled, 1);
        assert_eq!(summary.reused, 1);
    }

    #[test]
    fn test_shared_dependency_staleness() {
        let dir = project(&[
            ("src/lib/shared.ts", "export const n = 1;\n"),
            (
                "src/pages/index.tsx",
                "import { n } from \"../lib/shared\";\nexport default () => n;\n",
            ),
            ("src/pages/about.tsx", PAGE),
        ]);
        run(&dir).unwrap();

        fs::write(dir.path().join("src/lib/shared.ts"), "export const n = 2;\n").unwrap();

        // shared.ts is itself a unit AND a dependency of index; about
        // is untouched.
        let summary = run(&dir).unwrap();
        assert_eq!(summary.compiled, 2);
        assert_eq!(summary.reused, 1);
    }

    #[test]
    fn test_corrupted_output_recompiles_unit() {
        let dir = project(&[("src/pages/index.tsx", PAGE)]);
        run(&dir).unwrap();

        fs::write(dir.path().join(".kiln/dist/pages/index.js"), "garbage").unwrap();

        let summary = run(&dir).unwrap();
        assert_eq!(summary.compiled, 1);
    }

    #[test]
    fn test_config_change_invalidates_everything() {
        let dir = project(&[
            ("src/pages/index.tsx", PAGE),
            ("src/pages/about.tsx", PAGE),
        ]);
        run(&dir).unwrap();

        // Semantically identical config, different bytes.
        fs::write(
            dir.path().join("kiln.config.toml"),
            format!("{CONFIG}# touched\n"),
        )
        .unwrap();

        let summary = run(&dir).unwrap();
        assert_eq!(summary.compiled, 2);
        assert_eq!(summary.reused, 0);
    }

    #[test]
    fn test_css_module_end_to_end() {
        let dir = project(&[
            ("src/pages/Button.module.css", ".primary { color: red }\n"),
            (
                "src/pages/index.tsx",
                "import styles from \"./Button.module.css\";\nexport default function Page() { return <div className={styles.primary}>hi</div>; }\n",
            ),
        ]);

        run(&dir).unwrap();

        let css_dir = dir.path().join(".kiln/static/css");
        let emitted: Vec<_> = fs::read_dir(&css_dir).unwrap().collect();
        assert_eq!(emitted.len(), 1);
        let css = fs::read_to_string(emitted[0].as_ref().unwrap().path()).unwrap();

        let pattern = regex::Regex::new(r"\.primary-[0-9a-f]{8}").unwrap();
        assert!(pattern.is_match(&css), "unexpected css: {css}");

        let bundle =
            fs::read_to_string(dir.path().join(".kiln/dist/pages/index.js")).unwrap();
        let export_pattern =
            regex::Regex::new(r#""primary":\s*"primary-[0-9a-f]{8}""#).unwrap();
        assert!(export_pattern.is_match(&bundle), "unexpected bundle: {bundle}");
    }

    #[test]
    fn test_invalid_config_aborts_and_preserves_manifest() {
        let dir = project(&[("src/pages/index.tsx", PAGE)]);
        run(&dir).unwrap();
        let before = fs::read(dir.path().join(".kiln/bundle.json")).unwrap();

        fs::write(dir.path().join("kiln.config.toml"), "sourceMap = \"yes\"\n").unwrap();

        assert!(run(&dir).is_err());
        let after = fs::read(dir.path().join(".kiln/bundle.json")).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_missing_config_aborts_before_output() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/pages")).unwrap();
        fs::write(dir.path().join("src/pages/index.tsx"), PAGE).unwrap();

        assert!(run(&dir).is_err());
        assert!(!dir.path().join(".kiln").exists());
    }

    #[test]
    fn test_middleware_recorded() {
        let dir = project(&[
            ("src/pages/index.tsx", PAGE),
            (
                "src/middleware.ts",
                "export default function middleware() {}\n",
            ),
        ]);

        run(&dir).unwrap();
        let manifest = manifest_json(&dir);
        assert_eq!(manifest["middleware"], ".kiln/dist/middleware.js");
    }

    #[test]
    fn test_route_table_sorted() {
        let dir = project(&[
            ("src/pages/index.tsx", PAGE),
            ("src/pages/a.tsx", PAGE),
            ("src/pages/a/:id.tsx", PAGE),
            ("src/pages/a/b.tsx", PAGE),
        ]);

        run(&dir).unwrap();
        let manifest = manifest_json(&dir);
        let routes: Vec<_> = manifest["pages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["route"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(routes, ["/a/b", "/a/:id", "/a", "/"]);
    }

    struct FailCheck;

    impl StaticCheck for FailCheck {
        fn check(&self, units: &[&SourceUnit]) -> Result<Vec<CheckDiagnostic>> {
            Ok(units
                .iter()
                .map(|u| CheckDiagnostic {
                    unit: u.relative.clone(),
                    message: "type error".into(),
                })
                .collect())
        }
    }

    #[test]
    fn test_failed_verification_aborts_before_compiling() {
        let dir = project(&[("src/pages/index.tsx", PAGE)]);

        let options = BuildOptions {
            mode: BuildMode::Production,
            checker: Box::new(FailCheck),
        };
        assert!(build(dir.path(), &options).is_err());

        // Aborted before compilation and before persist.
        assert!(!dir.path().join(".kiln/bundle.json").exists());
        assert!(!dir.path().join(".kiln/dist").exists());
    }

    #[test]
    fn test_verification_skipped_for_fresh_units() {
        let dir = project(&[("src/pages/index.tsx", PAGE)]);
        run(&dir).unwrap();

        // Nothing stale, so the failing checker never fires.
        let options = BuildOptions {
            mode: BuildMode::Production,
            checker: Box::new(FailCheck),
        };
        let summary = build(dir.path(), &options).unwrap();
        assert_eq!(summary.compiled, 0);
    }
}
