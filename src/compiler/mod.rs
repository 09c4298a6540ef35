//! Module graph compiler.
//!
//! For one entry-point unit: resolve the full import graph, classify
//! every import as internal (bundled) or external (runtime `require`),
//! run the asset pipelines for non-script imports, and write a single
//! CommonJS file at the unit's mirrored `dist/` destination.
//!
//! The compiler reports everything it touched: the transitive set of
//! files read (the unit's `requires` checksums) and every file emitted
//! along the way (the unit's `emitted` checksums). The orchestrator
//! folds both into the manifest.

pub mod emit;
pub mod resolve;
pub mod transform;

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;

use crate::checksum::{FingerprintCache, fingerprint_bytes};
use crate::core::ProjectPaths;
use crate::debug;
use crate::pipeline::{
    AssetPipeline, EmitLog, LoadContext, Locator, ModuleRequest, media,
};
use crate::unit::SourceUnit;

use emit::LinkTarget;
use resolve::Resolution;

/// Checksum material produced by compiling one unit.
#[derive(Debug, Clone, Default)]
pub struct CompiledUnit {
    /// Project-relative path -> fingerprint of every file the output
    /// depends on (entry, inlined scripts, consulted assets).
    pub requires: BTreeMap<String, String>,
    /// Project-relative path -> fingerprint of every file written
    /// (the bundle itself plus pipeline emissions).
    pub emitted: BTreeMap<String, String>,
}

/// One compiler instance serves a whole build; per-unit state lives in
/// the traversal, so units compile in parallel safely.
pub struct Compiler<'a> {
    paths: &'a ProjectPaths,
    pipelines: &'a [Box<dyn AssetPipeline>],
    locator: Locator,
    cache: &'a FingerprintCache,
    source_map: bool,
}

/// One module awaiting registration.
enum Pending {
    Script(String, PathBuf),
    Asset(String, ModuleRequest),
}

impl<'a> Compiler<'a> {
    pub fn new(
        paths: &'a ProjectPaths,
        pipelines: &'a [Box<dyn AssetPipeline>],
        cache: &'a FingerprintCache,
        source_map: bool,
    ) -> Self {
        Self {
            paths,
            pipelines,
            locator: Locator::new(paths),
            cache,
            source_map,
        }
    }

    /// Compile one entry-point unit to its `dist/` destination.
    pub fn compile_unit(&self, unit: &SourceUnit) -> Result<CompiledUnit> {
        let mut emit_log = EmitLog::default();
        let mut registered: Vec<(String, String)> = Vec::new();
        let mut visited: FxHashSet<String> = FxHashSet::default();

        let entry_key = unit.relative.clone();
        visited.insert(entry_key.clone());

        let mut queue = VecDeque::new();
        queue.push_back(Pending::Script(entry_key.clone(), unit.path.clone()));

        while let Some(pending) = queue.pop_front() {
            match pending {
                Pending::Script(key, path) => {
                    let source = fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    emit_log.record_read(&path);
                    self.cache.record(&path, fingerprint_bytes(&source));

                    let lowered = transform::lower_to_js(&path, &source)?;
                    let body = self.link(&path, &lowered, &mut queue, &mut visited)?;
                    registered.push((key, body));
                }
                Pending::Asset(key, request) => {
                    let pipeline = self
                        .pipelines
                        .iter()
                        .find(|p| p.claims(&request))
                        .ok_or_else(|| anyhow!("no pipeline claims {key:?}"))?;
                    debug!("compile"; "{} -> {}", pipeline.name(), key);

                    let mut cx = LoadContext {
                        locator: &self.locator,
                        emit: &mut emit_log,
                        cache: self.cache,
                        source_map: self.source_map,
                    };
                    let loaded = pipeline.load(&request, &mut cx)?;

                    // Synthetic bodies are TSX; they go through the
                    // same lowering and linking as on-disk modules.
                    let source_path = request.source_path().to_path_buf();
                    let pseudo = source_path.with_extension("tsx");
                    let lowered = transform::lower_to_js(&pseudo, &loaded.code)?;
                    let body = self.link(&source_path, &lowered, &mut queue, &mut visited)?;
                    registered.push((key, body));
                }
            }
        }

        // Join point: every module registered, write the bundle.
        let bundle_text = emit::bundle(&entry_key, &registered);
        let dest = self.paths.dist_target(&unit.path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&dest, &bundle_text)
            .with_context(|| format!("failed to write {}", dest.display()))?;

        let dest_hash = fingerprint_bytes(&bundle_text);
        self.cache.record(&dest, dest_hash);

        let mut compiled = CompiledUnit::default();
        for path in &emit_log.reads {
            let hash = self
                .cache
                .file(path)
                .with_context(|| format!("failed to fingerprint {}", path.display()))?;
            compiled
                .requires
                .insert(self.paths.relative(path), hash.to_hex());
        }
        for (path, hash) in &emit_log.writes {
            compiled
                .emitted
                .insert(self.paths.relative(path), hash.to_hex());
        }
        compiled
            .emitted
            .insert(self.paths.relative(&dest), dest_hash.to_hex());

        Ok(compiled)
    }

    /// Resolve a lowered module's imports, enqueue newly-discovered
    /// modules, and splice the body into registry form.
    fn link(
        &self,
        module_path: &Path,
        lowered: &str,
        queue: &mut VecDeque<Pending>,
        visited: &mut FxHashSet<String>,
    ) -> Result<String> {
        let specifiers = emit::collect_specifiers(module_path, lowered)?;

        let mut links: FxHashMap<String, LinkTarget> = FxHashMap::default();
        for specifier in specifiers {
            if links.contains_key(&specifier) {
                continue;
            }
            let target = match resolve::resolve_import(
                &specifier,
                module_path,
                self.paths,
                self.pipelines,
            )? {
                Resolution::Internal(path) => {
                    let key = self.paths.relative(&path);
                    if visited.insert(key.clone()) {
                        queue.push_back(Pending::Script(key.clone(), path));
                    }
                    LinkTarget::Registry(key)
                }
                Resolution::Asset(request) => {
                    let key = self.asset_key(&request);
                    if visited.insert(key.clone()) {
                        queue.push_back(Pending::Asset(key.clone(), request));
                    }
                    LinkTarget::Registry(key)
                }
                Resolution::External(spec) => LinkTarget::Require(spec),
            };
            links.insert(specifier, target);
        }

        emit::link_module(module_path, lowered, &links)
    }

    /// Registry key for an asset module. Structured requests flatten
    /// to a string only here, at the registry boundary.
    fn asset_key(&self, request: &ModuleRequest) -> String {
        match request {
            ModuleRequest::Source(path) => self.paths.relative(path),
            ModuleRequest::OptimizedImage(req) => {
                media::encode_specifier(&req.params, &self.paths.relative(&req.source))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::standard_pipelines;
    use crate::unit::{SourceUnit, UnitKind};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        paths: ProjectPaths,
        pipelines: Vec<Box<dyn AssetPipeline>>,
    }

    impl Harness {
        fn new(files: &[(&str, &str)]) -> Self {
            let dir = TempDir::new().unwrap();
            for (file, contents) in files {
                let path = dir.path().join(file);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(&path, contents).unwrap();
            }
            Self {
                paths: ProjectPaths::new(dir.path()),
                pipelines: standard_pipelines(),
                _dir: dir,
            }
        }

        fn compile(&self, unit_path: &str) -> CompiledUnit {
            let cache = FingerprintCache::new();
            let compiler = Compiler::new(&self.paths, &self.pipelines, &cache, false);
            let path = self.paths.root.join(unit_path);
            let unit = SourceUnit {
                relative: self.paths.relative(&path),
                path,
                kind: UnitKind::Page,
            };
            compiler.compile_unit(&unit).unwrap()
        }
    }

    #[test]
    fn test_bundles_internal_graph() {
        let harness = Harness::new(&[
            (
                "src/lib/util.ts",
                "export function greet(name: string): string { return \"hi \" + name; }\n",
            ),
            (
                "src/pages/index.tsx",
                "import { greet } from \"../lib/util\";\nexport default function Page() { return greet(\"kiln\"); }\n",
            ),
        ]);

        let compiled = harness.compile("src/pages/index.tsx");

        let dist = harness.paths.root.join(".kiln/dist/pages/index.js");
        let bundle = fs::read_to_string(&dist).unwrap();
        assert!(bundle.contains("__register(\"src/pages/index.tsx\""));
        assert!(bundle.contains("__register(\"src/lib/util.ts\""));
        assert!(bundle.ends_with("module.exports = __load(\"src/pages/index.tsx\");\n"));
        // TypeScript annotations are gone.
        assert!(!bundle.contains(": string"));

        assert!(compiled.requires.contains_key("src/pages/index.tsx"));
        assert!(compiled.requires.contains_key("src/lib/util.ts"));
        assert!(compiled.emitted.contains_key(".kiln/dist/pages/index.js"));
    }

    #[test]
    fn test_css_module_flows_through_pipeline() {
        let harness = Harness::new(&[
            ("src/pages/Button.module.css", ".primary { color: red }\n"),
            (
                "src/pages/index.tsx",
                "import styles from \"./Button.module.css\";\nexport default function Page() { return styles.primary; }\n",
            ),
        ]);

        let compiled = harness.compile("src/pages/index.tsx");

        // The stylesheet is a requires entry and its emission is tracked.
        assert!(compiled.requires.contains_key("src/pages/Button.module.css"));
        assert!(
            compiled
                .emitted
                .keys()
                .any(|k| k.starts_with(".kiln/static/css/Button."))
        );

        let bundle =
            fs::read_to_string(harness.paths.root.join(".kiln/dist/pages/index.js")).unwrap();
        // Synthetic stylesheet module registered under its source key,
        // with the runtime registration left external.
        assert!(bundle.contains("__register(\"src/pages/Button.module.css\""));
        assert!(bundle.contains("require(\"@kiln/runtime\")"));
        assert!(bundle.contains("\"primary\":"));
    }

    #[test]
    fn test_external_imports_stay_require() {
        let harness = Harness::new(&[(
            "src/pages/index.tsx",
            "import { createElement } from \"react\";\nexport default () => createElement(\"div\");\n",
        )]);

        harness.compile("src/pages/index.tsx");
        let bundle =
            fs::read_to_string(harness.paths.root.join(".kiln/dist/pages/index.js")).unwrap();
        assert!(bundle.contains("require(\"react\")"));
        assert!(!bundle.contains("__register(\"react\""));
    }

    #[test]
    fn test_shared_dependency_registered_once() {
        let harness = Harness::new(&[
            ("src/lib/shared.ts", "export const n = 1;\n"),
            (
                "src/lib/a.ts",
                "import { n } from \"./shared\";\nexport const a = n;\n",
            ),
            (
                "src/pages/index.tsx",
                "import { a } from \"../lib/a\";\nimport { n } from \"../lib/shared\";\nexport default a + n;\n",
            ),
        ]);

        harness.compile("src/pages/index.tsx");
        let bundle =
            fs::read_to_string(harness.paths.root.join(".kiln/dist/pages/index.js")).unwrap();
        assert_eq!(bundle.matches("__register(\"src/lib/shared.ts\"").count(), 1);
    }

    #[test]
    fn test_deterministic_output() {
        let files = [
            ("src/lib/util.ts", "export const x = 1;\n"),
            (
                "src/pages/index.tsx",
                "import { x } from \"../lib/util\";\nexport default x;\n",
            ),
        ];
        let harness = Harness::new(&files);

        harness.compile("src/pages/index.tsx");
        let first =
            fs::read_to_string(harness.paths.root.join(".kiln/dist/pages/index.js")).unwrap();
        harness.compile("src/pages/index.tsx");
        let second =
            fs::read_to_string(harness.paths.root.join(".kiln/dist/pages/index.js")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unresolvable_internal_import_fails() {
        let harness = Harness::new(&[(
            "src/pages/index.tsx",
            "import { x } from \"./missing\";\nexport default x;\n",
        )]);

        let cache = FingerprintCache::new();
        let compiler = Compiler::new(&harness.paths, &harness.pipelines, &cache, false);
        let path = harness.paths.root.join("src/pages/index.tsx");
        let unit = SourceUnit {
            relative: harness.paths.relative(&path),
            path,
            kind: UnitKind::Page,
        };
        assert!(compiler.compile_unit(&unit).is_err());
    }
}
