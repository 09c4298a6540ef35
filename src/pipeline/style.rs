//! Stylesheet pipeline.
//!
//! Compiles a stylesheet with lightningcss (nesting lowered to plain
//! CSS, minified output, optional source map). Module stylesheets
//! (`*.module.css`) get every local class selector rewritten to a
//! globally-unique name — the class suffixed with the last 8 hex chars
//! of the source content hash — and the name mapping becomes the
//! synthetic default export.
//!
//! `url()` references that resolve to project-local media files are
//! collected first, handed to the media pipeline as a batch, and then
//! rewritten in place to the emitted public paths.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use lightningcss::selector::{Component, Selector};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Features, Targets};
use lightningcss::values::ident::Ident;
use lightningcss::values::url::Url;
use lightningcss::visit_types;
use lightningcss::visitor::{Visit, VisitTypes, Visitor};
use rustc_hash::FxHashMap;

use super::media::{MEDIA_EXTENSIONS, copy_media};
use super::{
    AssetContext, AssetLocation, AssetPipeline, LoadContext, LoadedAsset, ModuleRequest,
    write_emitted,
};
use crate::checksum::fingerprint_bytes;

pub struct StylePipeline;

impl AssetPipeline for StylePipeline {
    fn name(&self) -> &'static str {
        "style"
    }

    fn claims(&self, request: &ModuleRequest) -> bool {
        match request {
            ModuleRequest::Source(path) => path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("css")),
            ModuleRequest::OptimizedImage(_) => false,
        }
    }

    fn load(&self, request: &ModuleRequest, cx: &mut LoadContext<'_>) -> Result<LoadedAsset> {
        let path = request.source_path();
        cx.emit.record_read(path);

        let source =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let source_hash = fingerprint_bytes(&source);

        let mut stylesheet = parse(&source, path)?;

        // Collect url() references, process them as one batch, then
        // substitute the emitted public paths.
        let referenced = collect_urls(&mut stylesheet)?;
        let url_map = emit_referenced_media(path, &referenced, cx)?;

        let class_suffix = is_module(path).then(|| source_hash.suffix8());
        let mut rewriter = Rewriter {
            url_map: &url_map,
            class_suffix: class_suffix.as_deref(),
            class_names: BTreeMap::new(),
        };
        stylesheet
            .visit(&mut rewriter)
            .map_err(|_| anyhow!("stylesheet rewrite failed"))?;
        let class_names = rewriter.class_names;

        let targets = Targets {
            include: Features::Nesting,
            ..Targets::default()
        };
        stylesheet
            .minify(MinifyOptions {
                targets,
                ..MinifyOptions::default()
            })
            .map_err(|e| anyhow!("failed to compile {}: {e}", path.display()))?;

        let mut source_map = parcel_sourcemap::SourceMap::new("/");
        let printed = stylesheet
            .to_css(PrinterOptions {
                minify: true,
                targets,
                source_map: cx.source_map.then_some(&mut source_map),
                ..PrinterOptions::default()
            })
            .map_err(|e| anyhow!("failed to print {}: {e}", path.display()))?;

        let location = cx.locator.css(&AssetContext {
            id: path.to_path_buf(),
            content_hash: fingerprint_bytes(&printed.code),
        });

        if cx.source_map {
            let map_json = source_map
                .to_json(None)
                .map_err(|e| anyhow!("failed to serialize source map: {e}"))?;
            let body = format!(
                "{}\n/*# sourceMappingURL={}.map */",
                printed.code, location.public
            );
            write_emitted(&location, body.as_bytes(), cx)?;

            let map_location = AssetLocation {
                file: PathBuf::from(format!("{}.map", location.file.display())),
                public: format!("{}.map", location.public),
            };
            write_emitted(&map_location, map_json.as_bytes(), cx)?;
        } else {
            write_emitted(&location, printed.code.as_bytes(), cx)?;
        }

        Ok(LoadedAsset {
            code: style_module(&location.public, &class_names),
        })
    }
}

fn is_module(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.ends_with(".module.css"))
}

fn parse<'i>(source: &'i str, path: &Path) -> Result<StyleSheet<'i>> {
    StyleSheet::parse(
        source,
        ParserOptions {
            filename: path.display().to_string(),
            ..ParserOptions::default()
        },
    )
    .map_err(|e| anyhow!("failed to parse {}: {e}", path.display()))
}

/// First visitor pass: gather every url() value.
fn collect_urls(stylesheet: &mut StyleSheet<'_>) -> Result<Vec<String>> {
    struct Collector {
        urls: Vec<String>,
    }

    impl<'i> Visitor<'i> for Collector {
        type Error = Infallible;

        fn visit_types(&self) -> VisitTypes {
            visit_types!(URLS)
        }

        fn visit_url(&mut self, url: &mut Url<'i>) -> Result<(), Self::Error> {
            self.urls.push(url.url.to_string());
            Ok(())
        }
    }

    let mut collector = Collector { urls: Vec::new() };
    stylesheet
        .visit(&mut collector)
        .map_err(|_| anyhow!("stylesheet url scan failed"))?;
    Ok(collector.urls)
}

/// Emit every project-local media file referenced via url().
///
/// References that do not resolve to a local media file (external
/// URLs, fragments, data URIs) pass through untouched.
fn emit_referenced_media(
    stylesheet_path: &Path,
    referenced: &[String],
    cx: &mut LoadContext<'_>,
) -> Result<FxHashMap<String, String>> {
    let base = stylesheet_path.parent().unwrap_or(Path::new("."));
    let mut map = FxHashMap::default();

    for reference in referenced {
        let Some(resolved) = resolve_local_media(base, reference) else {
            continue;
        };
        let location = copy_media(&resolved, cx)?;
        map.insert(reference.clone(), location.public);
    }
    Ok(map)
}

fn resolve_local_media(base: &Path, reference: &str) -> Option<PathBuf> {
    if reference.is_empty()
        || reference.starts_with('#')
        || reference.starts_with("data:")
        || reference.starts_with("//")
        || reference.contains("://")
    {
        return None;
    }

    let candidate = base.join(reference.split(['?', '#']).next().unwrap_or(reference));
    let is_media = candidate
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));

    (is_media && candidate.is_file()).then_some(candidate)
}

/// Second visitor pass: substitute emitted public paths and rewrite
/// module class selectors.
struct Rewriter<'a> {
    url_map: &'a FxHashMap<String, String>,
    class_suffix: Option<&'a str>,
    class_names: BTreeMap<String, String>,
}

impl<'i> Visitor<'i> for Rewriter<'_> {
    type Error = Infallible;

    fn visit_types(&self) -> VisitTypes {
        visit_types!(URLS | SELECTORS)
    }

    fn visit_url(&mut self, url: &mut Url<'i>) -> Result<(), Self::Error> {
        if let Some(public) = self.url_map.get(url.url.as_ref()) {
            url.url = public.clone().into();
        }
        Ok(())
    }

    fn visit_selector(&mut self, selector: &mut Selector<'i>) -> Result<(), Self::Error> {
        let Some(suffix) = self.class_suffix else {
            return Ok(());
        };

        for component in selector.iter_mut_raw_match_order() {
            if let Component::Class(name) = component {
                let replaced = format!("{}-{suffix}", name.0);
                self.class_names.insert(name.0.to_string(), replaced.clone());
                *name = Ident(replaced.into());
            }
        }
        Ok(())
    }
}

/// Synthetic module body: register the emitted stylesheet with the
/// runtime, default-export the class map.
fn style_module(public: &str, class_names: &BTreeMap<String, String>) -> String {
    let url = serde_json::to_string(public).unwrap_or_default();
    let styles = serde_json::to_string(class_names).unwrap_or_else(|_| "{}".into());
    format!(
        "import {{ exportCss }} from \"@kiln/runtime\";\nexportCss({url});\nconst styles = {styles};\nexport default styles;\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::FingerprintCache;
    use crate::core::ProjectPaths;
    use crate::pipeline::{EmitLog, Locator};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        root: PathBuf,
        locator: Locator,
        cache: FingerprintCache,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let paths = ProjectPaths::new(dir.path());
            Self {
                root: dir.path().to_path_buf(),
                locator: Locator::new(&paths),
                cache: FingerprintCache::new(),
                _dir: dir,
            }
        }

        fn load(&self, path: &Path, source_map: bool) -> (LoadedAsset, EmitLog) {
            let mut emit = EmitLog::default();
            let mut cx = LoadContext {
                locator: &self.locator,
                emit: &mut emit,
                cache: &self.cache,
                source_map,
            };
            let asset = StylePipeline
                .load(&ModuleRequest::Source(path.to_path_buf()), &mut cx)
                .unwrap();
            (asset, emit)
        }
    }

    #[test]
    fn test_module_classes_rewritten() {
        let harness = Harness::new();
        let path = harness.root.join("src/Button.module.css");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let source = ".primary { color: red }";
        fs::write(&path, source).unwrap();

        let (asset, emit) = harness.load(&path, false);

        let suffix = fingerprint_bytes(source).suffix8();
        let expected = format!("primary-{suffix}");

        // Synthetic export maps the original name to the rewritten one.
        assert!(asset.code.contains(&format!(r#""primary":"{expected}""#)));
        assert!(asset.code.contains("export default styles"));

        // The emitted stylesheet uses the rewritten selector.
        let emitted = emit
            .writes
            .keys()
            .find(|p| p.extension().is_some_and(|e| e == "css"))
            .unwrap();
        let css = fs::read_to_string(emitted).unwrap();
        assert!(css.contains(&format!(".{expected}")));
        assert!(!css.contains(".primary{"));
    }

    #[test]
    fn test_plain_stylesheet_untouched() {
        let harness = Harness::new();
        let path = harness.root.join("src/app.css");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, ".primary { color: red }").unwrap();

        let (asset, emit) = harness.load(&path, false);

        assert!(asset.code.contains("const styles = {};"));

        let emitted = emit
            .writes
            .keys()
            .find(|p| p.extension().is_some_and(|e| e == "css"))
            .unwrap();
        let css = fs::read_to_string(emitted).unwrap();
        assert!(css.contains(".primary"));
    }

    #[test]
    fn test_url_references_copied_and_rewritten() {
        let harness = Harness::new();
        let css_path = harness.root.join("src/app.css");
        fs::create_dir_all(css_path.parent().unwrap()).unwrap();
        fs::write(harness.root.join("src/bg.png"), b"png bytes").unwrap();
        fs::write(&css_path, r#"body { background: url("./bg.png") }"#).unwrap();

        let (_asset, emit) = harness.load(&css_path, false);

        // The referenced file is a recorded read and an emitted write.
        assert!(emit.reads.contains(&harness.root.join("src/bg.png")));
        let media_write = emit
            .writes
            .keys()
            .find(|p| p.extension().is_some_and(|e| e == "png"))
            .unwrap();
        assert!(media_write.to_string_lossy().contains("/static/media/"));

        let emitted = emit
            .writes
            .keys()
            .find(|p| p.extension().is_some_and(|e| e == "css"))
            .unwrap();
        let css = fs::read_to_string(emitted).unwrap();
        assert!(css.contains("/static/media/bg."));
        assert!(!css.contains("./bg.png"));
    }

    #[test]
    fn test_external_urls_left_alone() {
        let harness = Harness::new();
        let path = harness.root.join("src/app.css");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            r#"body { background: url("https://cdn.example.com/bg.png") }"#,
        )
        .unwrap();

        let (_asset, emit) = harness.load(&path, false);
        let emitted = emit
            .writes
            .keys()
            .find(|p| p.extension().is_some_and(|e| e == "css"))
            .unwrap();
        let css = fs::read_to_string(emitted).unwrap();
        assert!(css.contains("cdn.example.com"));
    }

    #[test]
    fn test_source_map_sibling() {
        let harness = Harness::new();
        let path = harness.root.join("src/app.css");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, ".a { color: blue }").unwrap();

        let (_asset, emit) = harness.load(&path, true);

        let map = emit
            .writes
            .keys()
            .find(|p| p.to_string_lossy().ends_with(".css.map"));
        assert!(map.is_some());

        let emitted = emit
            .writes
            .keys()
            .find(|p| p.extension().is_some_and(|e| e == "css"))
            .unwrap();
        let css = fs::read_to_string(emitted).unwrap();
        assert!(css.contains("sourceMappingURL="));
    }

    #[test]
    fn test_content_addressing_idempotent() {
        let harness = Harness::new();
        let a = harness.root.join("src/a.css");
        let b = harness.root.join("src/b");
        fs::create_dir_all(&b).unwrap();
        fs::create_dir_all(a.parent().unwrap()).unwrap();
        let b = b.join("a.css");
        fs::write(&a, ".x { color: red }").unwrap();
        fs::write(&b, ".x { color: red }").unwrap();

        let (_, emit_a) = harness.load(&a, false);
        let (_, emit_b) = harness.load(&b, false);

        // Same bytes, same stem -> same emitted address.
        let out_a: Vec<_> = emit_a.writes.keys().collect();
        let out_b: Vec<_> = emit_b.writes.keys().collect();
        assert_eq!(out_a, out_b);
    }
}
