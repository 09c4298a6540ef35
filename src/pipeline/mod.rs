//! Asset emission pipelines.
//!
//! Each pipeline claims a class of non-script imports encountered
//! during module-graph traversal, transforms the asset, writes the
//! result to a content-addressed location, and returns a synthetic
//! module body that stands in for the original source (exporting a
//! public URL, a class-name map, a wrapped component). Every file a
//! pipeline reads or writes is recorded in the [`EmitLog`] the caller
//! threads through, which is how asset work ends up in the unit's
//! checksum record.

pub mod media;
pub mod style;
pub mod svg;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;

use crate::checksum::{Fingerprint, FingerprintCache, fingerprint_bytes};
use crate::core::ProjectPaths;

pub use media::{ImageRequest, MediaPipeline};
pub use style::StylePipeline;
pub use svg::SvgPipeline;

/// A module the bundler asked a pipeline about.
///
/// Transform parameters live in structured form here; they are only
/// flattened into a string specifier at the bundler boundary (see
/// [`media::parse_specifier`] / [`ImageRequest::to_specifier`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleRequest {
    /// An on-disk asset, processed as-is.
    Source(PathBuf),
    /// A virtual `optimizeImage` module carrying recompression
    /// parameters for an on-disk image.
    OptimizedImage(ImageRequest),
}

impl ModuleRequest {
    /// The on-disk file backing this request.
    pub fn source_path(&self) -> &Path {
        match self {
            ModuleRequest::Source(path) => path,
            ModuleRequest::OptimizedImage(req) => &req.source,
        }
    }
}

/// Identity handed to the location function: which asset, and what its
/// (transformed) content hashes to.
#[derive(Debug, Clone)]
pub struct AssetContext {
    pub id: PathBuf,
    pub content_hash: Fingerprint,
}

/// Where an emitted asset lands on disk and how the browser reaches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetLocation {
    /// Absolute emission path under `<output>/static/`.
    pub file: PathBuf,
    /// Public URL path (`/static/...`).
    pub public: String,
}

/// Computes content-addressed locations for emitted assets.
///
/// Identical content hash always yields the identical location, which
/// is what makes long-term HTTP caching of `/static/` safe.
#[derive(Debug, Clone)]
pub struct Locator {
    output_static: PathBuf,
}

impl Locator {
    pub fn new(paths: &ProjectPaths) -> Self {
        Self {
            output_static: paths.output_static.clone(),
        }
    }

    pub fn css(&self, context: &AssetContext) -> AssetLocation {
        self.locate("css", context)
    }

    pub fn media(&self, context: &AssetContext) -> AssetLocation {
        self.locate("media", context)
    }

    fn locate(&self, class: &str, context: &AssetContext) -> AssetLocation {
        let stem = context
            .id
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("asset");
        let ext = context
            .id
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let name = format!("{stem}.{}.{ext}", context.content_hash.short8());

        AssetLocation {
            file: self.output_static.join(class).join(&name),
            public: format!("/static/{class}/{name}"),
        }
    }
}

/// Accumulator for one unit's asset activity.
///
/// Passed explicitly through every pipeline invocation; two units
/// compiling in parallel never share one.
#[derive(Debug, Default)]
pub struct EmitLog {
    /// Files consulted while loading assets (cache invalidation inputs).
    pub reads: FxHashSet<PathBuf>,
    /// Files written, with the fingerprint of the written bytes.
    pub writes: FxHashMap<PathBuf, Fingerprint>,
}

impl EmitLog {
    pub fn record_read(&mut self, path: &Path) {
        self.reads.insert(path.to_path_buf());
    }

    pub fn record_write(&mut self, path: &Path, hash: Fingerprint) {
        self.writes.insert(path.to_path_buf(), hash);
    }
}

/// Everything a pipeline needs besides the request itself.
pub struct LoadContext<'a> {
    pub locator: &'a Locator,
    pub emit: &'a mut EmitLog,
    pub cache: &'a FingerprintCache,
    /// Whether to emit sibling source maps (stylesheets).
    pub source_map: bool,
}

/// A loaded asset: the synthetic module body substituted for the
/// original source. The body is ESM/JSX text and is compiled by the
/// module-graph compiler like any other module.
pub struct LoadedAsset {
    pub code: String,
}

/// One asset transform pipeline.
pub trait AssetPipeline: Sync {
    fn name(&self) -> &'static str;

    /// Inclusion test: does this pipeline claim the request?
    fn claims(&self, request: &ModuleRequest) -> bool;

    /// Transform the claimed asset, emit its outputs, and return the
    /// synthetic module body.
    fn load(&self, request: &ModuleRequest, cx: &mut LoadContext<'_>) -> Result<LoadedAsset>;
}

/// The standard pipeline set, in claim-test order.
pub fn standard_pipelines() -> Vec<Box<dyn AssetPipeline>> {
    vec![
        Box::new(StylePipeline),
        Box::new(SvgPipeline),
        Box::new(MediaPipeline),
    ]
}

/// Write an emitted asset, recording the write in the log and the
/// fingerprint memo.
pub(crate) fn write_emitted(
    location: &AssetLocation,
    bytes: &[u8],
    cx: &mut LoadContext<'_>,
) -> Result<()> {
    if let Some(parent) = location.file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&location.file, bytes)
        .with_context(|| format!("failed to write {}", location.file.display()))?;

    let hash = fingerprint_bytes(bytes);
    cx.emit.record_write(&location.file, hash);
    cx.cache.record(&location.file, hash);
    Ok(())
}
