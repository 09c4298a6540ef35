//! Media pipeline: binary copy and image recompression.
//!
//! Two modes:
//! - plain copy of a bitmap asset to its content-addressed location;
//! - `optimizeImage` virtual modules, which recompress (and optionally
//!   downscale) an image into AVIF before emission.
//!
//! The virtual specifier packs its parameters as a query string between
//! the `optimizeImage?` prefix and the LAST comma, with the literal
//! relative path after it: quality/width values can never contain a
//! comma, while paths may contain any other reserved character.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use super::{
    AssetContext, AssetLocation, AssetPipeline, LoadContext, LoadedAsset, ModuleRequest,
    write_emitted,
};
use crate::checksum::fingerprint_bytes;

/// Bitmap extensions the pipeline claims for plain copy.
pub const MEDIA_EXTENSIONS: &[&str] =
    &["avif", "bmp", "gif", "ico", "jpeg", "jpg", "png", "webp"];

const SPECIFIER_PREFIX: &str = "optimizeImage?";

/// Recompression parameters carried by an `optimizeImage` module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageParams {
    /// AVIF quality, 0-100.
    pub quality: u8,
    /// Target width in pixels; aspect ratio is preserved. `None`
    /// keeps the source dimensions.
    pub width: Option<u32>,
}

impl Default for ImageParams {
    fn default() -> Self {
        Self {
            quality: 100,
            width: None,
        }
    }
}

/// A resolved `optimizeImage` request: the image on disk plus its
/// structured parameters. The string specifier only exists at the
/// bundler boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub source: PathBuf,
    pub params: ImageParams,
}

/// Flatten parameters + relative path into the virtual specifier.
pub fn encode_specifier(params: &ImageParams, relative: &str) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    query.append_pair("quality", &params.quality.to_string());
    if let Some(width) = params.width {
        query.append_pair("width", &width.to_string());
    }
    format!("{SPECIFIER_PREFIX}{},{relative}", query.finish())
}

/// Recover parameters + relative path from a virtual specifier.
/// Returns `None` when the specifier is not an `optimizeImage` module.
pub fn parse_specifier(specifier: &str) -> Option<(ImageParams, &str)> {
    let rest = specifier.strip_prefix(SPECIFIER_PREFIX)?;
    let comma = rest.rfind(',')?;
    let (query, relative) = (&rest[..comma], &rest[comma + 1..]);

    let mut params = ImageParams::default();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match &*key {
            "quality" => params.quality = value.parse().unwrap_or(100),
            "width" => params.width = value.parse().ok(),
            _ => {}
        }
    }
    Some((params, relative))
}

pub struct MediaPipeline;

impl AssetPipeline for MediaPipeline {
    fn name(&self) -> &'static str {
        "media"
    }

    fn claims(&self, request: &ModuleRequest) -> bool {
        match request {
            ModuleRequest::OptimizedImage(_) => true,
            ModuleRequest::Source(path) => path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())),
        }
    }

    fn load(&self, request: &ModuleRequest, cx: &mut LoadContext<'_>) -> Result<LoadedAsset> {
        let location = match request {
            ModuleRequest::Source(path) => copy_media(path, cx)?,
            ModuleRequest::OptimizedImage(req) => optimize_image(req, cx)?,
        };

        Ok(LoadedAsset {
            code: url_module(&location.public),
        })
    }
}

/// Copy a media file to its content-addressed location.
///
/// Also invoked by the stylesheet pipeline for `url()` references, so
/// a file referenced from both an import and a stylesheet lands at the
/// same address.
pub(crate) fn copy_media(
    path: &std::path::Path,
    cx: &mut LoadContext<'_>,
) -> Result<AssetLocation> {
    cx.emit.record_read(path);

    let bytes =
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let hash = fingerprint_bytes(&bytes);
    cx.cache.record(path, hash);
    let location = cx.locator.media(&AssetContext {
        id: path.to_path_buf(),
        content_hash: hash,
    });

    write_emitted(&location, &bytes, cx)?;
    Ok(location)
}

/// Recompress an image into AVIF at the requested quality and width.
fn optimize_image(req: &ImageRequest, cx: &mut LoadContext<'_>) -> Result<AssetLocation> {
    cx.emit.record_read(&req.source);

    let img = image::open(&req.source)
        .with_context(|| format!("failed to decode {}", req.source.display()))?;
    let img = match req.params.width {
        Some(width) if width < img.width() => {
            img.resize(width, u32::MAX, image::imageops::FilterType::Lanczos3)
        }
        _ => img,
    };

    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let pixels: Vec<ravif::RGBA8> = rgba
        .pixels()
        .map(|p| ravif::RGBA8::new(p[0], p[1], p[2], p[3]))
        .collect();

    let quality = f32::from(req.params.quality);
    let encoded = ravif::Encoder::new()
        .with_quality(quality)
        .with_alpha_quality(quality)
        .with_speed(6)
        .encode_rgba(ravif::Img::new(
            pixels.as_slice(),
            width as usize,
            height as usize,
        ))
        .map_err(|e| anyhow!("AVIF encode failed for {}: {e}", req.source.display()))?;

    let location = cx.locator.media(&AssetContext {
        id: req.source.with_extension("avif"),
        content_hash: fingerprint_bytes(&encoded.avif_file),
    });

    write_emitted(&location, &encoded.avif_file, cx)?;
    Ok(location)
}

/// Synthetic module body exporting a public URL.
pub(crate) fn url_module(public: &str) -> String {
    let url = serde_json::to_string(public).unwrap_or_default();
    format!("const url = {url};\nexport default url;\n")
}
