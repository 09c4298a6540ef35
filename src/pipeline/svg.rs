//! Vector-graphics pipeline.
//!
//! Optimizes SVG markup with usvg, emits the optimized markup as a
//! static asset, and synthesizes a component export: the default export
//! is the public URL, and `Component` wraps the markup as JSX with the
//! caller's props spread onto the root element. Inline `style="..."`
//! attributes are parsed into structured objects so the component can
//! be rendered by the runtime without a CSS string parser.

use std::fs;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleAttribute};
use regex::{Captures, Regex};

use super::{
    AssetContext, AssetPipeline, LoadContext, LoadedAsset, ModuleRequest, write_emitted,
};
use crate::checksum::fingerprint_bytes;

/// Root `<svg ...>` tag, for spreading caller props.
static SVG_ROOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<svg((?: [\w:-]+="[^"]*")*)>"#).expect("svg root pattern is valid")
});

/// Inline style attributes, for structured rewriting.
static STYLE_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#" style="([^"]*)""#).expect("style pattern is valid"));

pub struct SvgPipeline;

impl AssetPipeline for SvgPipeline {
    fn name(&self) -> &'static str {
        "svg"
    }

    fn claims(&self, request: &ModuleRequest) -> bool {
        match request {
            ModuleRequest::Source(path) => path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("svg")),
            ModuleRequest::OptimizedImage(_) => false,
        }
    }

    fn load(&self, request: &ModuleRequest, cx: &mut LoadContext<'_>) -> Result<LoadedAsset> {
        let path = request.source_path();
        cx.emit.record_read(path);

        let raw =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let optimized = optimize_markup(&raw)
            .with_context(|| format!("failed to optimize {}", path.display()))?;

        let location = cx.locator.media(&AssetContext {
            id: path.to_path_buf(),
            content_hash: fingerprint_bytes(&optimized),
        });
        write_emitted(&location, optimized.as_bytes(), cx)?;

        Ok(LoadedAsset {
            code: component_module(&location.public, &optimized)?,
        })
    }
}

/// Parse and compactly re-serialize the markup.
fn optimize_markup(content: &[u8]) -> Result<String> {
    let tree = usvg::Tree::from_data(content, &usvg::Options::default())
        .context("failed to parse SVG")?;

    let write_options = usvg::WriteOptions {
        indent: usvg::Indent::None,
        ..Default::default()
    };
    Ok(tree.to_string(&write_options))
}

/// Build the synthetic module body: URL default export plus the
/// wrapped component. The body is JSX and goes through the normal
/// script transform stage.
fn component_module(public: &str, markup: &str) -> Result<String> {
    let spread = SVG_ROOT.replace(markup, "<svg$1 {...props}>");

    let mut style_error = None;
    let jsx = STYLE_ATTR.replace_all(&spread, |caps: &Captures<'_>| {
        match style_object(&caps[1]) {
            Ok(object) => format!(" style={{{object}}}"),
            Err(e) => {
                style_error.get_or_insert(e);
                String::new()
            }
        }
    });
    if let Some(e) = style_error {
        return Err(e);
    }

    let url = serde_json::to_string(public).unwrap_or_default();
    Ok(format!(
        "const url = {url};\nexport default url;\nexport const Component = (props) => ({jsx});\n"
    ))
}

/// Parse a CSS declaration string into a JS object literal with
/// camel-cased property names.
fn style_object(style: &str) -> Result<String> {
    let attribute = StyleAttribute::parse(style, ParserOptions::default())
        .map_err(|e| anyhow!("failed to parse style attribute: {e}"))?;

    let mut object = serde_json::Map::new();
    let block = &attribute.declarations;
    let entries = block
        .declarations
        .iter()
        .map(|p| (p, false))
        .chain(block.important_declarations.iter().map(|p| (p, true)));

    for (property, important) in entries {
        let name = camel_case_property(property.property_id().name());
        let mut value = property
            .value_to_css_string(PrinterOptions::default())
            .map_err(|e| anyhow!("failed to print style value: {e}"))?;
        if important {
            value.push_str(" !important");
        }
        object.insert(name, serde_json::Value::String(value));
    }

    serde_json::to_string(&serde_json::Value::Object(object))
        .context("failed to serialize style object")
}

/// `font-size` -> `fontSize`, `-webkit-x` -> `WebkitX`; the `-ms-`
/// vendor prefix lowercases (`-ms-filter` -> `msFilter`).
fn camel_case_property(property: &str) -> String {
    let property = property
        .strip_prefix("-ms-")
        .map(|rest| format!("ms-{rest}"))
        .unwrap_or_else(|| property.to_string());

    let mut out = String::with_capacity(property.len());
    let mut upper_next = false;
    for c in property.chars() {
        if c == '-' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}
