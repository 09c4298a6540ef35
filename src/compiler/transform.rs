//! Per-module script lowering.
//!
//! Uses oxc to take one module from TypeScript/JSX source to plain
//! JavaScript with ESM syntax intact. The link stage (see `emit`)
//! re-parses the plain output, so every span it splices against refers
//! to text this stage produced, never to the original source.

use std::path::Path;

use anyhow::{Result, bail};
use oxc::allocator::Allocator;
use oxc::codegen::Codegen;
use oxc::parser::Parser;
use oxc::semantic::SemanticBuilder;
use oxc::span::SourceType;
use oxc::transformer::{TransformOptions, Transformer};

/// Source type from the file extension; synthetic asset bodies use a
/// `.tsx` pseudo-path so JSX in them always parses.
pub fn source_type_for(path: &Path) -> SourceType {
    SourceType::from_path(path).unwrap_or_else(|_| SourceType::mjs())
}

/// Lower one module to plain JavaScript (TypeScript erased, JSX
/// compiled). Parse or transform diagnostics are fatal for the build.
pub fn lower_to_js(path: &Path, source: &str) -> Result<String> {
    let source_type = source_type_for(path);
    let allocator = Allocator::default();

    let parsed = Parser::new(&allocator, source, source_type).parse();
    if !parsed.errors.is_empty() {
        bail!(
            "failed to parse {}: {}",
            path.display(),
            join_diagnostics(&parsed.errors)
        );
    }

    let mut program = parsed.program;
    let scoping = SemanticBuilder::new()
        .build(&program)
        .semantic
        .into_scoping();

    let options = TransformOptions::default();
    let transformed =
        Transformer::new(&allocator, path, &options).build_with_scoping(scoping, &mut program);
    if !transformed.errors.is_empty() {
        bail!(
            "failed to transform {}: {}",
            path.display(),
            join_diagnostics(&transformed.errors)
        );
    }

    Ok(Codegen::new().build(&program).code)
}

fn join_diagnostics(errors: &[oxc::diagnostics::OxcDiagnostic]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
