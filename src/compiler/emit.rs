//! CommonJS linking.
//!
//! Takes plain-JS module text (output of the transform stage), splices
//! its ESM import/export statements into module-registry form, and
//! assembles the final single-file bundle. Internal modules load
//! through the in-bundle `__load` registry; external dependencies stay
//! as plain `require` calls resolved at request time.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Result, bail};
use oxc::allocator::Allocator;
use oxc::ast::ast::{
    BindingPattern, Declaration, ExportDefaultDeclarationKind, ImportDeclarationSpecifier,
    ModuleExportName, Statement,
};
use oxc::parser::Parser;
use oxc::span::{GetSpan, SourceType, Span};
use rustc_hash::FxHashMap;

/// How one import specifier links at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// Inlined module, loaded from the bundle registry by key.
    Registry(String),
    /// Runtime dependency, loaded with `require`.
    Require(String),
}

impl LinkTarget {
    fn expr(&self) -> String {
        match self {
            LinkTarget::Registry(key) => format!("__load({})", js_string(key)),
            LinkTarget::Require(spec) => format!("require({})", js_string(spec)),
        }
    }
}

/// Registry runtime shared by every emitted bundle.
const PRELUDE: &str = r#""use strict";
const __modules = Object.create(null);
const __cache = Object.create(null);
function __register(id, factory) {
  __modules[id] = factory;
}
function __load(id) {
  let entry = __cache[id];
  if (!entry) {
    entry = __cache[id] = { exports: {} };
    __modules[id](entry, entry.exports, __load);
  }
  return entry.exports;
}
function __default(mod) {
  return mod && mod.__esModule ? mod.default : mod;
}
"#;

/// Assemble the final bundle from linked module bodies, in
/// registration order, ending with the entry load.
pub fn bundle(entry_key: &str, modules: &[(String, String)]) -> String {
    let mut out = String::from(PRELUDE);
    for (key, body) in modules {
        let _ = writeln!(
            out,
            "__register({}, function (module, exports, __load) {{",
            js_string(key)
        );
        out.push_str(body);
        if !body.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("});\n");
    }
    let _ = writeln!(out, "module.exports = __load({});", js_string(entry_key));
    out
}

/// Every import/re-export specifier in a plain-JS module, in order of
/// appearance (duplicates preserved).
pub fn collect_specifiers(path: &Path, source: &str) -> Result<Vec<String>> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, SourceType::mjs()).parse();
    if !parsed.errors.is_empty() {
        bail!("failed to parse lowered module {}", path.display());
    }

    let mut specifiers = Vec::new();
    for stmt in &parsed.program.body {
        match stmt {
            Statement::ImportDeclaration(decl) => {
                specifiers.push(decl.source.value.to_string());
            }
            Statement::ExportNamedDeclaration(decl) => {
                if let Some(source) = &decl.source {
                    specifiers.push(source.value.to_string());
                }
            }
            Statement::ExportAllDeclaration(decl) => {
                specifiers.push(decl.source.value.to_string());
            }
            _ => {}
        }
    }
    Ok(specifiers)
}

/// Rewrite a plain-JS module body into registry form. `links` maps
/// every specifier the module mentions to its resolved target.
pub fn link_module(
    path: &Path,
    source: &str,
    links: &FxHashMap<String, LinkTarget>,
) -> Result<String> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, SourceType::mjs()).parse();
    if !parsed.errors.is_empty() {
        bail!("failed to parse lowered module {}", path.display());
    }

    let mut edits: Vec<(Span, String)> = Vec::new();
    let mut temp_index = 0usize;

    for stmt in &parsed.program.body {
        match stmt {
            Statement::ImportDeclaration(decl) => {
                let target = link_for(links, decl.source.value.as_str(), path)?;
                let replacement = rewrite_import(decl, target, &mut temp_index);
                edits.push((decl.span, replacement));
            }
            Statement::ExportNamedDeclaration(decl) => {
                let replacement = if let Some(source) = &decl.source {
                    let target = link_for(links, source.value.as_str(), path)?;
                    rewrite_reexport(decl, target, &mut temp_index)
                } else if let Some(declaration) = &decl.declaration {
                    rewrite_export_declaration(source_slice(source, decl.span), declaration)
                } else {
                    rewrite_export_list(decl)
                };
                edits.push((decl.span, replacement));
            }
            Statement::ExportDefaultDeclaration(decl) => {
                let replacement = rewrite_export_default(source, decl.span, &decl.declaration);
                edits.push((decl.span, replacement));
            }
            Statement::ExportAllDeclaration(decl) => {
                let target = link_for(links, decl.source.value.as_str(), path)?;
                let replacement = match &decl.exported {
                    Some(name) => {
                        format!("exports{} = {};", member(&export_name(name)), target.expr())
                    }
                    None => format!("Object.assign(exports, {});", target.expr()),
                };
                edits.push((decl.span, replacement));
            }
            _ => {}
        }
    }

    Ok(apply_edits(source, edits))
}

fn link_for<'a>(
    links: &'a FxHashMap<String, LinkTarget>,
    specifier: &str,
    path: &Path,
) -> Result<&'a LinkTarget> {
    links.get(specifier).ok_or_else(|| {
        anyhow::anyhow!("no link target for {specifier:?} in {}", path.display())
    })
}

fn rewrite_import(
    decl: &oxc::ast::ast::ImportDeclaration<'_>,
    target: &LinkTarget,
    temp_index: &mut usize,
) -> String {
    let mut default_local = None;
    let mut namespace_local = None;
    let mut named: Vec<(String, String)> = Vec::new();

    for specifier in decl.specifiers.iter().flatten() {
        match specifier {
            ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                default_local = Some(s.local.name.to_string());
            }
            ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                namespace_local = Some(s.local.name.to_string());
            }
            ImportDeclarationSpecifier::ImportSpecifier(s) => {
                named.push((export_name(&s.imported), s.local.name.to_string()));
            }
        }
    }

    let uses = usize::from(default_local.is_some())
        + usize::from(namespace_local.is_some())
        + usize::from(!named.is_empty());

    // Side-effect-only import.
    if uses == 0 {
        return format!("{};", target.expr());
    }

    let mut lines = Vec::new();
    let expr = if uses > 1 {
        let temp = format!("__import_{temp_index}");
        *temp_index += 1;
        lines.push(format!("const {temp} = {};", target.expr()));
        temp
    } else {
        target.expr()
    };

    if let Some(local) = namespace_local {
        lines.push(format!("const {local} = {expr};"));
    }
    if let Some(local) = default_local {
        match target {
            // Registry modules put their default on `exports.default`.
            LinkTarget::Registry(_) => lines.push(format!("const {local} = {expr}.default;")),
            // External packages may be plain CJS; interop picks.
            LinkTarget::Require(_) => lines.push(format!("const {local} = __default({expr});")),
        }
    }
    if !named.is_empty() {
        lines.push(format!("const {{ {} }} = {expr};", destructure(&named)));
    }

    lines.join("\n")
}

fn rewrite_reexport(
    decl: &oxc::ast::ast::ExportNamedDeclaration<'_>,
    target: &LinkTarget,
    temp_index: &mut usize,
) -> String {
    let temp = format!("__reexport_{temp_index}");
    *temp_index += 1;

    let mut lines = vec![format!("const {temp} = {};", target.expr())];
    for specifier in &decl.specifiers {
        let local = export_name(&specifier.local);
        let exported = export_name(&specifier.exported);
        lines.push(format!(
            "exports{} = {temp}{};",
            member(&exported),
            member(&local)
        ));
    }
    lines.join("\n")
}

fn rewrite_export_declaration(stmt_text: &str, declaration: &Declaration<'_>) -> String {
    let body = strip_keyword(stmt_text, "export");
    let assignments: String = declaration_names(declaration)
        .iter()
        .map(|name| format!("\nexports{} = {name};", member(name)))
        .collect();
    format!("{body}{assignments}")
}

fn rewrite_export_list(decl: &oxc::ast::ast::ExportNamedDeclaration<'_>) -> String {
    decl.specifiers
        .iter()
        .map(|specifier| {
            format!(
                "exports{} = {};",
                member(&export_name(&specifier.exported)),
                export_name(&specifier.local)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn rewrite_export_default(
    source: &str,
    stmt_span: Span,
    kind: &ExportDefaultDeclarationKind<'_>,
) -> String {
    match kind {
        ExportDefaultDeclarationKind::FunctionDeclaration(f) if f.id.is_some() => {
            let name = f.id.as_ref().map(|id| id.name.to_string()).unwrap_or_default();
            let body = strip_keyword(strip_keyword(source_slice(source, stmt_span), "export"), "default");
            format!("{body}\nexports.default = {name};")
        }
        ExportDefaultDeclarationKind::ClassDeclaration(c) if c.id.is_some() => {
            let name = c.id.as_ref().map(|id| id.name.to_string()).unwrap_or_default();
            let body = strip_keyword(strip_keyword(source_slice(source, stmt_span), "export"), "default");
            format!("{body}\nexports.default = {name};")
        }
        other => {
            let expr = source_slice(source, other.span());
            format!("exports.default = {expr};")
        }
    }
}

fn declaration_names(decl: &Declaration<'_>) -> Vec<String> {
    match decl {
        Declaration::VariableDeclaration(var) => {
            let mut names = Vec::new();
            for declarator in &var.declarations {
                binding_names(&declarator.id, &mut names);
            }
            names
        }
        Declaration::FunctionDeclaration(f) => {
            f.id.iter().map(|id| id.name.to_string()).collect()
        }
        Declaration::ClassDeclaration(c) => c.id.iter().map(|id| id.name.to_string()).collect(),
        _ => Vec::new(),
    }
}

fn binding_names(kind: &BindingPattern<'_>, out: &mut Vec<String>) {
    match kind {
        BindingPattern::BindingIdentifier(id) => out.push(id.name.to_string()),
        BindingPattern::ObjectPattern(pattern) => {
            for property in &pattern.properties {
                binding_names(&property.value, out);
            }
            if let Some(rest) = &pattern.rest {
                binding_names(&rest.argument, out);
            }
        }
        BindingPattern::ArrayPattern(pattern) => {
            for element in pattern.elements.iter().flatten() {
                binding_names(element, out);
            }
            if let Some(rest) = &pattern.rest {
                binding_names(&rest.argument, out);
            }
        }
        BindingPattern::AssignmentPattern(pattern) => binding_names(&pattern.left, out),
    }
}

fn export_name(name: &ModuleExportName<'_>) -> String {
    match name {
        ModuleExportName::IdentifierName(n) => n.name.to_string(),
        ModuleExportName::IdentifierReference(n) => n.name.to_string(),
        ModuleExportName::StringLiteral(s) => s.value.to_string(),
    }
}

fn source_slice(source: &str, span: Span) -> &str {
    &source[span.start as usize..span.end as usize]
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> &'a str {
    text.strip_prefix(keyword).unwrap_or(text).trim_start()
}

fn apply_edits(source: &str, mut edits: Vec<(Span, String)>) -> String {
    edits.sort_by_key(|(span, _)| std::cmp::Reverse(span.start));
    let mut out = source.to_string();
    for (span, replacement) in edits {
        out.replace_range(span.start as usize..span.end as usize, &replacement);
    }
    out
}

fn is_ident(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Property access: `.name` for identifiers, `["..."]` otherwise.
fn member(name: &str) -> String {
    if is_ident(name) {
        format!(".{name}")
    } else {
        format!("[{}]", js_string(name))
    }
}

fn destructure(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(imported, local)| {
            if imported == local && is_ident(imported) {
                imported.clone()
            } else if is_ident(imported) {
                format!("{imported}: {local}")
            } else {
                format!("{}: {local}", js_string(imported))
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_default()
}
