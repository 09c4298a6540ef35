//! Route derivation and specificity ordering.
//!
//! A page unit's route is its path relative to `src/pages` with the
//! extension dropped; a trailing `index` segment collapses into the
//! parent directory. Segments starting with `:` are dynamic and match
//! any value at request time.
//!
//! Runtime matching is first-match, so the persisted order decides
//! which route wins. The table is therefore globally sorted by
//! specificity before it is written: static segments before dynamic
//! ones at the same position, deeper routes before their prefixes, and
//! lexicographic order as the final tiebreak. The result is identical
//! no matter how the filesystem enumerated the page files.

use std::cmp::Ordering;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::ProjectPaths;
use crate::unit::SourceUnit;

/// One route -> compiled destination mapping, persisted in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteDescriptor {
    /// Route pattern, e.g. `/blog/:slug`.
    pub route: String,
    /// Project-relative path of the compiled script, e.g.
    /// `.kiln/dist/pages/blog/:slug.js`.
    pub src: String,
}

/// Derive the route pattern for a page unit.
pub fn route_for_page(paths: &ProjectPaths, page: &Path) -> String {
    let rel = page.strip_prefix(&paths.src_pages).unwrap_or(page);
    let stem = rel.with_extension("");

    let mut segments: Vec<String> = stem
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    // `index` collapses to its parent directory.
    if segments.last().is_some_and(|s| s == "index") {
        segments.pop();
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Build the full route table for the page units and sort it.
pub fn route_table(paths: &ProjectPaths, units: &[SourceUnit]) -> Vec<RouteDescriptor> {
    let mut routes: Vec<RouteDescriptor> = units
        .iter()
        .filter(|u| u.kind == crate::unit::UnitKind::Page)
        .map(|u| RouteDescriptor {
            route: route_for_page(paths, &u.path),
            src: paths.relative(&paths.dist_target(&u.path)),
        })
        .collect();

    sort_routes(&mut routes);
    routes
}

/// Sort routes by matching specificity (most specific first).
pub fn sort_routes(routes: &mut [RouteDescriptor]) {
    routes.sort_by(|a, b| compare_routes(&a.route, &b.route));
}

fn is_dynamic(segment: &str) -> bool {
    segment.starts_with(':')
}

fn compare_routes(a: &str, b: &str) -> Ordering {
    let a_segs: Vec<&str> = a.split('/').filter(|s| !s.is_empty()).collect();
    let b_segs: Vec<&str> = b.split('/').filter(|s| !s.is_empty()).collect();

    for (sa, sb) in a_segs.iter().zip(b_segs.iter()) {
        match (is_dynamic(sa), is_dynamic(sb)) {
            (false, true) => return Ordering::Less,
            (true, false) => return Ordering::Greater,
            _ => match sa.cmp(sb) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }

    // Shared prefix: the deeper route is more specific and sorts first.
    b_segs.len().cmp(&a_segs.len())
}
