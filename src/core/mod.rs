//! Core build types shared across the crate.

mod paths;

pub use paths::ProjectPaths;

/// Build mode, selected by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Development,
    Production,
}

impl BuildMode {
    #[inline]
    pub fn is_dev(self) -> bool {
        matches!(self, BuildMode::Development)
    }
}
