//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration-related errors. All of these abort the build before
/// any output is touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file missing: expected one of {0:?} in project root")]
    Missing(&'static [&'static str]),

    #[error("IO error when reading `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    /// Schema violation (wrong type, bad structure). The underlying
    /// deserializer message is kept verbatim for operator output.
    #[error("config schema violation in `{path}`: {detail}")]
    Schema { path: PathBuf, detail: String },

    /// Keys the schema does not recognize.
    #[error("unrecognized config keys in `{path}`: {keys}")]
    UnknownFields { path: PathBuf, keys: String },
}
