//! Content fingerprinting using blake3.
//!
//! Fingerprints are the cache keys of the incremental build: a unit is
//! reused only if every file it depends on (and every file it emitted)
//! still hashes to the recorded value. They also become the 8-hex-char
//! component of content-addressed output filenames.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use dashmap::DashMap;

/// A 256-bit content hash (blake3 output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    #[inline]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Full lowercase hex digest.
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// Parse a full hex digest.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// First 8 hex chars, used as the content-address component of
    /// emitted filenames (e.g. `style.a1b2c3d4.css`).
    pub fn short8(self) -> String {
        self.to_hex()[..8].to_string()
    }

    /// Last 8 hex chars, used as the uniqueness suffix for rewritten
    /// module-stylesheet class names (e.g. `primary-d4c3b2a1`).
    pub fn suffix8(self) -> String {
        let hex = self.to_hex();
        hex[hex.len() - 8..].to_string()
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Fingerprint an in-memory buffer. Infallible and synchronous.
pub fn fingerprint_bytes<T: AsRef<[u8]> + ?Sized>(data: &T) -> Fingerprint {
    Fingerprint(*blake3::hash(data.as_ref()).as_bytes())
}

/// Fingerprint a file by streaming its contents.
///
/// Memory use is bounded regardless of file size. An unreadable file is
/// an error; callers decide whether that means "stale" or "fatal".
pub fn fingerprint_file(path: &Path) -> io::Result<Fingerprint> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(64 * 1024, file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                hasher.update(&buffer[..n]);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(Fingerprint(*hasher.finalize().as_bytes()))
}

/// Per-build memo of file fingerprints.
///
/// One cache is created per build invocation and passed by reference;
/// it never outlives the build, so a file edited between builds is
/// always re-hashed.
#[derive(Default)]
pub struct FingerprintCache {
    hashes: DashMap<PathBuf, Fingerprint>,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprint a file, memoized on its path for this build.
    pub fn file(&self, path: &Path) -> io::Result<Fingerprint> {
        if let Some(hit) = self.hashes.get(path) {
            return Ok(*hit);
        }
        let hash = fingerprint_file(path)?;
        self.hashes.insert(path.to_path_buf(), hash);
        Ok(hash)
    }

    /// Record the fingerprint of bytes just written to `path`, so later
    /// verification of the same path within this build skips the read.
    pub fn record(&self, path: &Path, hash: Fingerprint) {
        self.hashes.insert(path.to_path_buf(), hash);
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.hashes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_determinism() {
        let a = fingerprint_bytes("hello world");
        let b = fingerprint_bytes("hello world");
        assert_eq!(a, b);
        assert_ne!(a, fingerprint_bytes("hello worlD"));
    }

    #[test]
    fn test_file_matches_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "content-addressed").unwrap();

        let from_file = fingerprint_file(&path).unwrap();
        let from_bytes = fingerprint_bytes("content-addressed");
        assert_eq!(from_file, from_bytes);
    }

    #[test]
    fn test_unreadable_file_is_error() {
        assert!(fingerprint_file(Path::new("/nonexistent/file.txt")).is_err());
    }

    #[test]
    fn test_hex_roundtrip() {
        let original = fingerprint_bytes("roundtrip");
        let recovered = Fingerprint::from_hex(&original.to_hex()).unwrap();
        assert_eq!(original, recovered);
    }

    #[test]
    fn test_short_forms() {
        let fp = fingerprint_bytes("short");
        let hex = fp.to_hex();
        assert_eq!(fp.short8(), hex[..8]);
        assert_eq!(fp.suffix8(), hex[56..]);
        assert_eq!(fp.short8().len(), 8);
        assert_eq!(fp.suffix8().len(), 8);
    }

    #[test]
    fn test_cache_memoizes_within_build() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "v1").unwrap();

        let cache = FingerprintCache::new();
        let first = cache.file(&path).unwrap();

        // The memo answers for the rest of the build even if the file
        // changes underneath (builds snapshot their inputs).
        fs::write(&path, "v2").unwrap();
        assert_eq!(cache.file(&path).unwrap(), first);

        // A fresh cache (next build) sees the new content.
        let next = FingerprintCache::new();
        assert_ne!(next.file(&path).unwrap(), first);
    }
}
