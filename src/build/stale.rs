//! Per-unit reuse decision.
//!
//! A unit is reused only when its previous checksum record fully
//! verifies against the current disk state: every `requires` entry
//! (sources, inlined dependencies, consulted assets) AND every
//! `emitted` entry (the bundle and pipeline outputs) must fingerprint
//! to the recorded value. Anything else — a changed byte, a missing
//! file, an unreadable file — marks the unit stale. Verifying the
//! emitted side catches output corrupted or deleted behind the build's
//! back, not just source edits; a corrupted output recompiles the whole
//! unit rather than attempting a per-file repair.

use std::path::Path;

use crate::checksum::FingerprintCache;
use crate::debug;
use crate::manifest::ChecksumRecord;

/// Can this unit's previous record be carried forward unchanged?
pub fn record_verifies(record: &ChecksumRecord, root: &Path, cache: &FingerprintCache) -> bool {
    let entries = record.requires.iter().chain(record.emitted.iter());

    for (relative, stored) in entries {
        let path = root.join(relative);
        match cache.file(&path) {
            Ok(current) if current.to_hex() == *stored => {}
            Ok(_) => {
                debug!("cache"; "{relative} changed");
                return false;
            }
            Err(e) => {
                debug!("cache"; "{relative} unreadable ({e}), treating as stale");
                return false;
            }
        }
    }
    true
}
