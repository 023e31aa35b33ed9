//! Content fingerprints for change detection.
//!
//! A [`Fingerprint`] is the SHA-256 of a file's bytes plus its
//! modification time in fractional seconds since the Unix epoch. The pair
//! is the only signal the reconciler uses to decide whether a document
//! changed.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ledger::LedgerRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub hash: String,
    pub mtime: f64,
}

impl Fingerprint {
    /// True when both hash and mtime equal the ledger's stored values.
    pub fn matches(&self, record: &LedgerRecord) -> bool {
        self.hash == record.hash && self.mtime == record.mtime
    }
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Modification time of `path` as float seconds since the epoch.
pub fn modified_secs(path: &Path) -> Result<f64> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
    Ok(system_time_secs(modified))
}

fn system_time_secs(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Read `path` and fingerprint its current contents.
pub fn fingerprint_file(path: &Path) -> Result<Fingerprint> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(Fingerprint {
        hash: fingerprint_bytes(&bytes),
        mtime: modified_secs(path)?,
    })
}
