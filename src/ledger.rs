//! Index state ledger.
//!
//! A JSON file recording, per corpus filename, the fingerprint that was last
//! indexed and how many chunks it produced:
//!
//! ```json
//! {
//!   "last_update": "2026-10-16T09:30:00Z",
//!   "processed_files": {
//!     "Yoda.txt": {
//!       "hash": "ba78…",
//!       "mtime": 1760606400.123456,
//!       "chunks_count": 7,
//!       "last_processed": "2026-10-16T09:30:00Z"
//!     }
//!   }
//! }
//! ```
//!
//! Files are kept in a `BTreeMap` so the serialized form is stable: two
//! runs with no corpus changes produce ledgers that differ only in
//! `last_update`. Writes go to a sibling temp file and are renamed into
//! place so a crash never leaves a truncated ledger behind.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub hash: String,
    pub mtime: f64,
    pub chunks_count: usize,
    pub last_processed: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processed_files: BTreeMap<String, LedgerRecord>,
}

impl Ledger {
    /// Load the ledger at `path`. A missing file is an empty ledger; an
    /// unreadable or corrupt file is logged and also treated as empty, which
    /// makes the next run reclassify every file as new.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(Some(ledger)) => ledger,
            Ok(None) => Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ledger unreadable, starting fresh");
                Self::default()
            }
        }
    }

    /// Like [`Ledger::load`] but surfaces parse errors.
    pub fn try_load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read ledger: {}", path.display()))?;
        let ledger = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse ledger: {}", path.display()))?;
        Ok(Some(ledger))
    }

    /// Atomically write the ledger as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create ledger directory: {}", parent.display())
                })?;
            }
        }

        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write ledger: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace ledger: {}", path.display()))?;
        Ok(())
    }

    pub fn get(&self, filename: &str) -> Option<&LedgerRecord> {
        self.processed_files.get(filename)
    }

    pub fn record(&mut self, filename: &str, record: LedgerRecord) {
        self.processed_files.insert(filename.to_string(), record);
    }

    pub fn len(&self) -> usize {
        self.processed_files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed_files.is_empty()
    }

    /// Sum of `chunks_count` over all files.
    pub fn total_chunks(&self) -> usize {
        self.processed_files.values().map(|r| r.chunks_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hash: &str, mtime: f64, chunks: usize) -> LedgerRecord {
        LedgerRecord {
            hash: hash.to_string(),
            mtime,
            chunks_count: chunks,
            last_processed: Utc::now(),
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::load(&dir.path().join("update_state.json"));
        assert!(ledger.is_empty());
        assert!(ledger.last_update.is_none());
    }

    #[test]
    fn test_save_load_preserves_float_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("update_state.json");

        let mut ledger = Ledger::default();
        ledger.record("Yoda.txt", record("aa", 1760606400.1234567, 7));
        ledger.record("Anakin.txt", record("bb", 1760606401.5, 3));
        ledger.last_update = Some(Utc::now());
        ledger.save(&path).unwrap();

        let loaded = Ledger::load(&path);
        assert_eq!(loaded, ledger);
        assert_eq!(loaded.total_chunks(), 10);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_keys_serialized_sorted() {
        let mut ledger = Ledger::default();
        ledger.record("b.txt", record("2", 2.0, 1));
        ledger.record("a.txt", record("1", 1.0, 1));
        let json = serde_json::to_string(&ledger).unwrap();
        assert!(json.find("a.txt").unwrap() < json.find("b.txt").unwrap());
    }

    #[test]
    fn test_reads_external_format() {
        let json = r#"{
            "last_update": null,
            "processed_files": {
                "Yoda.txt": {
                    "hash": "d41d8cd98f00b204e9800998ecf8427e",
                    "mtime": 1700000000.25,
                    "chunks_count": 4,
                    "last_processed": "2025-11-02T10:00:00Z"
                }
            }
        }"#;
        let ledger: Ledger = serde_json::from_str(json).unwrap();
        let rec = ledger.get("Yoda.txt").unwrap();
        assert_eq!(rec.chunks_count, 4);
        assert_eq!(rec.mtime, 1700000000.25);
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("update_state.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Ledger::try_load(&path).is_err());
        assert!(Ledger::load(&path).is_empty());
    }
}
