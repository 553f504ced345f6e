//! Cross-client registry of fingerprints known to be missing or inconsistent.
//!
//! Persisted as `.checksums` at the repository root, one record per line, JSON-encoded (a
//! `serde_json` sidecar style rather than the register's custom line grammar, since this file
//! is small and rewritten wholesale rather than streamed).

use crate::errors::Result;
use crate::types::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Why a fingerprint is tracked as bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reason {
    /// No store object exists for this fingerprint.
    Missing,
    /// A store object exists but its recorded size disagrees with the register.
    Inconsistent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    fingerprint: String,
    reason: Reason,
    /// Expected size, or `-1` if unknown.
    expected_size: i64,
}

/// One tracked entry, with a transient "recovered this run" flag that is never persisted.
#[derive(Debug, Clone)]
pub struct Entry {
    pub reason: Reason,
    pub expected_size: i64,
    pub recovered: bool,
}

/// The missing/inconsistent fingerprint tracker, persisted across runs at `<repo>/.checksums`.
#[derive(Debug, Default)]
pub struct MissingList {
    entries: BTreeMap<Fingerprint, Entry>,
}

impl MissingList {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: BTreeMap::new() }
    }

    /// Load from `<repo>/.checksums`, or start empty if the file does not exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = BTreeMap::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let stored: StoredEntry = serde_json::from_str(line)?;
            if let Some(fp) = Fingerprint::parse(&stored.fingerprint) {
                entries.insert(
                    fp,
                    Entry { reason: stored.reason, expected_size: stored.expected_size, recovered: false },
                );
            }
        }
        Ok(Self { entries })
    }

    /// Persist to `<repo>/.checksums`. Recovered entries are dropped before writing, since
    /// `recovered` only means "a write resolved this during the current run".
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        for (fp, entry) in &self.entries {
            if entry.recovered {
                continue;
            }
            let stored = StoredEntry {
                fingerprint: fp.to_string(),
                reason: entry.reason,
                expected_size: entry.expected_size,
            };
            out.push_str(&serde_json::to_string(&stored)?);
            out.push('\n');
        }
        let tmp: PathBuf = path.with_extension("checksums.tmp");
        std::fs::write(&tmp, out)?;
        crate::fsutil::rename_replace(&tmp, path)?;
        Ok(())
    }

    /// Record `fingerprint` as missing or inconsistent, overwriting any prior entry.
    pub fn mark(&mut self, fingerprint: Fingerprint, reason: Reason, expected_size: i64) {
        self.entries.insert(fingerprint, Entry { reason, expected_size, recovered: false });
    }

    /// Mark a previously-tracked fingerprint recovered by a fresh write this run
    pub fn mark_recovered(&mut self, fingerprint: &Fingerprint) {
        if let Some(entry) = self.entries.get_mut(fingerprint) {
            entry.recovered = true;
        }
    }

    #[must_use]
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&Entry> {
        self.entries.get(fingerprint)
    }

    #[must_use]
    pub fn is_missing(&self, fingerprint: &Fingerprint) -> bool {
        matches!(self.get(fingerprint), Some(e) if e.reason == Reason::Missing && !e.recovered)
    }

    #[must_use]
    pub fn is_inconsistent(&self, fingerprint: &Fingerprint) -> bool {
        matches!(self.get(fingerprint), Some(e) if e.reason == Reason::Inconsistent && !e.recovered)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Fingerprint, &Entry)> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
