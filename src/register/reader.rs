//! Streaming register reader with one-line look-ahead.

use super::record::{decode_line, Line};
use crate::errors::{RepoError, Result};
use crate::types::NodeMetadata;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// What [`RegisterReader::fetch_line`] classified the next line as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    /// Clean end of file: footer line seen.
    Eor,
    /// A path header.
    Path(String),
    /// A record line under the most recently fetched path.
    Record { ts: i64, meta: NodeMetadata },
}

/// Streaming reader over a register or journal file.
///
/// [`fetch_line`](Self::fetch_line) caches the last decoded line until
/// [`reset_status`](Self::reset_status) is called, giving callers look-ahead without having to
/// seek backwards.
pub struct RegisterReader<R> {
    lines: R,
    pending: Option<Fetched>,
    finished: bool,
    pub version: u32,
}

impl RegisterReader<BufReader<File>> {
    /// Open a register file for streaming read.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, or `quiet_if_missing` is false and it does
    /// not exist.
    pub fn open(path: &Path, quiet_if_missing: bool) -> Result<Option<Self>> {
        match File::open(path) {
            Ok(f) => Self::from_reader(BufReader::new(f)).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && quiet_if_missing => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl<R: BufRead> RegisterReader<R> {
    /// Wrap an already-open reader, consuming its leading version header.
    ///
    /// # Errors
    /// Returns [`RepoError::CorruptRegister`] if the first line is not a version header.
    pub fn from_reader(mut lines: R) -> Result<Self> {
        let mut raw = Vec::new();
        let n = lines.read_until(b'\n', &mut raw)?;
        if n == 0 {
            return Err(RepoError::CorruptRegister("empty register file".into()));
        }
        let version = match decode_line(&raw)? {
            Line::Version(v) => v,
            other => {
                return Err(RepoError::CorruptRegister(format!("expected version header, got {other:?}")))
            }
        };
        Ok(Self { lines, pending: None, finished: false, version })
    }

    /// Return the cached line if one is pending, otherwise read and decode the next line.
    ///
    /// # Errors
    /// Returns an error on I/O failure or a malformed line.
    pub fn fetch_line(&mut self) -> Result<Fetched> {
        if let Some(f) = &self.pending {
            return Ok(f.clone());
        }
        if self.finished {
            return Ok(Fetched::Eor);
        }
        let mut raw = Vec::new();
        loop {
            raw.clear();
            let n = self.lines.read_until(b'\n', &mut raw)?;
            if n == 0 {
                return Err(RepoError::CorruptRegister("unexpected end of register".into()));
            }
            match decode_line(&raw)? {
                Line::Version(_) => continue, // tolerate a stray re-stated version line
                Line::Footer => {
                    self.finished = true;
                    self.pending = Some(Fetched::Eor);
                    return Ok(Fetched::Eor);
                }
                Line::Path(p) => {
                    self.pending = Some(Fetched::Path(p));
                    return Ok(self.pending.clone().unwrap());
                }
                Line::Record { ts, meta } => {
                    self.pending = Some(Fetched::Record { ts, meta });
                    return Ok(self.pending.clone().unwrap());
                }
            }
        }
    }

    /// Discard the cached line, advancing past it on the next `fetch_line`.
    pub fn reset_status(&mut self) {
        self.pending = None;
    }

    #[must_use]
    pub fn end(&self) -> bool {
        self.finished && self.pending.is_none()
    }
}

/// One path and its ordered records, as assembled by [`next_entry`].
#[derive(Debug, Clone)]
pub struct Entry {
    pub path: String,
    pub records: Vec<(i64, NodeMetadata)>,
}

/// Pull the next `(path, records)` group off the reader. Returns `None` at end of register.
///
/// # Errors
/// Returns an error on I/O failure or a malformed register.
pub fn next_entry<R: BufRead>(reader: &mut RegisterReader<R>) -> Result<Option<Entry>> {
    let path = match reader.fetch_line()? {
        Fetched::Eor => return Ok(None),
        Fetched::Path(p) => p,
        Fetched::Record { .. } => {
            return Err(RepoError::CorruptRegister("record line without a preceding path".into()))
        }
    };
    reader.reset_status();
    let mut records = Vec::new();
    loop {
        match reader.fetch_line()? {
            Fetched::Record { ts, meta } => {
                records.push((ts, meta));
                reader.reset_status();
            }
            _ => break,
        }
    }
    Ok(Some(Entry { path, records }))
}

/// The record with the highest timestamp ≤ the resolved target, per spec §4.B's time semantics:
/// `date == 0` means "latest"; `date < 0` is relative to `now` (e.g. `-3600` means "as of one
/// hour ago"); `date > 0` is an absolute timestamp.
#[must_use]
pub fn record_at_date(
    records: &[(i64, NodeMetadata)],
    date: i64,
    now: i64,
) -> Option<&(i64, NodeMetadata)> {
    if date == 0 {
        return records.last();
    }
    let target = if date < 0 { now + date } else { date };
    records.iter().rev().find(|(ts, _)| *ts <= target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::record::{encode_footer, encode_path, encode_record, encode_version};
    use crate::types::{NodeKind, NodeMetadata};
    use std::io::Cursor;

    fn sample_register() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(encode_version(2));
        out.extend(encode_path("dir/a"));
        out.extend(encode_record(
            1000,
            &NodeMetadata { kind: NodeKind::Dir, size: 0, mtime: 0, uid: 0, gid: 0, mode: 0o755 },
        ));
        out.extend(encode_path("dir/a/file"));
        out.extend(encode_record(
            1000,
            &NodeMetadata {
                kind: NodeKind::File { fingerprint: None },
                size: 13,
                mtime: 999,
                uid: 501,
                gid: 20,
                mode: 0o644,
            },
        ));
        out.extend(encode_record(2000, &NodeMetadata::tombstone()));
        out.extend(encode_footer());
        out
    }

    #[test]
    fn reads_two_entries_then_eor() {
        let data = sample_register();
        let mut reader = RegisterReader::from_reader(Cursor::new(data)).unwrap();
        assert_eq!(reader.version, 2);

        let first = next_entry(&mut reader).unwrap().unwrap();
        assert_eq!(first.path, "dir/a");
        assert_eq!(first.records.len(), 1);

        let second = next_entry(&mut reader).unwrap().unwrap();
        assert_eq!(second.path, "dir/a/file");
        assert_eq!(second.records.len(), 2);
        assert!(second.records[1].1.is_tombstone());

        assert!(next_entry(&mut reader).unwrap().is_none());
    }

    #[test]
    fn record_at_date_picks_latest_le() {
        let records = vec![
            (100, NodeMetadata::tombstone()),
            (200, NodeMetadata::tombstone()),
            (300, NodeMetadata::tombstone()),
        ];
        assert_eq!(record_at_date(&records, 250, 0).unwrap().0, 200);
        assert_eq!(record_at_date(&records, 0, 0).unwrap().0, 300);
        assert!(record_at_date(&records, 50, 0).is_none());
    }

    #[test]
    fn record_at_date_negative_is_relative_to_now() {
        let records = vec![
            (100, NodeMetadata::tombstone()),
            (200, NodeMetadata::tombstone()),
            (300, NodeMetadata::tombstone()),
        ];
        // now=300, "50 seconds ago" resolves to target=250, so the highest ts <= 250 is 200.
        assert_eq!(record_at_date(&records, -50, 300).unwrap().0, 200);
    }
}
