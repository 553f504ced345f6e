//! Merge (`search`/`copy_until`) and the three-file commit protocol.

use super::pathcmp::compare_paths;
use super::reader::{next_entry, Entry, RegisterReader};
use super::writer::RegisterWriter;
use crate::errors::Result;
use log::{info, warn};
use std::cmp::Ordering;
use std::io::{BufRead, Write};
use std::path::Path;

/// Outcome of [`search`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    /// The target path was found exactly; its existing entry is returned separately.
    Found,
    /// A path greater than the target was seen first; the register has no entry for it yet.
    Exceeded,
    /// The register was exhausted before reaching the target.
    Eor,
}

/// Copy every `(path, records)` group strictly less than `target` from `reader` into `out`
/// (and `journal`, when vanished paths must be tombstoned), applying expiration, then stop.
///
/// `lookahead` carries an entry already pulled off `reader` by a previous call that overshot
/// its own target (a `SearchStatus::Exceeded` or `SearchStatus::Found` result stores the
/// resolved entry back here) — callers driving a merge walk across successive, increasing
/// targets must thread the same `lookahead` slot through each call so an overshot entry isn't
/// silently dropped from the stream.
///
/// `expire`: `None` means no expiration; `Some(0)` means "keep only the latest record per
/// path"; `Some(ts)` drops records older than `ts` except the path's youngest.
///
/// # Errors
/// Returns an error on I/O failure or a malformed register.
#[allow(clippy::too_many_arguments)]
pub fn search<R: BufRead, W: Write, J: Write>(
    reader: &mut RegisterReader<R>,
    lookahead: &mut Option<Entry>,
    target: Option<&str>,
    expire: Option<i64>,
    mark_removed_now: bool,
    now: i64,
    out: &mut RegisterWriter<W>,
    mut journal: Option<&mut RegisterWriter<J>>,
) -> Result<SearchStatus> {
    loop {
        let entry = match lookahead.take() {
            Some(e) => e,
            None => {
                let Some(e) = next_entry(reader)? else {
                    return Ok(SearchStatus::Eor);
                };
                e
            }
        };
        if let Some(target) = target {
            match compare_paths(&entry.path, target) {
                Ordering::Equal => {
                    *lookahead = Some(entry);
                    return Ok(SearchStatus::Found);
                }
                Ordering::Greater => {
                    *lookahead = Some(entry);
                    return Ok(SearchStatus::Exceeded);
                }
                Ordering::Less => {}
            }
        }
        write_entry_with_expiration(entry, expire, mark_removed_now, now, out, &mut journal)?;
    }
}

/// Stream `reader` into `out` (mirroring vanished-path tombstones into `journal` as in
/// [`search`]) until the next path ≥ `target`, without checking for equality.
///
/// # Errors
/// Returns an error on I/O failure or a malformed register.
pub fn copy_until<R: BufRead, W: Write, J: Write>(
    reader: &mut RegisterReader<R>,
    target: &str,
    out: &mut RegisterWriter<W>,
    mut journal: Option<&mut RegisterWriter<J>>,
) -> Result<()> {
    loop {
        let Some(entry) = next_entry(reader)? else { return Ok(()) };
        if compare_paths(&entry.path, target) != Ordering::Less {
            return Ok(());
        }
        write_entry_with_expiration(entry, None, false, 0, out, &mut journal)?;
    }
}

fn write_entry_with_expiration<W: Write, J: Write>(
    mut entry: Entry,
    expire: Option<i64>,
    mark_removed_now: bool,
    now: i64,
    out: &mut RegisterWriter<W>,
    journal: &mut Option<&mut RegisterWriter<J>>,
) -> Result<()> {
    if let Some(cutoff) = expire {
        let keep_from = entry.records.len().saturating_sub(1);
        if cutoff == 0 {
            entry.records = entry.records.split_off(keep_from);
        } else {
            entry.records = entry
                .records
                .into_iter()
                .enumerate()
                .filter(|(i, (ts, _))| *i == keep_from || *ts >= cutoff)
                .map(|(_, r)| r)
                .collect();
        }
    }
    let is_live = entry.records.last().is_some_and(|(_, meta)| !meta.is_tombstone());
    out.put_path(&entry.path)?;
    for (ts, meta) in &entry.records {
        out.put_record(*ts, meta)?;
    }
    if is_live && mark_removed_now {
        let tombstone = crate::types::NodeMetadata::tombstone();
        out.put_record(now, &tombstone)?;
        if let Some(j) = journal.as_deref_mut() {
            j.put_path(&entry.path)?;
            j.put_record(now, &tombstone)?;
        }
    }
    Ok(())
}

/// File names within a client directory.
pub struct ClientPaths {
    pub list: std::path::PathBuf,
    pub list_backup: std::path::PathBuf,
    pub next: std::path::PathBuf,
    pub journal: std::path::PathBuf,
    pub journal_backup: std::path::PathBuf,
    pub partial: std::path::PathBuf,
}

impl ClientPaths {
    #[must_use]
    pub fn new(client_dir: &Path) -> Self {
        Self {
            list: client_dir.join("list"),
            list_backup: client_dir.join("list~"),
            next: client_dir.join("list.next"),
            journal: client_dir.join("journal"),
            journal_backup: client_dir.join("journal~"),
            partial: client_dir.join("partial"),
        }
    }
}

/// Run the commit protocol's forward steps, assuming `partial` is
/// fully written and closed and `journal` reflects everything staged in `partial`.
///
/// # Errors
/// Returns [`crate::errors::RepoError::CommitFailed`] if any rename step fails; on error the
/// client directory is left in a state that [`recover`] can resume from.
pub fn commit(paths: &ClientPaths) -> Result<()> {
    step_partial_to_next(paths)?;
    step_remove_journal(paths)?;
    step_backup_list(paths)?;
    step_next_to_list(paths)?;
    Ok(())
}

fn step_partial_to_next(paths: &ClientPaths) -> Result<()> {
    if paths.partial.exists() {
        crate::fsutil::rename_replace(&paths.partial, &paths.next)
            .map_err(|e| crate::errors::RepoError::CommitFailed(format!("partial->next: {e}")))?;
    }
    Ok(())
}

fn step_remove_journal(paths: &ClientPaths) -> Result<()> {
    if paths.journal.exists() {
        crate::fsutil::rename_replace(&paths.journal, &paths.journal_backup)
            .map_err(|e| crate::errors::RepoError::CommitFailed(format!("journal->journal~: {e}")))?;
        std::fs::remove_file(&paths.journal_backup)
            .map_err(|e| crate::errors::RepoError::CommitFailed(format!("unlink journal~: {e}")))?;
    }
    Ok(())
}

fn step_backup_list(paths: &ClientPaths) -> Result<()> {
    if paths.list.exists() {
        crate::fsutil::rename_replace(&paths.list, &paths.list_backup)
            .map_err(|e| crate::errors::RepoError::CommitFailed(format!("list->list~: {e}")))?;
    }
    Ok(())
}

fn step_next_to_list(paths: &ClientPaths) -> Result<()> {
    crate::fsutil::rename_replace(&paths.next, &paths.list)
        .map_err(|e| crate::errors::RepoError::CommitFailed(format!("next->list: {e}")))?;
    Ok(())
}

/// Apply the crash-recovery rules on client open. Every step is
/// idempotent, so calling this on an already-clean client directory is a no-op.
///
/// # Errors
/// Returns an error if recovery steps fail for reasons other than the expected missing files.
pub fn recover(paths: &ClientPaths) -> Result<()> {
    if paths.next.exists() {
        info!("register recovery: found `next`, resuming commit from step 3");
        step_remove_journal(paths)?;
        step_backup_list(paths)?;
        step_next_to_list(paths)?;
        return Ok(());
    }
    if paths.journal.exists() {
        if journal_is_empty(&paths.journal)? {
            std::fs::remove_file(&paths.journal)?;
            return Ok(());
        }
        warn!("register recovery: non-empty journal found with no `next`; re-merging");
        reconcile_journal(paths)?;
        return commit(paths);
    }
    if paths.list_backup.exists() && !paths.list.exists() {
        info!("register recovery: restoring `list` from `list~`");
        crate::fsutil::rename_replace(&paths.list_backup, &paths.list)?;
    }
    Ok(())
}

/// An empty journal has a version header and nothing else — no path was ever staged.
fn journal_is_empty(path: &Path) -> Result<bool> {
    let Some(mut reader) = RegisterReader::open(path, true)? else { return Ok(true) };
    match next_entry(&mut reader) {
        Ok(None) => Ok(true),
        Ok(Some(_)) => Ok(false),
        Err(_) => Ok(false),
    }
}

/// Rebuild `partial` from the old `list` plus everything staged in `journal`, tolerating a
/// journal whose last line was cut off mid-write by the crash that left it behind.
///
/// Each journal entry's record timestamp tells us how to apply it against the matching `list`
/// entry: equal to the old entry's last timestamp means the in-place replace used by ops `!`,
/// `C` and `R`; greater means the append used by every other op. Paths untouched by the journal
/// are copied through unchanged — recovery must not guess at their current live state, only the
/// next full walk can.
///
/// # Errors
/// Returns an error on I/O failure or if `list` is malformed.
fn reconcile_journal(paths: &ClientPaths) -> Result<()> {
    let mut old_reader = RegisterReader::open(&paths.list, true)?;
    let Some(mut journal_reader) = RegisterReader::open(&paths.journal, true)? else {
        return Ok(());
    };
    let mut partial = RegisterWriter::create(&paths.partial)?;
    let mut old_lookahead: Option<Entry> = None;

    loop {
        let journal_entry = match next_entry(&mut journal_reader) {
            Ok(Some(e)) => e,
            Ok(None) => break,
            Err(e) => {
                warn!("register recovery: journal ended mid-line, salvaging what was read: {e}");
                break;
            }
        };
        if journal_entry.records.is_empty() {
            continue;
        }
        let merged = match old_reader.as_mut() {
            Some(reader) => {
                let status = search::<_, _, std::io::Sink>(
                    reader,
                    &mut old_lookahead,
                    Some(&journal_entry.path),
                    None,
                    false,
                    0,
                    &mut partial,
                    None,
                )?;
                match status {
                    SearchStatus::Found => {
                        let mut old_entry = old_lookahead.take().expect("Found carries an entry");
                        for (ts, meta) in journal_entry.records {
                            if old_entry.records.last().is_some_and(|(ots, _)| *ots == ts) {
                                old_entry.records.pop();
                            }
                            old_entry.records.push((ts, meta));
                        }
                        old_entry
                    }
                    SearchStatus::Exceeded | SearchStatus::Eor => journal_entry,
                }
            }
            None => journal_entry,
        };
        partial.put_path(&merged.path)?;
        for (ts, meta) in &merged.records {
            partial.put_record(*ts, meta)?;
        }
    }

    if let Some(reader) = old_reader.as_mut() {
        copy_remaining(reader, &mut old_lookahead, &mut partial)?;
    }
    partial.finish()?;
    Ok(())
}

/// Drain whatever is left of `reader` (including a carried-over `lookahead`) into `out`
/// unchanged, with no expiration and no tombstoning.
fn copy_remaining<R: BufRead, W: Write>(
    reader: &mut RegisterReader<R>,
    lookahead: &mut Option<Entry>,
    out: &mut RegisterWriter<W>,
) -> Result<()> {
    if let Some(entry) = lookahead.take() {
        out.put_path(&entry.path)?;
        for (ts, meta) in &entry.records {
            out.put_record(*ts, meta)?;
        }
    }
    while let Some(entry) = next_entry(reader)? {
        out.put_path(&entry.path)?;
        for (ts, meta) in &entry.records {
            out.put_record(*ts, meta)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::reader::RegisterReader;
    use crate::types::{NodeKind, NodeMetadata};
    use std::io::Cursor;
    use tempfile::tempdir;

    fn dir_entry(meta_mode: u32) -> NodeMetadata {
        NodeMetadata { kind: NodeKind::Dir, size: 0, mtime: 0, uid: 0, gid: 0, mode: meta_mode }
    }

    fn build_register(paths: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut w = RegisterWriter::from_writer(&mut buf).unwrap();
            for p in paths {
                w.put_path(p).unwrap();
                w.put_record(1, &dir_entry(0o755)).unwrap();
            }
            w.finish().unwrap();
        }
        buf
    }

    #[test]
    fn search_finds_exact_target() {
        let data = build_register(&["a", "b", "c"]);
        let mut reader = RegisterReader::from_reader(Cursor::new(data)).unwrap();
        let mut out_buf = Vec::new();
        let mut out = RegisterWriter::from_writer(&mut out_buf).unwrap();
        let mut lookahead = None;
        let status = search::<_, _, Vec<u8>>(
            &mut reader,
            &mut lookahead,
            Some("b"),
            None,
            false,
            0,
            &mut out,
            None,
        )
        .unwrap();
        assert_eq!(status, SearchStatus::Found);
        assert_eq!(lookahead.unwrap().path, "b");
    }

    #[test]
    fn search_reports_exceeded_when_target_absent() {
        let data = build_register(&["a", "c"]);
        let mut reader = RegisterReader::from_reader(Cursor::new(data)).unwrap();
        let mut out_buf = Vec::new();
        let mut out = RegisterWriter::from_writer(&mut out_buf).unwrap();
        let mut lookahead = None;
        let status = search::<_, _, Vec<u8>>(
            &mut reader,
            &mut lookahead,
            Some("b"),
            None,
            false,
            0,
            &mut out,
            None,
        )
        .unwrap();
        assert_eq!(status, SearchStatus::Exceeded);
        assert_eq!(lookahead.unwrap().path, "c");
    }

    #[test]
    fn search_carries_overshot_entry_into_the_next_call() {
        let data = build_register(&["a", "c"]);
        let mut reader = RegisterReader::from_reader(Cursor::new(data)).unwrap();
        let mut out_buf = Vec::new();
        let mut out = RegisterWriter::from_writer(&mut out_buf).unwrap();
        let mut lookahead = None;
        let status = search::<_, _, Vec<u8>>(
            &mut reader,
            &mut lookahead,
            Some("b"),
            None,
            false,
            0,
            &mut out,
            None,
        )
        .unwrap();
        assert_eq!(status, SearchStatus::Exceeded);

        // Re-querying for "c" must find the same overshot entry rather than reading past it.
        let status = search::<_, _, Vec<u8>>(
            &mut reader,
            &mut lookahead,
            Some("c"),
            None,
            false,
            0,
            &mut out,
            None,
        )
        .unwrap();
        assert_eq!(status, SearchStatus::Found);
        assert_eq!(lookahead.unwrap().path, "c");
    }

    #[test]
    fn search_tombstones_vanished_paths_into_journal() {
        let data = build_register(&["a"]);
        let mut reader = RegisterReader::from_reader(Cursor::new(data)).unwrap();
        let mut out_buf = Vec::new();
        let mut journal_buf = Vec::new();
        let mut out = RegisterWriter::from_writer(&mut out_buf).unwrap();
        let mut journal = RegisterWriter::from_writer(&mut journal_buf).unwrap();
        let mut lookahead = None;
        let status =
            search(&mut reader, &mut lookahead, None, None, true, 5000, &mut out, Some(&mut journal))
                .unwrap();
        assert_eq!(status, SearchStatus::Eor);
        out.finish().unwrap();
        journal.finish().unwrap();

        let mut out_reader = RegisterReader::from_reader(Cursor::new(out_buf)).unwrap();
        let entry = next_entry(&mut out_reader).unwrap().unwrap();
        assert_eq!(entry.records.len(), 2);
        assert!(entry.records[1].1.is_tombstone());
    }

    #[test]
    fn recovery_resumes_from_next_when_present() {
        let dir = tempdir().unwrap();
        let client = dir.path();
        let paths = ClientPaths::new(client);
        std::fs::write(&paths.list, b"old").unwrap();
        std::fs::write(&paths.next, b"new").unwrap();
        std::fs::write(&paths.journal, b"").unwrap();

        recover(&paths).unwrap();

        assert!(!paths.next.exists());
        assert!(!paths.journal.exists());
        assert!(paths.list.exists());
        assert_eq!(std::fs::read(&paths.list).unwrap(), b"new");
        assert_eq!(std::fs::read(&paths.list_backup).unwrap(), b"old");
    }

    #[test]
    fn recovery_discards_an_empty_journal() {
        let dir = tempdir().unwrap();
        let paths = ClientPaths::new(dir.path());
        std::fs::write(&paths.list, build_register(&["a"])).unwrap();
        {
            RegisterWriter::create(&paths.journal).unwrap();
        }
        // journal has only a version header, no footer: still "empty" per the open-question rule.

        recover(&paths).unwrap();
        assert!(!paths.journal.exists());
        assert!(paths.list.exists());
    }

    #[test]
    fn recovery_reconciles_a_nonempty_journal_with_no_next() {
        let dir = tempdir().unwrap();
        let paths = ClientPaths::new(dir.path());
        std::fs::write(&paths.list, build_register(&["a", "b", "c"])).unwrap();
        {
            let mut journal = RegisterWriter::create(&paths.journal).unwrap();
            // Simulates an interrupted backup that got through path "a" (appended) before abort.
            journal.put_path("a").unwrap();
            journal.put_record(2, &dir_entry(0o700)).unwrap();
            journal.finish().unwrap();
        }

        recover(&paths).unwrap();

        assert!(!paths.journal.exists());
        assert!(!paths.partial.exists());
        let mut reader = RegisterReader::open(&paths.list, false).unwrap().unwrap();
        let a = next_entry(&mut reader).unwrap().unwrap();
        assert_eq!(a.path, "a");
        assert_eq!(a.records.len(), 2);
        assert_eq!(a.records[1].0, 2);
        let b = next_entry(&mut reader).unwrap().unwrap();
        assert_eq!(b.path, "b");
        assert_eq!(b.records.len(), 1);
        let c = next_entry(&mut reader).unwrap().unwrap();
        assert_eq!(c.path, "c");
        assert_eq!(c.records.len(), 1);
        assert!(next_entry(&mut reader).unwrap().is_none());
    }

    #[test]
    fn recovery_restores_list_from_backup_when_list_missing() {
        let dir = tempdir().unwrap();
        let client = dir.path();
        let paths = ClientPaths::new(client);
        std::fs::write(&paths.list_backup, b"backup").unwrap();

        recover(&paths).unwrap();

        assert!(paths.list.exists());
        assert_eq!(std::fs::read(&paths.list).unwrap(), b"backup");
    }
}
