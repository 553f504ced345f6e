//! Backup traversal: the entry point that walks a client's configured roots, classifies every
//! node against its previous register entry, copies changed bodies into the content store, and
//! drives the register merge forward.

pub mod decision;

use crate::errors::{RepoError, Result};
use crate::filter::{self, Filter, FilterNode};
use crate::missing::MissingList;
use crate::register::commit::{self, search, ClientPaths};
use crate::register::reader::{next_entry, Entry, RegisterReader};
use crate::register::writer::RegisterWriter;
use crate::register::{compare_paths, SearchStatus};
use crate::scm::ScmProbe;
use crate::store::ContentStore;
use crate::types::{CompressionRequest, NodeKind, NodeMetadata, OpCode};
use log::{debug, warn};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Per-run tallies of what the walk did, one counter per op/ignore code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkReport {
    pub added: usize,
    pub meta_only: usize,
    pub modified: usize,
    pub incomplete: usize,
    pub conflict: usize,
    pub recovered: usize,
    pub link_changed: usize,
    pub ignored: usize,
    pub listing_failures: usize,
}

impl WalkReport {
    fn tally(&mut self, op: OpCode) {
        match op {
            OpCode::Add => self.added += 1,
            OpCode::MetaOnly => self.meta_only += 1,
            OpCode::Modified => self.modified += 1,
            OpCode::Incomplete => self.incomplete += 1,
            OpCode::Conflict => self.conflict += 1,
            OpCode::Recover => self.recovered += 1,
            OpCode::LinkChanged => self.link_changed += 1,
        }
    }
}

/// Everything a backup run needs beyond the store/register/missing-list plumbing.
pub struct BackupOptions<'a> {
    pub filters: &'a [Filter],
    pub scm_probes: &'a [Box<dyn ScmProbe>],
    /// Shadow directory tree mirroring backed-up paths.
    pub tree_mirror: Option<&'a Path>,
    pub tree_mirror_hard_links: bool,
}

impl Default for BackupOptions<'_> {
    fn default() -> Self {
        Self { filters: &[], scm_probes: &[], tree_mirror: None, tree_mirror_hard_links: false }
    }
}

/// Drive the register's reader/partial/journal trio through one backup run, threading the same
/// look-ahead slot across every `advance_to` call.
struct MergeCursor {
    reader: Option<RegisterReader<BufReader<File>>>,
    lookahead: Option<Entry>,
    partial: RegisterWriter<BufWriter<File>>,
    journal: RegisterWriter<BufWriter<File>>,
    now: i64,
}

impl MergeCursor {
    /// Flush every register entry strictly less than `target` (tombstoning any that are still
    /// live, since the walk visits paths in the same order the register stores them and never
    /// revisits one already passed), then return the entry found exactly at `target`, if any.
    fn advance_to(&mut self, target: &str) -> Result<Option<Entry>> {
        let Some(reader) = self.reader.as_mut() else { return Ok(None) };
        let status = search(
            reader,
            &mut self.lookahead,
            Some(target),
            None,
            true,
            self.now,
            &mut self.partial,
            Some(&mut self.journal),
        )?;
        match status {
            SearchStatus::Found => Ok(self.lookahead.take()),
            SearchStatus::Exceeded | SearchStatus::Eor => Ok(None),
        }
    }

    /// Flush everything left in the old register once the walk has visited every root
    /// (tombstoning the paths it never reached: vanished paths).
    fn finish_flush(&mut self) -> Result<()> {
        let Some(reader) = self.reader.as_mut() else { return Ok(()) };
        search(reader, &mut self.lookahead, None, None, true, self.now, &mut self.partial, Some(&mut self.journal))?;
        Ok(())
    }

    /// Append the outgoing record for `path`. `existing` is the path's full prior history (may
    /// be empty); `replace_in_place` drops its last record instead of appending after it, used
    /// by the walk's retry ops (`!`, `C`, `R`) rather than the history-preserving ops.
    fn write_entry(
        &mut self,
        path: &str,
        mut existing: Vec<(i64, NodeMetadata)>,
        new_record: (i64, NodeMetadata),
        replace_in_place: bool,
    ) -> Result<()> {
        if replace_in_place {
            existing.pop();
        }
        existing.push(new_record.clone());
        self.partial.put_path(path)?;
        for (ts, meta) in &existing {
            self.partial.put_record(*ts, meta)?;
        }
        self.journal.put_path(path)?;
        self.journal.put_record(new_record.0, &new_record.1)?;
        Ok(())
    }
}

/// Walk every configured root under `client_dir`, updating the register and content store.
///
/// Roots are visited in path-comparator order so the register merge can advance monotonically;
/// callers must reset [`crate::abort::reset`] before invoking if a fresh abort window is wanted.
///
/// # Errors
/// Returns [`RepoError::WalkAborted`] if the abort flag was set mid-walk (the register's partial
/// and journal files are left on disk for the next open's crash recovery), or any I/O/register
/// error encountered preparing the client directory.
pub fn backup(
    store: &ContentStore,
    missing: &mut MissingList,
    client_dir: &Path,
    roots: &[PathBuf],
    options: &BackupOptions<'_>,
    now: i64,
) -> Result<WalkReport> {
    std::fs::create_dir_all(client_dir)?;
    let paths = ClientPaths::new(client_dir);
    commit::recover(&paths)?;

    let reader = RegisterReader::open(&paths.list, true)?;
    let partial = RegisterWriter::create(&paths.partial)?;
    let journal = RegisterWriter::create(&paths.journal)?;
    let mut cursor = MergeCursor { reader, lookahead: None, partial, journal, now };

    let mut sorted_roots: Vec<(String, &PathBuf)> =
        roots.iter().map(|r| (path_to_remote(r), r)).collect();
    sorted_roots.sort_by(|a, b| compare_paths(&a.0, &b.0));

    let report = {
        let mut walker = Walker {
            store,
            missing,
            filters: options.filters,
            scm_probes: options.scm_probes,
            options,
            cursor: &mut cursor,
            report: WalkReport::default(),
            now,
        };
        for (remote, root) in &sorted_roots {
            walker.visit_node(root, remote, None)?;
        }
        walker.cursor.finish_flush()?;
        walker.report
    };

    let MergeCursor { partial, journal, .. } = cursor;
    partial.finish()?;
    journal.finish()?;
    commit::commit(&paths)?;
    Ok(report)
}

struct Walker<'a> {
    store: &'a ContentStore,
    missing: &'a mut MissingList,
    filters: &'a [Filter],
    scm_probes: &'a [Box<dyn ScmProbe>],
    options: &'a BackupOptions<'a>,
    cursor: &'a mut MergeCursor,
    report: WalkReport,
    now: i64,
}

impl Walker<'_> {
    fn visit_node(&mut self, local: &Path, remote: &str, parent_probe: Option<&dyn ScmProbe>) -> Result<()> {
        if crate::abort::aborting() {
            return Err(RepoError::WalkAborted);
        }

        let stat = match stat_node(local) {
            Ok(s) => s,
            Err(e) => {
                self.report.ignored += 1;
                debug!("I ? ? u {remote}: {e}");
                return Ok(());
            }
        };

        if local.file_name().is_some_and(|n| n == ".hbackup") && matches!(stat.kind, NodeKind::Dir) {
            self.report.ignored += 1;
            debug!("I d  s {remote}");
            return Ok(());
        }
        if let Some(probe) = parent_probe {
            if probe.ignore(local) {
                self.report.ignored += 1;
                debug!("I {}  p {remote}", stat.kind.tag());
                return Ok(());
            }
        }
        let filter_node = FilterNode { path: Path::new(remote), kind: &stat.kind, size: stat.size };
        if filter::must_ignore(self.filters, filter_node) {
            self.report.ignored += 1;
            debug!("I {}  f {remote}", stat.kind.tag());
            return Ok(());
        }

        // Listed up front, before the outgoing record is written, so a listing failure can
        // still override this directory's own `size` to -1 on the record the walk is about to
        // emit for it, rather than only being visible as a counter.
        let dir_listing =
            if matches!(stat.kind, NodeKind::Dir) { Some(std::fs::read_dir(local)) } else { None };

        let found = self.cursor.advance_to(remote)?;
        let (previous, existing_records) = match found {
            Some(entry) => {
                let previous = entry.records.last().map(|(_, m)| m.clone());
                (previous, entry.records)
            }
            None => (None, Vec::new()),
        };

        let op = decision::decide(previous.as_ref(), &stat, self.missing);
        self.report.tally(op);

        let mut live = stat.clone();
        if op.needs_body() {
            if let NodeKind::File { .. } = &stat.kind {
                self.copy_body(local, remote, &mut live);
            }
        }
        if matches!(&dir_listing, Some(Err(_))) {
            live.size = -1;
        }

        let replace_in_place = matches!(op, OpCode::Incomplete | OpCode::Conflict | OpCode::Recover);
        let ts = if replace_in_place {
            existing_records.last().map_or(self.now, |(ts, _)| *ts)
        } else {
            let last = existing_records.last().map_or(0, |(ts, _)| *ts);
            self.now.max(last + 1)
        };
        self.cursor.write_entry(remote, existing_records, (ts, live.clone()), replace_in_place)?;

        if let Some(mirror_root) = self.options.tree_mirror {
            self.mirror_node(mirror_root, remote, &live);
        }

        match dir_listing {
            Some(Ok(entries)) => self.visit_dir_children(local, remote, entries, parent_probe)?,
            Some(Err(e)) => {
                warn!("walk: failed to list {remote}: {e}");
                self.report.listing_failures += 1;
            }
            None => {}
        }
        Ok(())
    }

    fn copy_body(&mut self, local: &Path, remote: &str, live: &mut NodeMetadata) {
        let filter_node = FilterNode { path: Path::new(remote), kind: &live.kind, size: live.size };
        let compression = match filter::compression_for(self.filters, filter_node) {
            filter::CompressionOverride::Never => CompressionRequest::Never,
            filter::CompressionOverride::Always => CompressionRequest::Now { auto: false },
            filter::CompressionOverride::Auto => CompressionRequest::Later,
        };
        match self.store.write(local, compression) {
            Ok((fp, _status)) => {
                if self.missing.is_missing(&fp) || self.missing.is_inconsistent(&fp) {
                    self.missing.mark_recovered(&fp);
                }
                live.kind = NodeKind::File { fingerprint: Some(fp) };
            }
            Err(e) => {
                warn!("walk: failed to copy body for {remote}: {e}");
                live.kind = NodeKind::File { fingerprint: None };
            }
        }
    }

    fn visit_dir_children(
        &mut self,
        local: &Path,
        remote: &str,
        entries: std::fs::ReadDir,
        parent_probe: Option<&dyn ScmProbe>,
    ) -> Result<()> {
        let mut names: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort_by(|a, b| compare_paths(a, b));

        let probe = crate::scm::resolve_for(self.scm_probes, parent_probe, local);
        for name in names {
            let child_local = local.join(&name);
            let child_remote = join_remote(remote, &name);
            self.visit_node(&child_local, &child_remote, probe)?;
        }
        Ok(())
    }

    fn mirror_node(&self, mirror_root: &Path, remote: &str, live: &NodeMetadata) {
        let dest = mirror_root.join(remote.trim_start_matches('/'));
        let Some(parent) = dest.parent() else { return };
        if std::fs::create_dir_all(parent).is_err() {
            return;
        }
        match &live.kind {
            NodeKind::Dir => {
                let _ = std::fs::create_dir_all(&dest);
            }
            #[cfg(unix)]
            NodeKind::Link { target } => {
                let _ = std::os::unix::fs::symlink(target, &dest);
            }
            #[cfg(unix)]
            NodeKind::File { fingerprint: Some(fp) } => {
                if let Ok((store_path, _ext)) = self.store.name(fp) {
                    let linked = if self.options.tree_mirror_hard_links {
                        crate::fsutil::hard_link_idempotent(&store_path, &dest)
                    } else {
                        std::os::unix::fs::symlink(&store_path, &dest)
                    };
                    if let Err(e) = linked {
                        debug!("tree mirror: failed to link {remote}: {e}");
                    }
                }
            }
            _ => {}
        }
    }
}

fn join_remote(remote: &str, name: &str) -> String {
    if remote.ends_with('/') {
        format!("{remote}{name}")
    } else {
        format!("{remote}/{name}")
    }
}

fn path_to_remote(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn mtime_secs(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs() as i64)
}

/// Stat `path` without following a terminal symlink, producing the metadata tuple the register
/// stores.
fn stat_node(path: &Path) -> std::io::Result<NodeMetadata> {
    let meta = std::fs::symlink_metadata(path)?;
    let file_type = meta.file_type();

    #[cfg(unix)]
    let (uid, gid, mode, major, minor) = {
        use std::os::unix::fs::MetadataExt;
        let rdev = meta.rdev();
        (meta.uid(), meta.gid(), meta.mode(), ((rdev >> 8) & 0xfff) as u32, (rdev & 0xff) as u32)
    };
    #[cfg(not(unix))]
    let (uid, gid, mode, major, minor): (u32, u32, u32, u32, u32) =
        (0, 0, if file_type.is_dir() { 0o755 } else { 0o644 }, 0, 0);

    let kind = if file_type.is_symlink() {
        let target = std::fs::read_link(path)?.to_string_lossy().into_owned();
        NodeKind::Link { target }
    } else if file_type.is_dir() {
        NodeKind::Dir
    } else if file_type.is_file() {
        NodeKind::File { fingerprint: None }
    } else {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if file_type.is_fifo() {
                NodeKind::Fifo
            } else if file_type.is_socket() {
                NodeKind::Socket
            } else if file_type.is_block_device() {
                NodeKind::Device { major, minor, block: true }
            } else if file_type.is_char_device() {
                NodeKind::Device { major, minor, block: false }
            } else {
                NodeKind::Unknown
            }
        }
        #[cfg(not(unix))]
        {
            NodeKind::Unknown
        }
    };

    let size = match &kind {
        NodeKind::Link { target } => target.len() as i64,
        NodeKind::File { .. } => meta.len() as i64,
        _ => 0,
    };

    Ok(NodeMetadata { kind, size, mtime: mtime_secs(&meta), uid, gid, mode })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryConfig;
    use tempfile::tempdir;

    fn fresh_store(dir: &Path) -> ContentStore {
        ContentStore::open(dir.join("store")).unwrap()
    }

    #[test]
    fn fresh_client_one_file_is_added() {
        let _ = RepositoryConfig::default();
        let root = tempdir().unwrap();
        let src = tempdir().unwrap();
        std::fs::create_dir(src.path().join("dir")).unwrap();
        std::fs::write(src.path().join("dir/a"), b"hello world, 13!").unwrap();

        let store = fresh_store(root.path());
        let mut missing = MissingList::new();
        let client_dir = root.path().join("client1");
        let options = BackupOptions::default();

        let report =
            backup(&store, &mut missing, &client_dir, &[src.path().to_path_buf()], &options, 1000)
                .unwrap();
        assert_eq!(report.added, 3); // src root dir + "dir" + "dir/a"
        assert!(client_dir.join("list").exists());
        assert!(!client_dir.join("journal").exists());
        assert!(!client_dir.join("partial").exists());
    }

    #[test]
    fn second_identical_backup_is_meta_only_or_unchanged() {
        let root = tempdir().unwrap();
        let src = tempdir().unwrap();
        std::fs::write(src.path().join("a"), b"stable content").unwrap();

        let store = fresh_store(root.path());
        let mut missing = MissingList::new();
        let client_dir = root.path().join("client1");
        let options = BackupOptions::default();
        let roots = [src.path().to_path_buf()];

        backup(&store, &mut missing, &client_dir, &roots, &options, 1000).unwrap();
        let second = backup(&store, &mut missing, &client_dir, &roots, &options, 2000).unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.modified, 0);
        assert!(second.meta_only > 0);
    }

    #[test]
    fn vanished_path_is_tombstoned() {
        let root = tempdir().unwrap();
        let src = tempdir().unwrap();
        std::fs::write(src.path().join("a"), b"will vanish").unwrap();
        std::fs::write(src.path().join("b"), b"stays").unwrap();

        let store = fresh_store(root.path());
        let mut missing = MissingList::new();
        let client_dir = root.path().join("client1");
        let options = BackupOptions::default();

        backup(&store, &mut missing, &client_dir, &[src.path().to_path_buf()], &options, 1000)
            .unwrap();
        std::fs::remove_file(src.path().join("a")).unwrap();
        backup(&store, &mut missing, &client_dir, &[src.path().to_path_buf()], &options, 2000)
            .unwrap();

        let list_path = client_dir.join("list");
        let mut reader = RegisterReader::open(&list_path, false).unwrap().unwrap();
        let mut saw_tombstone = false;
        while let Some(entry) = next_entry(&mut reader).unwrap() {
            if entry.path.ends_with('a') && entry.records.last().unwrap().1.is_tombstone() {
                saw_tombstone = true;
            }
        }
        assert!(saw_tombstone);
    }

    #[test]
    fn deduplicates_identical_content_across_paths() {
        let root = tempdir().unwrap();
        let src = tempdir().unwrap();
        std::fs::create_dir(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("a"), b"same bytes here").unwrap();
        std::fs::write(src.path().join("sub/b"), b"same bytes here").unwrap();

        let store = fresh_store(root.path());
        let mut missing = MissingList::new();
        let client_dir = root.path().join("client1");
        let options = BackupOptions::default();

        backup(&store, &mut missing, &client_dir, &[src.path().to_path_buf()], &options, 1000)
            .unwrap();

        let survivors = store.crawl(true, false).unwrap();
        assert_eq!(survivors.len(), 1);
    }
}
