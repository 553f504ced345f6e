//! Repository coordinator: opens/closes the content store and client registers under a single
//! exclusive lock, and orchestrates `scan`/`check`/`restore`.

use crate::config::{ClientConfig, RepositoryConfig};
use crate::errors::{RepoError, Result};
use crate::missing::{MissingList, Reason};
use crate::register::commit::{self, ClientPaths};
use crate::register::reader::{next_entry, record_at_date, RegisterReader};
use crate::store::ContentStore;
use crate::types::{Fingerprint, NodeKind, NodeMetadata};
use crate::walk::{self, BackupOptions, WalkReport};
use log::{info, warn};
use std::path::{Path, PathBuf};

const RESERVED_ENTRIES: &[&str] =
    &[".data", ".mount", ".lock", ".checksums", "config.toml", "logs", ".last-scan", ".last-check"];

/// How a repository was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
    /// Recovery dry-run of every client on startup: no journal is created, no backups may run.
    ReadWriteCheck,
}

impl OpenMode {
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::ReadWrite | Self::ReadWriteCheck)
    }
}

/// Holds the `.lock` file for the lifetime of a write-mode [`Repository`]; removed on drop.
struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // No portable "is this pid alive" probe without an extra dependency; assume alive so a
    // live writer is never clobbered, at the cost of requiring manual lock removal after a
    // crash on these targets.
    true
}

fn acquire_lock(root: &Path) -> Result<LockGuard> {
    let lock_path = root.join(".lock");
    match std::fs::read_to_string(&lock_path) {
        Ok(contents) => {
            if let Ok(pid) = contents.trim().parse::<u32>() {
                if process_alive(pid) {
                    return Err(RepoError::LockHeld(pid));
                }
                warn!("repo: breaking stale lock held by dead process {pid}");
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    std::fs::write(&lock_path, std::process::id().to_string())?;
    Ok(LockGuard { path: lock_path })
}

/// Tally of one `scan` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub referenced: usize,
    pub newly_missing: usize,
    pub newly_inconsistent: usize,
    pub removed_unreferenced: usize,
}

/// Tally of one `check` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub checked: usize,
    pub corrupt: usize,
}

/// Tally of one `restore` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub failed: usize,
}

/// The repository: a content store, a set of per-client registers, and the cross-client
/// [`MissingList`], all under one `.lock`.
pub struct Repository {
    root: PathBuf,
    config: RepositoryConfig,
    store: ContentStore,
    missing: MissingList,
    mode: OpenMode,
    _lock: Option<LockGuard>,
}

impl Repository {
    /// Create a fresh, empty repository at `root`.
    ///
    /// # Errors
    /// Returns an error if `root` cannot be created or `config.toml` cannot be written.
    pub fn init(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let config = RepositoryConfig::default();
        config.save(root)?;
        Self::open(root, OpenMode::ReadWrite)
    }

    /// Open an existing (or newly initialized) repository.
    ///
    /// On a write-mode open, every client's register is first passed through
    /// [`commit::recover`] to complete any half-finished merges left by a prior crash.
    ///
    /// # Errors
    /// Returns [`RepoError::LockHeld`] if a live writer already holds the lock, or any I/O error
    /// encountered opening the store, config, or missing list.
    pub fn open(root: &Path, mode: OpenMode) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let _lock = if mode.is_write() { Some(acquire_lock(root)?) } else { None };

        let config = RepositoryConfig::load(root)?;
        let store = ContentStore::open(root.join(".data"))?;
        let missing = MissingList::load(&root.join(".checksums"))?;

        let repo =
            Self { root: root.to_path_buf(), config, store, missing, mode, _lock };

        if mode.is_write() {
            for client in repo.clients()? {
                let paths = ClientPaths::new(&repo.client_dir(&client));
                commit::recover(&paths)?;
            }
        }
        Ok(repo)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    fn client_dir(&self, client: &str) -> PathBuf {
        self.root.join(client)
    }

    /// List client names: every direct subdirectory of the repository root that is not one of
    /// the reserved store/lock/config entries.
    ///
    /// # Errors
    /// Returns an error if the repository root cannot be read.
    pub fn clients(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !RESERVED_ENTRIES.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Register a new client with `config`.
    ///
    /// # Errors
    /// Returns [`RepoError::ClientAlreadyExists`] if the client directory already has a
    /// `client.toml`, or an I/O error saving it.
    pub fn create_client(&self, config: ClientConfig) -> Result<()> {
        if self.client_dir(&config.name).join("client.toml").exists() {
            return Err(RepoError::ClientAlreadyExists(config.name));
        }
        config.save(&self.root)
    }

    /// Run a backup for `client` using its saved [`ClientConfig`].
    ///
    /// # Errors
    /// Returns [`RepoError::NoSuchClient`] if the client is unknown, or any walk/register error.
    pub fn backup_client(&mut self, client: &str, now: i64) -> Result<WalkReport> {
        if self.mode == OpenMode::ReadOnly {
            return Err(RepoError::Config("backup requires a write-mode open".into()));
        }
        if self.mode == OpenMode::ReadWriteCheck {
            return Err(RepoError::Config(
                "read-write-check mode performs recovery only; no backups may run".into(),
            ));
        }
        let client_config = ClientConfig::load(&self.root, client)
            .map_err(|_| RepoError::NoSuchClient(client.to_string()))?;
        let options = BackupOptions::default();
        let report = walk::backup(
            &self.store,
            &mut self.missing,
            &self.client_dir(client),
            &client_config.paths,
            &options,
            now,
        )?;
        std::fs::write(self.client_dir(client).join(".last-backup"), now.to_string())?;
        self.missing.save(&self.root.join(".checksums"))?;
        info!(
            "backup {client}: A={} ~={} M={} !={} C={} R={} L={} ignored={}",
            report.added,
            report.meta_only,
            report.modified,
            report.incomplete,
            report.conflict,
            report.recovered,
            report.link_changed,
            report.ignored
        );
        Ok(report)
    }

    /// Collect every fingerprint appearing in any record (live or historical) of every client
    /// register, with its register-recorded size.
    ///
    /// # Errors
    /// Returns an error if a client register cannot be read.
    fn referenced_fingerprints(&self) -> Result<std::collections::HashMap<Fingerprint, i64>> {
        let mut out = std::collections::HashMap::new();
        for client in self.clients()? {
            let list_path = self.client_dir(&client).join("list");
            let Some(mut reader) = RegisterReader::open(&list_path, true)? else { continue };
            while let Some(entry) = next_entry(&mut reader)? {
                for (_, meta) in entry.records {
                    if let NodeKind::File { fingerprint: Some(fp) } = meta.kind {
                        out.insert(fp, meta.size);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Reconcile referenced fingerprints against the content store.
    ///
    /// # Errors
    /// Returns an error if a register or the store cannot be read, or the missing list cannot be
    /// persisted.
    pub fn scan(&mut self) -> Result<ScanReport> {
        let referenced = self.referenced_fingerprints()?;
        let present = self.store.crawl(false, false)?;
        let present_size_by_fp: std::collections::HashMap<&Fingerprint, u64> =
            present.iter().filter(|(_, ok, _, _)| *ok).map(|(fp, _, size, _)| (fp, *size)).collect();

        let mut report = ScanReport { referenced: referenced.len(), ..Default::default() };

        for (fp, expected_size) in &referenced {
            match present_size_by_fp.get(fp) {
                None => {
                    self.missing.mark(fp.clone(), Reason::Missing, -1);
                    report.newly_missing += 1;
                }
                Some(&stored_size) => {
                    if *expected_size >= 0 && stored_size != *expected_size as u64 {
                        self.missing.mark(fp.clone(), Reason::Inconsistent, *expected_size);
                        report.newly_inconsistent += 1;
                    }
                }
            }
        }

        if self.config.remove_obsolete {
            for (fp, ok, _, _) in &present {
                if *ok && !referenced.contains_key(fp) {
                    self.store.remove(fp)?;
                    report.removed_unreferenced += 1;
                }
            }
        }

        self.missing.save(&self.root.join(".checksums"))?;
        std::fs::write(self.root.join(".last-scan"), "")?;
        info!(
            "scan: {} referenced, {} newly missing, {} newly inconsistent, {} removed",
            report.referenced, report.newly_missing, report.newly_inconsistent, report.removed_unreferenced
        );
        Ok(report)
    }

    /// Thorough crawl over the content store, marking (and optionally repairing) corrupt
    /// objects.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub fn check(&mut self, repair: bool) -> Result<CheckReport> {
        let found = self.store.crawl(true, repair)?;
        let corrupt = found.iter().filter(|(_, ok, _, _)| !ok).count();
        std::fs::write(self.root.join(".last-check"), "")?;
        Ok(CheckReport { checked: found.len(), corrupt })
    }

    /// Restore every surviving node under `path_prefix` as of `date` into `dest_root`, continuing
    /// past individual node failures.
    ///
    /// `date == 0` means "latest"; `date < 0` is relative to `now` (e.g. `-3600` is "one hour
    /// ago"); `date > 0` is an absolute timestamp. `now` anchors the relative case and should
    /// normally be the caller's current time.
    ///
    /// # Errors
    /// Returns an error only if the client register itself cannot be opened or read; per-node
    /// failures are logged and counted in the returned [`RestoreReport`] instead.
    pub fn restore(
        &self,
        client: &str,
        date: i64,
        now: i64,
        path_prefix: &str,
        dest_root: &Path,
    ) -> Result<RestoreReport> {
        let list_path = self.client_dir(client).join("list");
        let Some(mut reader) = RegisterReader::open(&list_path, false)? else {
            return Err(RepoError::NoSuchClient(client.to_string()));
        };
        let mut report = RestoreReport::default();
        while let Some(entry) = next_entry(&mut reader)? {
            if !entry.path.starts_with(path_prefix) {
                continue;
            }
            let Some((_, meta)) = record_at_date(&entry.records, date, now) else { continue };
            if meta.is_tombstone() {
                continue;
            }
            let rel = entry.path.trim_start_matches('/');
            let dest = dest_root.join(rel);
            match crate::restore::recreate(&self.store, &dest, meta) {
                Ok(()) => report.restored += 1,
                Err(e) => {
                    warn!("restore: failed to recreate {}: {e}", entry.path);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_then_open_reopens_cleanly() {
        let dir = tempdir().unwrap();
        {
            let _repo = Repository::init(dir.path()).unwrap();
        }
        let repo = Repository::open(dir.path(), OpenMode::ReadOnly).unwrap();
        assert_eq!(repo.clients().unwrap(), Vec::<String>::new());
    }

    #[test]
    fn second_write_open_is_locked_out() {
        let dir = tempdir().unwrap();
        let _first = Repository::open(dir.path(), OpenMode::ReadWrite).unwrap();
        let second = Repository::open(dir.path(), OpenMode::ReadWrite);
        assert!(matches!(second, Err(RepoError::LockHeld(_))));
    }

    #[test]
    fn stale_lock_from_a_dead_pid_is_broken() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".lock"), "999999999").unwrap();
        let repo = Repository::open(dir.path(), OpenMode::ReadWrite);
        assert!(repo.is_ok());
    }

    #[test]
    fn create_client_then_backup_then_scan() {
        let dir = tempdir().unwrap();
        let src = tempdir().unwrap();
        std::fs::write(src.path().join("a"), b"repository-level content").unwrap();

        let mut repo = Repository::open(dir.path(), OpenMode::ReadWrite).unwrap();
        repo.create_client(ClientConfig::new("laptop", vec![src.path().to_path_buf()])).unwrap();
        let report = repo.backup_client("laptop", 1000).unwrap();
        assert!(report.added > 0);

        let scan = repo.scan().unwrap();
        assert_eq!(scan.newly_missing, 0);
        assert_eq!(scan.newly_inconsistent, 0);
    }
}
