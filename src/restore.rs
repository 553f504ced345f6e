//! Recreates one filesystem node from a register record during `Repository::restore`.

use crate::errors::Result;
use crate::store::ContentStore;
use crate::types::{NodeKind, NodeMetadata};
use std::path::Path;

/// Recreate `dest` as described by `meta`, then restore its mtime, permissions and ownership.
///
/// Device nodes, sockets and unknown kinds have no portable recreation and are skipped; a
/// tombstone record should never reach this function (callers filter those out first).
///
/// # Errors
/// Returns an error if the node's parent cannot be created, its body cannot be read from
/// `store`, or the node itself cannot be created.
pub fn recreate(store: &ContentStore, dest: &Path, meta: &NodeMetadata) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match &meta.kind {
        NodeKind::Dir => {
            std::fs::create_dir_all(dest)?;
        }
        NodeKind::File { fingerprint: Some(fp) } => {
            store.read(fp, dest)?;
        }
        NodeKind::File { fingerprint: None } => {
            std::fs::File::create(dest)?;
        }
        NodeKind::Link { target } => {
            let _ = std::fs::remove_file(dest);
            symlink(target, dest)?;
        }
        NodeKind::Fifo => {
            let _ = std::fs::remove_file(dest);
            unix::mkfifo(dest, meta.mode)?;
        }
        NodeKind::Device { .. } | NodeKind::Socket | NodeKind::Unknown | NodeKind::Tombstone => {
            return Ok(());
        }
    }
    restore_attrs(dest, meta);
    Ok(())
}

#[cfg(unix)]
fn symlink(target: &str, dest: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, dest)?;
    Ok(())
}

#[cfg(not(unix))]
fn symlink(_target: &str, _dest: &Path) -> Result<()> {
    Ok(())
}

/// Best-effort: a failure here should not abort the rest of the restore; failures are logged
/// and the traversal continues.
fn restore_attrs(dest: &Path, meta: &NodeMetadata) {
    if !matches!(meta.kind, NodeKind::Link { .. }) {
        if let Ok(file) = std::fs::OpenOptions::new().write(true).open(dest) {
            let mtime = std::time::UNIX_EPOCH
                + std::time::Duration::from_secs(meta.mtime.max(0) as u64);
            let times = std::fs::FileTimes::new().set_modified(mtime);
            if let Err(e) = file.set_times(times) {
                log::debug!("restore: failed to set mtime on {}: {e}", dest.display());
            }
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                std::fs::set_permissions(dest, std::fs::Permissions::from_mode(meta.mode))
            {
                log::debug!("restore: failed to set mode on {}: {e}", dest.display());
            }
        }
    }
    #[cfg(unix)]
    unix::chown(dest, meta.uid, meta.gid, matches!(meta.kind, NodeKind::Link { .. }));
}

/// Raw bindings to the handful of POSIX calls `std` has no safe wrapper for: `mkfifo` and
/// `chown`/`lchown`, needed for fifo and ownership recreation.
#[cfg(unix)]
#[allow(unsafe_code)]
mod unix {
    use crate::errors::Result;
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    fn to_cstring(path: &Path) -> Result<CString> {
        CString::new(path.as_os_str().as_bytes())
            .map_err(|_| crate::errors::RepoError::Config(format!("NUL byte in path {}", path.display())))
    }

    pub fn mkfifo(path: &Path, mode: u32) -> Result<()> {
        let c_path = to_cstring(path)?;
        // SAFETY: `c_path` is a valid NUL-terminated byte string for the lifetime of the call.
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), mode) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    pub fn chown(path: &Path, uid: u32, gid: u32, is_symlink: bool) {
        let Ok(c_path) = to_cstring(path) else { return };
        // SAFETY: `c_path` is a valid NUL-terminated byte string for the lifetime of the call.
        let rc = unsafe {
            if is_symlink {
                libc::lchown(c_path.as_ptr(), uid, gid)
            } else {
                libc::chown(c_path.as_ptr(), uid, gid)
            }
        };
        if rc != 0 {
            log::debug!(
                "restore: chown failed for {}: {}",
                path.display(),
                std::io::Error::last_os_error()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CompressionRequest;
    use tempfile::tempdir;

    #[test]
    fn recreates_a_directory() {
        let root = tempdir().unwrap();
        let store = ContentStore::open(root.path().join("store")).unwrap();
        let dest = root.path().join("out/sub");
        let meta = NodeMetadata { kind: NodeKind::Dir, size: 0, mtime: 1000, uid: 0, gid: 0, mode: 0o755 };
        recreate(&store, &dest, &meta).unwrap();
        assert!(dest.is_dir());
    }

    #[test]
    fn recreates_a_file_from_the_store() {
        let root = tempdir().unwrap();
        let src_dir = tempdir().unwrap();
        let store = ContentStore::open(root.path().join("store")).unwrap();
        let src = src_dir.path().join("a");
        std::fs::write(&src, b"restored content").unwrap();
        let (fp, _) = store.write(&src, CompressionRequest::Later).unwrap();

        let dest = root.path().join("out/a");
        let meta = NodeMetadata {
            kind: NodeKind::File { fingerprint: Some(fp) },
            size: 16,
            mtime: 1000,
            uid: 0,
            gid: 0,
            mode: 0o644,
        };
        recreate(&store, &dest, &meta).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"restored content");
    }

    #[cfg(unix)]
    #[test]
    fn recreates_a_symlink() {
        let root = tempdir().unwrap();
        let store = ContentStore::open(root.path().join("store")).unwrap();
        let dest = root.path().join("out/link");
        let meta = NodeMetadata {
            kind: NodeKind::Link { target: "/etc/hosts".to_string() },
            size: 10,
            mtime: 1000,
            uid: 0,
            gid: 0,
            mode: 0o777,
        };
        recreate(&store, &dest, &meta).unwrap();
        assert_eq!(std::fs::read_link(&dest).unwrap(), Path::new("/etc/hosts"));
    }

    #[test]
    fn skips_a_socket_without_erroring() {
        let root = tempdir().unwrap();
        let store = ContentStore::open(root.path().join("store")).unwrap();
        let dest = root.path().join("out/sock");
        let meta = NodeMetadata { kind: NodeKind::Socket, size: 0, mtime: 0, uid: 0, gid: 0, mode: 0 };
        recreate(&store, &dest, &meta).unwrap();
        assert!(!dest.exists());
    }
}
