use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Normalize a repository root: make absolute, do not otherwise touch it.
#[must_use]
pub fn normalize_repo_path(name_or_path: Option<&str>) -> PathBuf {
    let raw = match name_or_path {
        Some(s) if !s.trim().is_empty() => PathBuf::from(s),
        _ => PathBuf::from("repository"),
    };
    if raw.is_absolute() { raw } else { std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join(raw) }
}

/// Create a file with restrictive permissions where supported.
///
/// On Unix, this maps to 0o600. On Windows, the default inherits ACLs; we just avoid
/// world-writable flags.
///
/// # Errors
/// Returns an error if the file cannot be created/opened.
pub fn create_secure(path: &Path) -> io::Result<File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        OpenOptions::new().write(true).create(true).truncate(false).mode(0o600).open(path)
    }
    #[cfg(not(unix))]
    {
        OpenOptions::new().write(true).create(true).truncate(false).open(path)
    }
}

/// Rename `from` to `to`, replacing any existing file at `to`.
///
/// `std::fs::rename` already replaces the destination atomically on POSIX. On Windows,
/// `rename` fails if the destination exists, so we fall back to `MoveFileExW` with
/// `MOVEFILE_REPLACE_EXISTING`.
///
/// # Errors
/// Returns an error if neither the atomic replace nor the plain rename succeeds.
pub fn rename_replace(from: &Path, to: &Path) -> io::Result<()> {
    #[cfg(target_os = "windows")]
    {
        use std::ffi::OsStr;
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::winbase::{MOVEFILE_REPLACE_EXISTING, MoveFileExW};
        fn to_wide(s: &Path) -> Vec<u16> {
            OsStr::new(s).encode_wide().chain(Some(0)).collect()
        }
        let wfrom = to_wide(from);
        let wto = to_wide(to);
        let result = unsafe { MoveFileExW(wfrom.as_ptr(), wto.as_ptr(), MOVEFILE_REPLACE_EXISTING) };
        if result != 0 {
            return Ok(());
        }
        std::fs::rename(from, to)
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::fs::rename(from, to)
    }
}

/// Hard-link `path` to `link`, returning `Ok(())` if a link already exists at `link`.
///
/// # Errors
/// Returns an error if the link cannot be created for any reason other than it already existing.
pub fn hard_link_idempotent(path: &Path, link: &Path) -> io::Result<()> {
    match std::fs::hard_link(path, link) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}
