//! Content-store directory fan-out: progressively deeper two-character
//! prefix directories, bounded by a `.nofiles` marker that means "descend, don't look here".

use crate::errors::Result;
use std::fs;
use std::path::{Path, PathBuf};

const MARKER: &str = ".nofiles";

/// Resolve the directory that holds (or will hold) object `name` under `root`, following
/// `.nofiles` markers down as many fan-out levels as exist.
///
/// # Errors
/// Returns an error if a marker directory cannot be read.
pub fn resolve_dir(root: &Path, name: &str) -> Result<(PathBuf, String)> {
    let mut dir = root.to_path_buf();
    let mut remaining = name.to_string();
    loop {
        if dir.join(MARKER).is_file() && remaining.len() > 2 {
            let (prefix, rest) = remaining.split_at(2);
            dir = dir.join(prefix);
            remaining = rest.to_string();
        } else {
            return Ok((dir, remaining));
        }
    }
}

/// Bound the number of entries directly under `dir` to roughly `max_entries` by fanning out
/// into two-character-prefix subdirectories and leaving a `.nofiles` marker, matching the
/// original `Data::organise`. No-op if `dir` is already organised or under the threshold.
///
/// # Errors
/// Returns an error if reading or rewriting the directory fails.
pub fn organise(dir: &Path, max_entries: usize) -> Result<()> {
    if dir.join(MARKER).is_file() {
        return Ok(());
    }
    let entries: Vec<_> = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_name() != MARKER)
        .collect();
    if entries.len() <= max_entries {
        return Ok(());
    }
    for entry in &entries {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.len() <= 2 {
            continue; // too short to fan out further; leave at this level
        }
        let (prefix, rest) = name.split_at(2);
        let sub = dir.join(prefix);
        fs::create_dir_all(&sub)?;
        let dest = sub.join(rest);
        fs::rename(entry.path(), dest)?;
    }
    fs::write(dir.join(MARKER), b"")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resolve_without_marker_returns_root_and_full_name() {
        let dir = tempdir().unwrap();
        let (resolved, name) = resolve_dir(dir.path(), "abcdef0123").unwrap();
        assert_eq!(resolved, dir.path());
        assert_eq!(name, "abcdef0123");
    }

    #[test]
    fn resolve_follows_one_marker_level() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(MARKER), b"").unwrap();
        let (resolved, name) = resolve_dir(dir.path(), "abcdef0123").unwrap();
        assert_eq!(resolved, dir.path().join("ab"));
        assert_eq!(name, "cdef0123");
    }

    #[test]
    fn organise_fans_out_once_over_threshold() {
        let dir = tempdir().unwrap();
        for i in 0..5 {
            fs::create_dir(dir.path().join(format!("ab{i:04}-0"))).unwrap();
        }
        organise(dir.path(), 3).unwrap();
        assert!(dir.path().join(MARKER).is_file());
        assert!(dir.path().join("ab").is_dir());
        for i in 0..5 {
            assert!(dir.path().join("ab").join(format!("{i:04}-0")).is_dir());
        }
    }

    #[test]
    fn organise_is_noop_under_threshold() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("abcd-0")).unwrap();
        organise(dir.path(), 100).unwrap();
        assert!(!dir.path().join(MARKER).exists());
    }
}
