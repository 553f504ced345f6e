//! Version-control-aware "parser" plugin contract: given a directory, decide whether it is
//! under version control and which entries within it the walk should skip.

use std::path::Path;

/// A probe that, given a directory, decides whether it is under some form of source control and
/// which entries within it the walk should skip.
pub trait ScmProbe: Send + Sync {
    /// Whether this probe recognizes `dir` as one of its own (e.g. contains a `.git`).
    fn detect(&self, dir: &Path) -> bool;

    /// Whether `entry` (a direct child of a detected directory) should be ignored.
    fn ignore(&self, entry: &Path) -> bool;

    /// The probe to use for a detected directory's subdirectory `child`, if different from
    /// `self` (most probes just reuse themselves).
    fn child_for(&self, _child: &Path) -> Option<&dyn ScmProbe> {
        None
    }
}

/// Detects nothing; the walk proceeds unfiltered. The default when no SCM integration is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProbe;

impl ScmProbe for NullProbe {
    fn detect(&self, _dir: &Path) -> bool {
        false
    }

    fn ignore(&self, _entry: &Path) -> bool {
        false
    }
}

/// Detects any directory containing a named metadata subdirectory (`.git`, `.hg`, `.svn`, ...)
/// and ignores that metadata subdirectory itself, mirroring the simplest real-world SCM probes.
#[derive(Debug, Clone)]
pub struct DotDirProbe {
    marker: String,
}

impl DotDirProbe {
    #[must_use]
    pub fn new(marker: impl Into<String>) -> Self {
        Self { marker: marker.into() }
    }

    #[must_use]
    pub fn git() -> Self {
        Self::new(".git")
    }
}

impl ScmProbe for DotDirProbe {
    fn detect(&self, dir: &Path) -> bool {
        dir.join(&self.marker).is_dir()
    }

    fn ignore(&self, entry: &Path) -> bool {
        entry.file_name().is_some_and(|n| n == self.marker.as_str())
    }
}

/// Resolve the probe to use for `dir`, given candidate `probes` in priority order and the probe
/// the parent directory was already using, if any.
#[must_use]
pub fn resolve_for<'a>(
    probes: &'a [Box<dyn ScmProbe>],
    parent: Option<&'a dyn ScmProbe>,
    dir: &Path,
) -> Option<&'a dyn ScmProbe> {
    if let Some(parent) = parent {
        if let Some(child) = parent.child_for(dir) {
            return Some(child);
        }
        if parent.detect(dir) {
            return Some(parent);
        }
    }
    probes.iter().map(std::convert::AsRef::as_ref).find(|p| p.detect(dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn null_probe_never_detects_or_ignores() {
        let dir = tempdir().unwrap();
        let probe = NullProbe;
        assert!(!probe.detect(dir.path()));
        assert!(!probe.ignore(&dir.path().join("anything")));
    }

    #[test]
    fn dot_dir_probe_detects_and_ignores_marker() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let probe = DotDirProbe::git();
        assert!(probe.detect(dir.path()));
        assert!(probe.ignore(&dir.path().join(".git")));
        assert!(!probe.ignore(&dir.path().join("src")));
    }

    #[test]
    fn resolve_for_finds_matching_probe() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let probes: Vec<Box<dyn ScmProbe>> = vec![Box::new(DotDirProbe::git())];
        let resolved = resolve_for(&probes, None, dir.path());
        assert!(resolved.is_some());
    }
}
