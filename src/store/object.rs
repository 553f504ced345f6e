//! The on-disk shape of one stored object: body file(s) plus a small metadata sidecar.

use crate::errors::{RepoError, Result};
use crate::types::CompressionTag;
use std::path::{Path, PathBuf};

pub const FLAT_BODY: &str = "data";
pub const GZ_BODY: &str = "data.gz";
pub const META_FILE: &str = "meta";
pub const CORRUPT_MARKER: &str = "corrupt";

/// Default chunk size for the collision tie-break's leading-bytes compare, per spec §4.A.
const COLLISION_PREFIX_LEN: u64 = 10 * 1024 * 1024;

/// A resolved object directory: the directory itself plus which body representation(s) exist.
#[derive(Debug, Clone)]
pub struct ObjectLocation {
    pub dir: PathBuf,
}

impl ObjectLocation {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[must_use]
    pub fn flat_path(&self) -> PathBuf {
        self.dir.join(FLAT_BODY)
    }

    #[must_use]
    pub fn gz_path(&self) -> PathBuf {
        self.dir.join(GZ_BODY)
    }

    #[must_use]
    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }

    #[must_use]
    pub fn corrupt_marker_path(&self) -> PathBuf {
        self.dir.join(CORRUPT_MARKER)
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.dir.is_dir() && self.meta_path().is_file()
    }

    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        self.corrupt_marker_path().is_file()
    }

    /// Which body file is present, and its extension as used by `name()`.
    #[must_use]
    pub fn body_path_and_extension(&self) -> Option<(PathBuf, &'static str)> {
        if self.gz_path().is_file() {
            Some((self.gz_path(), ".gz"))
        } else if self.flat_path().is_file() {
            Some((self.flat_path(), ""))
        } else {
            None
        }
    }

    /// Read `(data_size, compression_tag)` from the metadata sidecar.
    ///
    /// The sidecar is a single line `<data_size>\t<compression_tag_char>`, per spec §6.
    ///
    /// # Errors
    /// Returns an error if the sidecar is missing or malformed.
    pub fn read_meta(&self) -> Result<(u64, CompressionTag)> {
        let text = std::fs::read_to_string(self.meta_path())?;
        let line = text.trim_end_matches(['\n', '\r']);
        let (size_part, tag_part) = line
            .split_once('\t')
            .ok_or_else(|| RepoError::CorruptObject(format!("malformed meta line: {line:?}")))?;
        let data_size = size_part
            .parse::<u64>()
            .map_err(|_| RepoError::CorruptObject(format!("malformed meta size: {size_part:?}")))?;
        let tag_char = tag_part
            .chars()
            .next()
            .ok_or_else(|| RepoError::CorruptObject(format!("malformed meta tag: {tag_part:?}")))?;
        Ok((data_size, CompressionTag::from_char(tag_char)))
    }

    /// Write `(data_size, compression_tag)` to the metadata sidecar as `<data_size>\t<tag>`.
    ///
    /// # Errors
    /// Returns an error if the sidecar cannot be written.
    pub fn write_meta(&self, data_size: u64, tag: CompressionTag) -> Result<()> {
        std::fs::write(self.meta_path(), format!("{data_size}\t{}", tag.as_char()))?;
        Ok(())
    }

    /// Remove the object directory and everything under it.
    ///
    /// # Errors
    /// Returns an error if removal fails for a reason other than the directory already being
    /// absent.
    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Mark the object corrupt: remove any body and leave a sentinel file, per `check`'s
    /// non-repair path.
    ///
    /// # Errors
    /// Returns an error if the filesystem operations fail.
    pub fn mark_corrupt(&self) -> Result<()> {
        if let Some((body, _)) = self.body_path_and_extension() {
            std::fs::remove_file(body)?;
        }
        std::fs::write(self.corrupt_marker_path(), b"")?;
        Ok(())
    }

    /// Remove whichever body file is present, keeping the directory (and meta file) around for
    /// the caller to immediately repopulate (`write`'s replace path).
    ///
    /// # Errors
    /// Returns an error if the body file exists but cannot be removed.
    pub fn remove_body(&self) -> Result<()> {
        if let Some((body, _)) = self.body_path_and_extension() {
            std::fs::remove_file(body)?;
        }
        Ok(())
    }

    /// On-disk length of whichever body representation is stored.
    ///
    /// # Errors
    /// Returns an error if the body file's metadata cannot be read.
    pub fn on_disk_len(&self) -> Result<u64> {
        match self.body_path_and_extension() {
            Some((body, _)) => Ok(std::fs::metadata(body)?.len()),
            None => Ok(0),
        }
    }

    /// Whether this object's *uncompressed* content is byte-identical to `source`, decompressing
    /// the stored body first if needed. Used to detect a deduplication hit independently of
    /// which representation either side happens to use.
    ///
    /// For a flat body this is the collision tie-break from spec §4.A: the leading
    /// `COLLISION_PREFIX_LEN` bytes are compared first, and a full compare only runs once that
    /// prefix agrees, so two candidates that diverge early are ruled out without reading either
    /// file in full.
    ///
    /// # Errors
    /// Returns an error if either file cannot be read or the stored body is malformed.
    pub fn equals_source(&self, source: &Path) -> Result<bool> {
        use std::io::Read;
        let Some((body, ext)) = self.body_path_and_extension() else { return Ok(false) };
        if ext == ".gz" {
            let f = std::fs::File::open(&body)?;
            let (decompressed, _) = crate::compress::decompress_to(f, Vec::new())?;
            let mut src_buf = Vec::new();
            std::fs::File::open(source)?.read_to_end(&mut src_buf)?;
            Ok(decompressed == src_buf)
        } else if !prefix_equal(&body, source, COLLISION_PREFIX_LEN)? {
            Ok(false)
        } else {
            files_equal(&body, source)
        }
    }
}

/// Compare the first `prefix_len` bytes of two readable files; used by `write`'s collision
/// tie-break.
///
/// # Errors
/// Returns an error if either file cannot be opened or read.
pub fn prefix_equal(a: &Path, b: &Path, prefix_len: u64) -> Result<bool> {
    use std::io::Read;
    let mut fa = std::fs::File::open(a)?;
    let mut fb = std::fs::File::open(b)?;
    let mut buf_a = vec![0u8; 64 * 1024];
    let mut buf_b = vec![0u8; 64 * 1024];
    let mut remaining = prefix_len;
    loop {
        let want = remaining.min(buf_a.len() as u64) as usize;
        if want == 0 {
            return Ok(true);
        }
        let na = fa.read(&mut buf_a[..want])?;
        let nb = fb.read(&mut buf_b[..want])?;
        if na != nb {
            return Ok(false);
        }
        if na == 0 {
            return Ok(true);
        }
        if buf_a[..na] != buf_b[..nb] {
            return Ok(false);
        }
        remaining -= na as u64;
    }
}

/// Byte-exact full-file comparison, used once a prefix compare agrees and the files are small
/// enough (or when confirming a dedup hit before discarding the new temp file).
///
/// # Errors
/// Returns an error if either file cannot be opened or read.
pub fn files_equal(a: &Path, b: &Path) -> Result<bool> {
    let meta_a = std::fs::metadata(a)?;
    let meta_b = std::fs::metadata(b)?;
    if meta_a.len() != meta_b.len() {
        return Ok(false);
    }
    prefix_equal(a, b, meta_a.len())
}
