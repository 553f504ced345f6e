//! Content store operations: `write`, `read`, `name`, `check`, `remove`, `crawl`.

use super::copier::copy_to_sinks;
use super::layout;
use super::object::ObjectLocation;
use crate::errors::{RepoError, Result};
use crate::hash::hash_reader;
use crate::types::{CompressionRequest, CompressionTag, Fingerprint, WriteStatus};
use log::{debug, info, warn};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Directory fan-out threshold: `organise` is invoked once a directory holds more than this
/// many entries.
const FANOUT_THRESHOLD: usize = 256;

/// Slack, in bytes, in favor of keeping the flat representation when `auto_compress` ties are
/// broken: the smaller one is kept, breaking ties in favor of the flat representation with a
/// configurable slack.
const AUTO_COMPRESS_FLAT_SLACK: u64 = 64;

/// A single materialized representation of a body, ready to be installed into an object slot.
struct Representation {
    file: NamedTempFile,
    tag: CompressionTag,
    extension: &'static str,
}

impl Representation {
    fn on_disk_len(&self) -> Result<u64> {
        Ok(self.file.as_file().metadata()?.len())
    }
}

/// The content-addressed data store rooted at a directory.
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open (creating if absent) a content store rooted at `root`.
    ///
    /// # Errors
    /// Returns an error if `root` cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self { root })
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join(".tmp")
    }

    /// Locate the on-disk object directory for `fingerprint`, following fan-out markers.
    fn location(&self, fingerprint: &Fingerprint) -> Result<ObjectLocation> {
        let (dir, remaining) = layout::resolve_dir(&self.root, fingerprint.base())?;
        Ok(ObjectLocation::new(dir.join(format!("{remaining}-{}", fingerprint.suffix))))
    }

    /// Hash and copy `source` into one or two temp files according to `compression`, returning
    /// the content hash and whichever single representation is ultimately kept.
    fn copy_and_choose(
        &self,
        source: &Path,
        data_size: u64,
        compression: CompressionRequest,
    ) -> Result<(String, Representation)> {
        let want_flat = !matches!(compression, CompressionRequest::Now { auto: false });
        let want_gz = !matches!(compression, CompressionRequest::Never);

        let mut flat_tmp = if want_flat { Some(NamedTempFile::new_in(self.tmp_dir())?) } else { None };
        let mut gz_tmp = if want_gz { Some(NamedTempFile::new_in(self.tmp_dir())?) } else { None };

        let source_file = File::open(source)?;
        let flat_sink = flat_tmp.as_mut().map(|t| t.as_file_mut() as &mut (dyn Write + Send));
        let gz_sink = gz_tmp.as_mut().map(|t| t.as_file_mut() as &mut (dyn Write + Send));
        let (hash, _) = copy_to_sinks(source_file, data_size, flat_sink, gz_sink)?;

        let representation = match (compression, flat_tmp, gz_tmp) {
            (CompressionRequest::Never, Some(flat), None) => {
                Representation { file: flat, tag: CompressionTag::ForcedNo, extension: "" }
            }
            (CompressionRequest::Later, Some(flat), None) => {
                Representation { file: flat, tag: CompressionTag::Later, extension: "" }
            }
            (CompressionRequest::Now { auto: false }, None, Some(gz)) => {
                Representation { file: gz, tag: CompressionTag::ForcedYes, extension: ".gz" }
            }
            (CompressionRequest::Now { auto: true }, Some(flat), Some(gz)) => {
                let flat_len = flat.as_file().metadata()?.len();
                let gz_len = gz.as_file().metadata()?.len();
                if gz_len + AUTO_COMPRESS_FLAT_SLACK < flat_len {
                    Representation { file: gz, tag: CompressionTag::SizeYes, extension: ".gz" }
                } else {
                    Representation { file: flat, tag: CompressionTag::SizeNo, extension: "" }
                }
            }
            _ => unreachable!("want_flat/want_gz match every CompressionRequest variant"),
        };
        Ok((hash, representation))
    }

    fn install(obj_dir: &Path, repr: &Representation, data_size: u64) -> Result<()> {
        std::fs::create_dir_all(obj_dir)?;
        let dest = obj_dir.join(if repr.extension == ".gz" {
            super::object::GZ_BODY
        } else {
            super::object::FLAT_BODY
        });
        std::fs::rename(repr.file.path(), &dest)
            .or_else(|_| std::fs::copy(repr.file.path(), &dest).map(|_| ()))?;
        let loc = ObjectLocation::new(obj_dir.to_path_buf());
        loc.write_meta(data_size, repr.tag)
    }

    /// Copy `source`'s content into the store, deduplicating by content hash.
    ///
    /// # Errors
    /// Returns an error if `source` cannot be read or the store cannot be written to.
    pub fn write(
        &self,
        source: &Path,
        compression: CompressionRequest,
    ) -> Result<(Fingerprint, WriteStatus)> {
        let data_size = std::fs::metadata(source)?.len();
        let (base, representation) = self.copy_and_choose(source, data_size, compression)?;

        let (dir, remaining) = layout::resolve_dir(&self.root, &base)?;
        std::fs::create_dir_all(&dir)?;

        let mut suffix = 0u32;
        loop {
            let obj_dir = dir.join(format!("{remaining}-{suffix}"));
            let loc = ObjectLocation::new(obj_dir.clone());
            if !loc.exists() {
                Self::install(&obj_dir, &representation, data_size)?;
                layout::organise(&dir, FANOUT_THRESHOLD)?;
                debug!("store: added object {base}-{suffix}");
                return Ok((Fingerprint::new(base, suffix), WriteStatus::Added));
            }
            if loc.equals_source(source)? {
                let existing_len = loc.on_disk_len()?;
                let new_len = representation.on_disk_len()?;
                let (existing_size, existing_tag) = loc.read_meta()?;
                let should_replace =
                    (existing_size == 0 && existing_tag.is_compressed()) || existing_len > new_len;
                if should_replace {
                    loc.remove_body()?;
                    Self::install(&obj_dir, &representation, data_size)?;
                    info!("store: replaced object {base}-{suffix} with a smaller representation");
                    return Ok((Fingerprint::new(base, suffix), WriteStatus::Replaced));
                }
                debug!("store: dedup hit on object {base}-{suffix}");
                return Ok((Fingerprint::new(base, suffix), WriteStatus::Unchanged));
            }
            suffix += 1;
        }
    }

    /// Materialize the uncompressed body of `fingerprint` at `destination`.
    ///
    /// # Errors
    /// Returns [`RepoError::FingerprintMismatch`] if the stored body's hash no longer matches,
    /// or an I/O error if the object is missing or unreadable.
    pub fn read(&self, fingerprint: &Fingerprint, destination: &Path) -> Result<()> {
        let loc = self.location(fingerprint)?;
        let (body, ext) = loc
            .body_path_and_extension()
            .ok_or_else(|| RepoError::CorruptObject(format!("no body for {fingerprint}")))?;

        let tmp = NamedTempFile::new_in(self.tmp_dir())?;
        let actual_hash = if ext == ".gz" {
            let f = File::open(&body)?;
            let (bytes, _) = crate::compress::decompress_to(f, Vec::new())?;
            tmp.as_file().write_all(&bytes)?;
            blake3::hash(&bytes).to_hex().to_string()
        } else {
            let mut src = File::open(&body)?;
            let mut hashing = crate::hash::HashingWriter::new(tmp.as_file());
            std::io::copy(&mut src, &mut hashing)?;
            hashing.finish_hex()
        };
        if actual_hash != fingerprint.base {
            return Err(RepoError::FingerprintMismatch {
                expected: fingerprint.base.clone(),
                actual: actual_hash,
            });
        }
        std::fs::rename(tmp.path(), destination)
            .or_else(|_| std::fs::copy(tmp.path(), destination).map(|_| ()))?;
        Ok(())
    }

    /// Return the on-disk path and extension (`""` or `".gz"`) for `fingerprint`, without
    /// copying — used by restore's link modes.
    ///
    /// # Errors
    /// Returns an error if the object does not exist.
    pub fn name(&self, fingerprint: &Fingerprint) -> Result<(PathBuf, &'static str)> {
        let loc = self.location(fingerprint)?;
        loc.body_path_and_extension()
            .ok_or_else(|| RepoError::CorruptObject(format!("no body for {fingerprint}")))
    }

    /// Verify an object. Surficial check only confirms body+metadata exist; thorough re-hashes
    /// the body.
    ///
    /// # Errors
    /// Returns an error on I/O failure reading the object (not on the object being corrupt —
    /// that is reported via the returned tuple, not an `Err`).
    pub fn check(
        &self,
        fingerprint: &Fingerprint,
        thorough: bool,
        repair: bool,
    ) -> Result<(bool, u64, bool)> {
        let loc = self.location(fingerprint)?;
        if !loc.exists() {
            return Ok((false, 0, false));
        }
        let (recorded_size, tag) = loc.read_meta()?;
        if !thorough {
            return Ok((true, recorded_size, tag.is_compressed()));
        }
        let Some((body, ext)) = loc.body_path_and_extension() else {
            return Ok((false, recorded_size, tag.is_compressed()));
        };
        let (actual_hash, actual_size) = if ext == ".gz" {
            let f = File::open(&body)?;
            let (bytes, _) = crate::compress::decompress_to(f, Vec::new())?;
            (blake3::hash(&bytes).to_hex().to_string(), bytes.len() as u64)
        } else {
            hash_reader(File::open(&body)?)?
        };
        if actual_hash != fingerprint.base {
            warn!("store: hash mismatch for {fingerprint}");
            if repair {
                loc.mark_corrupt()?;
            }
            return Ok((false, recorded_size, tag.is_compressed()));
        }
        if actual_size != recorded_size {
            warn!("store: size mismatch for {fingerprint}: recorded {recorded_size}, actual {actual_size}");
            if repair {
                loc.write_meta(actual_size, tag)?;
            }
            return Ok((repair, actual_size, tag.is_compressed()));
        }
        Ok((true, recorded_size, tag.is_compressed()))
    }

    /// Remove the object directory for `fingerprint` and everything in it.
    ///
    /// # Errors
    /// Returns an error if removal fails.
    pub fn remove(&self, fingerprint: &Fingerprint) -> Result<()> {
        self.location(fingerprint)?.remove()
    }

    /// Walk the directory tree, resolving fan-out markers and `check`-ing every object found.
    ///
    /// Every object encountered is included in the result, tagged with whether it passed —
    /// callers that only want survivors (e.g. `scan`'s reference-vs-stored diff) filter on the
    /// `ok` field; callers that want a corrupt count (e.g. `check`) tally the `!ok` entries.
    ///
    /// # Errors
    /// Returns an error if the directory tree cannot be read.
    pub fn crawl(&self, thorough: bool, repair: bool) -> Result<Vec<(Fingerprint, bool, u64, bool)>> {
        let mut out = Vec::new();
        self.crawl_recurse(&self.root, String::new(), thorough, repair, &mut out)?;
        Ok(out)
    }

    fn crawl_recurse(
        &self,
        dir: &Path,
        prefix: String,
        thorough: bool,
        repair: bool,
        out: &mut Vec<(Fingerprint, bool, u64, bool)>,
    ) -> Result<()> {
        if crate::abort::aborting() {
            return Err(RepoError::WalkAborted);
        }
        let fanned_out = dir.join(".nofiles").is_file();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == ".nofiles" || name == ".tmp" {
                continue;
            }
            let path = entry.path();
            if path.is_dir() && fanned_out && name.len() == 2 {
                self.crawl_recurse(&path, format!("{prefix}{name}"), thorough, repair, out)?;
                continue;
            }
            let Some((base_part, suffix)) = name.rsplit_once('-') else { continue };
            let Ok(suffix) = suffix.parse::<u32>() else { continue };
            let fingerprint = Fingerprint::new(format!("{prefix}{base_part}"), suffix);
            let (ok, size, compressed) = self.check(&fingerprint, thorough, repair)?;
            out.push((fingerprint, ok, size, compressed));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_source(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn write_then_read_roundtrips_flat() {
        let root = tempdir().unwrap();
        let src_dir = tempdir().unwrap();
        let store = ContentStore::open(root.path().join("store")).unwrap();
        let src = make_source(src_dir.path(), "a", b"hello world");

        let (fp, status) = store.write(&src, CompressionRequest::Later).unwrap();
        assert_eq!(status, WriteStatus::Added);

        let dest = src_dir.path().join("out");
        store.read(&fp, &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello world");
    }

    #[test]
    fn dedup_on_identical_content() {
        let root = tempdir().unwrap();
        let src_dir = tempdir().unwrap();
        let store = ContentStore::open(root.path().join("store")).unwrap();
        let a = make_source(src_dir.path(), "a", b"same bytes");
        let b = make_source(src_dir.path(), "b", b"same bytes");

        let (fp1, s1) = store.write(&a, CompressionRequest::Later).unwrap();
        let (fp2, s2) = store.write(&b, CompressionRequest::Later).unwrap();

        assert_eq!(s1, WriteStatus::Added);
        assert_eq!(s2, WriteStatus::Unchanged);
        assert_eq!(fp1, fp2);
    }

    #[test]
    fn forced_compression_produces_gz_body() {
        let root = tempdir().unwrap();
        let src_dir = tempdir().unwrap();
        let store = ContentStore::open(root.path().join("store")).unwrap();
        let src = make_source(src_dir.path(), "a", b"compress me please".repeat(20).as_slice());

        let (fp, _status) = store.write(&src, CompressionRequest::Now { auto: false }).unwrap();
        let (path, ext) = store.name(&fp).unwrap();
        assert_eq!(ext, ".gz");
        assert!(path.exists());
    }

    #[test]
    fn thorough_check_passes_on_healthy_object() {
        let root = tempdir().unwrap();
        let src_dir = tempdir().unwrap();
        let store = ContentStore::open(root.path().join("store")).unwrap();
        let src = make_source(src_dir.path(), "a", b"healthy content");
        let (fp, _) = store.write(&src, CompressionRequest::Later).unwrap();

        let (ok, size, compressed) = store.check(&fp, true, false).unwrap();
        assert!(ok);
        assert_eq!(size, 15);
        assert!(!compressed);
    }

    #[test]
    fn crawl_finds_all_written_objects() {
        let root = tempdir().unwrap();
        let src_dir = tempdir().unwrap();
        let store = ContentStore::open(root.path().join("store")).unwrap();
        make_source(src_dir.path(), "a", b"one");
        make_source(src_dir.path(), "b", b"two");
        store.write(&src_dir.path().join("a"), CompressionRequest::Later).unwrap();
        store.write(&src_dir.path().join("b"), CompressionRequest::Later).unwrap();

        let survivors = store.crawl(true, false).unwrap();
        assert_eq!(survivors.len(), 2);
    }

    #[test]
    fn remove_deletes_the_object_directory() {
        let root = tempdir().unwrap();
        let src_dir = tempdir().unwrap();
        let store = ContentStore::open(root.path().join("store")).unwrap();
        let src = make_source(src_dir.path(), "a", b"to be removed");
        let (fp, _) = store.write(&src, CompressionRequest::Later).unwrap();

        store.remove(&fp).unwrap();
        assert_eq!(store.check(&fp, false, false).unwrap(), (false, 0, false));
    }
}
