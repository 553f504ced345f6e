//! Content hashing for fingerprints, via BLAKE3.

use std::io::{self, Read, Write};

/// Incremental hasher used while copying bytes so the fingerprint is available the moment the
/// copy finishes, without a second pass over the data.
pub struct HashingWriter<W> {
    inner: W,
    hasher: blake3::Hasher,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, hasher: blake3::Hasher::new(), written: 0 }
    }

    #[must_use]
    pub fn data_size(&self) -> u64 {
        self.written
    }

    #[must_use]
    pub fn finish_hex(&self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Hash a whole file's contents, used by `store::ops::check`'s thorough re-hash.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn hash_reader<R: Read>(mut r: R) -> io::Result<(String, u64)> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hasher.finalize().to_hex().to_string(), total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_writer_matches_direct_hash() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let mut w = HashingWriter::new(Vec::new());
        w.write_all(data).unwrap();
        let direct = blake3::hash(data).to_hex().to_string();
        assert_eq!(w.finish_hex(), direct);
        assert_eq!(w.data_size(), data.len() as u64);
    }
}
