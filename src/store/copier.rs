//! Two-sink concurrent copier: writes the flat and/or gzip-compressed representations of a
//! body simultaneously while hashing it.
//!
//! One reader (the calling thread) pulls chunks from the source, hashing as it goes, and
//! pushes a clone of each chunk onto a small ring buffer per active sink; one writer thread
//! per sink drains its ring. `parking_lot`'s `Mutex`/`Condvar` provide the not-empty/not-full
//! signalling.

use flate2::{Compression, GzBuilder};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;

const CHUNK_SIZE: usize = 64 * 1024;
const RING_CAPACITY: usize = 4;

struct Ring {
    queue: Mutex<VecDeque<Option<Arc<[u8]>>>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl Ring {
    fn new() -> Self {
        Self { queue: Mutex::new(VecDeque::new()), not_empty: Condvar::new(), not_full: Condvar::new() }
    }

    fn push(&self, item: Option<Arc<[u8]>>) {
        let mut q = self.queue.lock();
        while q.len() >= RING_CAPACITY {
            self.not_full.wait(&mut q);
        }
        q.push_back(item);
        self.not_empty.notify_one();
    }

    fn pop(&self) -> Option<Arc<[u8]>> {
        let mut q = self.queue.lock();
        while q.is_empty() {
            self.not_empty.wait(&mut q);
        }
        let item = q.pop_front().expect("queue was just checked non-empty");
        self.not_full.notify_one();
        item
    }
}

/// Stream `source` into up to two sinks at once, hashing the uncompressed bytes as they are
/// read. `data_size` must be the exact byte length `source` will yield: the gzip sink's
/// size-tagged header must precede its body, so the size has to be known upfront (the caller
/// gets it from `fs::metadata` before starting the copy).
///
/// Returns the BLAKE3 hex digest and the number of bytes actually read.
///
/// # Errors
/// Returns an error if reading the source or writing to either sink fails, or if `source`
/// yields a different number of bytes than `data_size` declared.
pub fn copy_to_sinks<R: Read>(
    mut source: R,
    data_size: u64,
    flat: Option<&mut (dyn Write + Send)>,
    gz: Option<&mut (dyn Write + Send)>,
) -> io::Result<(String, u64)> {
    let flat_ring = flat.as_ref().map(|_| Ring::new());
    let gz_ring = gz.as_ref().map(|_| Ring::new());
    let mut hasher = blake3::Hasher::new();
    let mut total = 0u64;

    std::thread::scope(|scope| -> io::Result<()> {
        let flat_handle = flat.zip(flat_ring.as_ref()).map(|(sink, ring)| {
            scope.spawn(move || -> io::Result<()> {
                loop {
                    match ring.pop() {
                        Some(chunk) => sink.write_all(&chunk)?,
                        None => return Ok(()),
                    }
                }
            })
        });

        let gz_handle = gz.zip(gz_ring.as_ref()).map(|(sink, ring)| {
            scope.spawn(move || -> io::Result<()> {
                let extra = crate::compress::build_extra_for_header(data_size);
                let mut encoder = GzBuilder::new().extra(extra).write(sink, Compression::new(5));
                loop {
                    match ring.pop() {
                        Some(chunk) => encoder.write_all(&chunk)?,
                        None => {
                            encoder.finish()?;
                            return Ok(());
                        }
                    }
                }
            })
        });

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = source.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            total += n as u64;
            let chunk: Arc<[u8]> = Arc::from(&buf[..n]);
            if let Some(ring) = &flat_ring {
                ring.push(Some(Arc::clone(&chunk)));
            }
            if let Some(ring) = &gz_ring {
                ring.push(Some(chunk));
            }
        }
        if let Some(ring) = &flat_ring {
            ring.push(None);
        }
        if let Some(ring) = &gz_ring {
            ring.push(None);
        }

        if let Some(h) = flat_handle {
            h.join().map_err(|_| io::Error::other("flat sink thread panicked"))??;
        }
        if let Some(h) = gz_handle {
            h.join().map_err(|_| io::Error::other("gzip sink thread panicked"))??;
        }
        Ok(())
    })?;

    if total != data_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("source yielded {total} bytes, expected {data_size}"),
        ));
    }
    Ok((hasher.finalize().to_hex().to_string(), total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_only_matches_direct_hash() {
        let data = b"hello world, this is the body of a file".to_vec();
        let mut flat_out = Vec::new();
        let (hash, size) =
            copy_to_sinks(&data[..], data.len() as u64, Some(&mut flat_out), None).unwrap();
        assert_eq!(flat_out, data);
        assert_eq!(size, data.len() as u64);
        assert_eq!(hash, blake3::hash(&data).to_hex().to_string());
    }

    #[test]
    fn both_sinks_receive_identical_uncompressed_content() {
        let data = b"duplicate this across two sinks".repeat(50);
        let mut flat_out = Vec::new();
        let mut gz_out = Vec::new();
        let (hash, size) = copy_to_sinks(
            &data[..],
            data.len() as u64,
            Some(&mut flat_out),
            Some(&mut gz_out),
        )
        .unwrap();
        assert_eq!(flat_out, data);
        assert_eq!(size, data.len() as u64);
        assert_eq!(hash, blake3::hash(&data).to_hex().to_string());

        let (decompressed, tagged_size) =
            crate::compress::decompress_to(&gz_out[..], Vec::new()).unwrap();
        assert_eq!(decompressed, data);
        assert_eq!(tagged_size, Some(data.len() as u64));
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let data = b"short";
        let mut flat_out = Vec::new();
        let err = copy_to_sinks(&data[..], 999, Some(&mut flat_out), None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
