//! Gzip framing with the custom `SZ` extra field.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::GzBuilder;
use std::io::{self, Read, Write};

const SUBFIELD_ID: [u8; 2] = *b"SZ";
const SUBFIELD_LEN: u16 = 8;

/// Build the raw `FEXTRA` payload carrying `data_size`, for callers that build their own
/// [`GzBuilder`] (the streaming two-sink copier).
#[must_use]
pub fn build_extra_for_header(data_size: u64) -> Vec<u8> {
    build_extra(data_size)
}

fn build_extra(data_size: u64) -> Vec<u8> {
    let mut extra = Vec::with_capacity(12);
    extra.extend_from_slice(&SUBFIELD_ID);
    extra.extend_from_slice(&SUBFIELD_LEN.to_le_bytes());
    extra.extend_from_slice(&data_size.to_le_bytes());
    extra
}

/// Parse the `SZ` subfield out of a gzip `FEXTRA` block, if present. Readers tolerate its
/// absence.
#[must_use]
pub fn parse_data_size_extra(extra: &[u8]) -> Option<u64> {
    let mut pos = 0usize;
    while pos + 4 <= extra.len() {
        let si = &extra[pos..pos + 2];
        let len = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
        let start = pos + 4;
        let end = start.checked_add(len)?;
        if end > extra.len() {
            return None;
        }
        if si == SUBFIELD_ID && len == usize::from(SUBFIELD_LEN) {
            let bytes: [u8; 8] = extra[start..end].try_into().ok()?;
            return Some(u64::from_le_bytes(bytes));
        }
        pos = end;
    }
    None
}

/// Compress `data_size` bytes read from `source` into gzip bytes written to `sink`, tagging the
/// header with the uncompressed size via the custom extra field.
///
/// # Errors
/// Returns an error if reading or writing fails.
pub fn compress_to<R: Read, W: Write>(mut source: R, sink: W, data_size: u64) -> io::Result<W> {
    let extra = build_extra(data_size);
    let builder = GzBuilder::new().extra(extra);
    let mut encoder = builder.write(sink, Compression::new(5));
    io::copy(&mut source, &mut encoder)?;
    encoder.finish()
}

/// Decompress a gzip stream, returning the uncompressed bytes and the `data_size` recorded in
/// the header's extra field, if any.
///
/// # Errors
/// Returns an error if the gzip stream is malformed.
pub fn decompress_to<R: Read, W: Write>(source: R, mut sink: W) -> io::Result<(W, Option<u64>)> {
    let mut decoder = GzDecoder::new(source);
    // The header is parsed lazily as bytes are pulled through the decoder, so it is only
    // reliably populated once decoding has started; read the body first, then inspect it.
    io::copy(&mut decoder, &mut sink)?;
    let recorded = decoder.header().and_then(|h| parse_data_size_extra(h.extra().unwrap_or(&[])));
    Ok((sink, recorded))
}
