//! Register line grammar: encode/decode of path headers and records.
//!
//! ```text
//! Header: # version\t<N>
//! Path:   <path bytes> NUL LF
//! Record: \t<ts>\t<type>\t<size>\t<mtime>\t<uid>\t<gid>\t<mode_octal>[\t<extra>] NUL LF
//! Tombstone: \t<ts>\t- NUL LF
//! Footer: # end NUL LF
//! ```
//! The legacy form terminates path/record lines with LF alone (no NUL); readers accept both,
//! writers always emit the NUL form.

use crate::errors::{RepoError, Result};
use crate::types::{Fingerprint, NodeKind, NodeMetadata};

pub const CURRENT_VERSION: u32 = 2;

/// One line out of a register/journal file, as produced by [`decode_line`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Version(u32),
    Path(String),
    Record { ts: i64, meta: NodeMetadata },
    Footer,
}

/// Strip a single trailing NUL-then-LF or bare-LF terminator, returning the payload bytes.
fn strip_terminator(raw: &[u8]) -> &[u8] {
    if let Some(stripped) = raw.strip_suffix(b"\0\n") {
        return stripped;
    }
    raw.strip_suffix(b"\n").unwrap_or(raw)
}

/// Decode one already-terminator-stripped line (see `strip_terminator`) into a [`Line`].
///
/// # Errors
/// Returns [`RepoError::CorruptRegister`] if the line does not match any grammar production.
pub fn decode_line(raw: &[u8]) -> Result<Line> {
    let payload = strip_terminator(raw);
    if payload.is_empty() {
        return Err(RepoError::CorruptRegister("empty line".into()));
    }
    if payload[0] == b'#' {
        let text = std::str::from_utf8(payload)
            .map_err(|_| RepoError::CorruptRegister("non-utf8 header line".into()))?;
        if let Some(rest) = text.strip_prefix("# version\t") {
            let n: u32 = rest
                .trim()
                .parse()
                .map_err(|_| RepoError::CorruptRegister(format!("bad version line: {text}")))?;
            return Ok(Line::Version(n));
        }
        if text.trim() == "# end" {
            return Ok(Line::Footer);
        }
        return Err(RepoError::CorruptRegister(format!("unknown header line: {text}")));
    }
    if payload[0] == b'\t' {
        return decode_record(payload).map(|(ts, meta)| Line::Record { ts, meta });
    }
    let path = std::str::from_utf8(payload)
        .map_err(|_| RepoError::CorruptRegister("non-utf8 path line".into()))?
        .to_string();
    Ok(Line::Path(path))
}

fn decode_record(payload: &[u8]) -> Result<(i64, NodeMetadata)> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| RepoError::CorruptRegister("non-utf8 record line".into()))?;
    let mut fields = text.split('\t');
    fields.next(); // leading empty field before the first tab
    let bad = || RepoError::CorruptRegister(format!("malformed record: {text}"));
    let ts: i64 = fields.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let type_tag = fields.next().ok_or_else(bad)?;
    if type_tag == "-" {
        let mut meta = NodeMetadata::tombstone();
        meta.kind = NodeKind::Tombstone;
        return Ok((ts, meta));
    }
    let tag = type_tag.chars().next().ok_or_else(bad)?;
    let size: i64 = fields.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let mtime: i64 = fields.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let uid: u32 = fields.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let gid: u32 = fields.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let mode: u32 =
        u32::from_str_radix(fields.next().ok_or_else(bad)?, 8).map_err(|_| bad())?;
    let extra = fields.next();
    let kind = match tag {
        'f' => NodeKind::File { fingerprint: extra.and_then(Fingerprint::parse) },
        'l' => NodeKind::Link { target: extra.unwrap_or_default().to_string() },
        'd' => NodeKind::Dir,
        'p' => NodeKind::Fifo,
        'b' | 'c' => {
            let (major, minor) = extra
                .and_then(|e| e.split_once(','))
                .and_then(|(a, b)| Some((a.parse().ok()?, b.parse().ok()?)))
                .unwrap_or((0, 0));
            NodeKind::Device { major, minor, block: tag == 'b' }
        }
        's' => NodeKind::Socket,
        _ => NodeKind::Unknown,
    };
    Ok((ts, NodeMetadata { kind, size, mtime, uid, gid, mode }))
}

/// Encode a path header line, NUL-terminated.
#[must_use]
pub fn encode_path(path: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(path.len() + 2);
    out.extend_from_slice(path.as_bytes());
    out.push(0);
    out.push(b'\n');
    out
}

/// Encode one record line for `(ts, meta)`, NUL-terminated.
#[must_use]
pub fn encode_record(ts: i64, meta: &NodeMetadata) -> Vec<u8> {
    if meta.is_tombstone() {
        let mut out = format!("\t{ts}\t-").into_bytes();
        out.push(0);
        out.push(b'\n');
        return out;
    }
    let extra = match &meta.kind {
        NodeKind::File { fingerprint: Some(fp) } => format!("\t{fp}"),
        NodeKind::Link { target } => format!("\t{target}"),
        NodeKind::Device { major, minor, .. } => format!("\t{major},{minor}"),
        _ => String::new(),
    };
    let mut line = format!(
        "\t{ts}\t{tag}\t{size}\t{mtime}\t{uid}\t{gid}\t{mode:o}{extra}",
        tag = meta.kind.tag(),
        size = meta.size,
        mtime = meta.mtime,
        uid = meta.uid,
        gid = meta.gid,
        mode = meta.mode,
    )
    .into_bytes();
    line.push(0);
    line.push(b'\n');
    line
}

#[must_use]
pub fn encode_version(n: u32) -> Vec<u8> {
    format!("# version\t{n}\n").into_bytes()
}

#[must_use]
pub fn encode_footer() -> Vec<u8> {
    b"# end\n".to_vec()
}
