//! Register writer: appends path headers, records, and the closing footer.

use super::record::{encode_footer, encode_path, encode_record, encode_version, CURRENT_VERSION};
use crate::errors::Result;
use crate::types::NodeMetadata;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Buffered writer for a register, journal, or partial-register file.
pub struct RegisterWriter<W> {
    out: W,
    last_path: Option<String>,
    closed: bool,
}

impl RegisterWriter<BufWriter<File>> {
    /// Create (truncating) and open a register file for write, emitting the version header.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path) -> Result<Self> {
        let file = crate::fsutil::create_secure(path)?;
        Self::from_writer(BufWriter::new(file))
    }
}

impl<W: Write> RegisterWriter<W> {
    /// Wrap an already-open writer, emitting the version header immediately.
    ///
    /// # Errors
    /// Returns an error if the header cannot be written.
    pub fn from_writer(mut out: W) -> Result<Self> {
        out.write_all(&encode_version(CURRENT_VERSION))?;
        Ok(Self { out, last_path: None, closed: false })
    }

    /// Append a path header. The caller is responsible for total ordering
    /// (`register::pathcmp::compare_paths`); this only tracks it for debugging.
    ///
    /// # Errors
    /// Returns an error on I/O failure.
    pub fn put_path(&mut self, path: &str) -> Result<()> {
        self.out.write_all(&encode_path(path))?;
        self.last_path = Some(path.to_string());
        Ok(())
    }

    /// Append a record line under the most recently written path.
    ///
    /// # Errors
    /// Returns an error on I/O failure.
    pub fn put_record(&mut self, ts: i64, meta: &NodeMetadata) -> Result<()> {
        self.out.write_all(&encode_record(ts, meta))?;
        Ok(())
    }

    /// Write the footer and flush. No further writes are valid after this.
    ///
    /// # Errors
    /// Returns an error on I/O failure.
    pub fn finish(mut self) -> Result<()> {
        self.out.write_all(&encode_footer())?;
        self.out.flush()?;
        self.closed = true;
        Ok(())
    }
}
