//! Entry logs
//!
//! Each ledger directory holds one append-only entry log. Entries from all
//! ledgers are interleaved; the ledger index records where each one landed.
//! The log is rebuilt from the journal on every mount, so it is truncated
//! when opened.

use bookie_common::Result;
use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Entry log file name inside a ledger `current/` directory
pub const ENTRY_LOG_FILENAME: &str = "entries.log";

/// Where an entry's bytes live
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryLocation {
    /// Index of the entry log (one per ledger directory)
    pub log: usize,
    pub offset: u64,
    pub len: u32,
}

/// Append-only file of raw entries
pub struct EntryLog {
    dir: PathBuf,
    file: File,
    /// Next write offset; the lock serializes appends
    end: Mutex<u64>,
}

impl EntryLog {
    /// Create (or truncate) the entry log in `dir`
    pub fn create(dir: &Path) -> Result<Self> {
        let path = dir.join(ENTRY_LOG_FILENAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        debug!("Opened entry log {:?}", path);

        Ok(Self {
            dir: dir.to_path_buf(),
            file,
            end: Mutex::new(0),
        })
    }

    /// Directory this log lives in
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append `data`, returning its offset
    pub fn append(&self, data: &[u8]) -> Result<u64> {
        let mut end = self.end.lock();
        let offset = *end;
        self.file.write_all_at(data, offset)?;
        *end = offset + data.len() as u64;
        Ok(offset)
    }

    /// Read `len` bytes at `offset`
    pub fn read(&self, offset: u64, len: u32) -> Result<Bytes> {
        let mut buf = vec![0u8; len as usize];
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(Bytes::from(buf))
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Bytes written so far
    #[must_use]
    pub fn size(&self) -> u64 {
        *self.end.lock()
    }
}
