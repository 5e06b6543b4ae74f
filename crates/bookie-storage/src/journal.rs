//! Write-ahead journal
//!
//! Every mutation of a ledger (entry, master key, fence, explicit LAC) is
//! appended here before it is acknowledged. On mount the journal is replayed
//! to rebuild the ledger table and entry logs.
//!
//! File layout (little-endian):
//! ```text
//! header:  magic u64 | version u32
//! record:  magic u32 | type u8 | len u32 | body (len bytes) | crc32c u32
//! ```
//! The checksum covers type, len and body. A torn or corrupt tail is
//! truncated when the journal is opened.

use bookie_common::{Error, LedgerId, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Journal file name inside a journal `current/` directory
pub const JOURNAL_FILENAME: &str = "journal.txn";

const JOURNAL_MAGIC: u64 = 0x424B_4A52_4E4C_0001; // "BKJRNL"
const JOURNAL_VERSION: u32 = 1;
const HEADER_LEN: u64 = 12;

const RECORD_MAGIC: u32 = 0x4A52_4543; // "JREC"
const RECORD_OVERHEAD: usize = 4 + 1 + 4 + 4;

/// Journal record type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Ordinary entry write
    AddEntry = 1,
    /// Entry written by ledger recovery
    RecoveryAdd = 2,
    /// First sighting of a ledger's master key
    MasterKey = 3,
    /// Ledger fenced
    Fence = 4,
    /// Explicit last-add-confirmed update
    ExplicitLac = 5,
}

impl TryFrom<u8> for RecordType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::AddEntry),
            2 => Ok(Self::RecoveryAdd),
            3 => Ok(Self::MasterKey),
            4 => Ok(Self::Fence),
            5 => Ok(Self::ExplicitLac),
            _ => Err(Error::journal(format!("invalid record type: {value}"))),
        }
    }
}

/// A single journal record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    AddEntry(Bytes),
    RecoveryAdd(Bytes),
    MasterKey { ledger_id: LedgerId, master_key: Bytes },
    Fence(LedgerId),
    ExplicitLac(Bytes),
}

impl JournalRecord {
    #[must_use]
    pub const fn record_type(&self) -> RecordType {
        match self {
            Self::AddEntry(_) => RecordType::AddEntry,
            Self::RecoveryAdd(_) => RecordType::RecoveryAdd,
            Self::MasterKey { .. } => RecordType::MasterKey,
            Self::Fence(_) => RecordType::Fence,
            Self::ExplicitLac(_) => RecordType::ExplicitLac,
        }
    }

    fn body(&self) -> Bytes {
        match self {
            Self::AddEntry(raw) | Self::RecoveryAdd(raw) | Self::ExplicitLac(raw) => raw.clone(),
            Self::MasterKey {
                ledger_id,
                master_key,
            } => {
                let mut buf = BytesMut::with_capacity(8 + master_key.len());
                buf.put_i64_le(*ledger_id);
                buf.put_slice(master_key);
                buf.freeze()
            }
            Self::Fence(ledger_id) => Bytes::copy_from_slice(&ledger_id.to_le_bytes()),
        }
    }

    fn from_parts(record_type: RecordType, mut body: Bytes) -> Result<Self> {
        Ok(match record_type {
            RecordType::AddEntry => Self::AddEntry(body),
            RecordType::RecoveryAdd => Self::RecoveryAdd(body),
            RecordType::ExplicitLac => Self::ExplicitLac(body),
            RecordType::MasterKey => {
                if body.len() < 8 {
                    return Err(Error::journal("master key record too short"));
                }
                let ledger_id = body.get_i64_le();
                Self::MasterKey {
                    ledger_id,
                    master_key: body,
                }
            }
            RecordType::Fence => {
                if body.len() != 8 {
                    return Err(Error::journal("fence record has wrong length"));
                }
                Self::Fence(body.get_i64_le())
            }
        })
    }

    /// Serialize to the on-disk framing
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let body = self.body();
        let mut buf = Vec::with_capacity(RECORD_OVERHEAD + body.len());
        buf.extend_from_slice(&RECORD_MAGIC.to_le_bytes());
        buf.push(self.record_type() as u8);
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);
        let checksum = crc32c::crc32c(&buf[4..]);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Decode one record from the front of `buf`
    ///
    /// Returns the record and its framed length, or `None` when the bytes do
    /// not hold a complete valid record.
    fn decode(buf: &[u8]) -> Option<(Self, usize)> {
        if buf.len() < RECORD_OVERHEAD {
            return None;
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().ok()?);
        if magic != RECORD_MAGIC {
            return None;
        }
        let record_type = RecordType::try_from(buf[4]).ok()?;
        let len = u32::from_le_bytes(buf[5..9].try_into().ok()?) as usize;
        let total = RECORD_OVERHEAD.checked_add(len)?;
        if buf.len() < total {
            return None;
        }
        let body_end = 9 + len;
        let expected = u32::from_le_bytes(buf[body_end..body_end + 4].try_into().ok()?);
        if crc32c::crc32c(&buf[4..body_end]) != expected {
            return None;
        }
        let body = Bytes::copy_from_slice(&buf[9..body_end]);
        let record = Self::from_parts(record_type, body).ok()?;
        Some((record, total))
    }
}

/// Append-only journal file
pub struct Journal {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
    records_written: AtomicU64,
    size: AtomicU64,
}

impl Journal {
    /// Open or create the journal in `dir`, returning the records it holds
    pub fn open(dir: &Path) -> Result<(Self, Vec<JournalRecord>)> {
        let path = dir.join(JOURNAL_FILENAME);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::journal(format!("failed to open journal {path:?}: {e}")))?;

        let file_len = file
            .metadata()
            .map_err(|e| Error::journal(format!("failed to stat journal: {e}")))?
            .len();

        let (records, valid_len) = if file_len < HEADER_LEN {
            if file_len > 0 {
                warn!(
                    "Journal {:?} holds a torn {} byte header, starting it over",
                    path, file_len
                );
                file.set_len(0)
                    .map_err(|e| Error::journal(format!("failed to truncate journal: {e}")))?;
            }
            write_header(&mut file)?;
            (Vec::new(), HEADER_LEN)
        } else {
            let mut contents = Vec::with_capacity(file_len as usize);
            file.read_to_end(&mut contents)
                .map_err(|e| Error::journal(format!("failed to read journal: {e}")))?;
            scan(&contents)?
        };

        if valid_len < file_len {
            warn!(
                "Truncating journal {:?} from {} to {} bytes after torn record",
                path, file_len, valid_len
            );
            file.set_len(valid_len)
                .map_err(|e| Error::journal(format!("failed to truncate journal: {e}")))?;
            file.sync_all()?;
        }

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| Error::journal(format!("failed to reopen journal: {e}")))?;

        info!(
            "Opened journal at {:?}: {} records, {} bytes",
            path,
            records.len(),
            valid_len
        );

        Ok((
            Self {
                path,
                writer: Mutex::new(Some(BufWriter::new(file))),
                records_written: AtomicU64::new(0),
                size: AtomicU64::new(valid_len),
            },
            records,
        ))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record, handing it to the OS but not syncing it
    pub fn append(&self, record: &JournalRecord) -> Result<()> {
        let data = record.serialize();

        let mut guard = self.writer.lock();
        let writer = guard
            .as_mut()
            .ok_or_else(|| Error::journal("journal closed"))?;
        writer
            .write_all(&data)
            .map_err(|e| Error::journal(format!("write failed: {e}")))?;
        writer
            .flush()
            .map_err(|e| Error::journal(format!("flush failed: {e}")))?;

        self.size.fetch_add(data.len() as u64, Ordering::Relaxed);
        self.records_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Force appended records to stable storage
    pub fn sync(&self) -> Result<()> {
        let mut guard = self.writer.lock();
        if let Some(writer) = guard.as_mut() {
            writer
                .flush()
                .map_err(|e| Error::journal(format!("flush failed: {e}")))?;
            writer
                .get_ref()
                .sync_data()
                .map_err(|e| Error::journal(format!("sync failed: {e}")))?;
        }
        Ok(())
    }

    /// Sync and close; later appends fail
    pub fn close(&self) -> Result<()> {
        self.sync()?;
        if self.writer.lock().take().is_some() {
            debug!("Closed journal {:?}", self.path);
        }
        Ok(())
    }

    /// Records appended since open
    #[must_use]
    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    /// Current file size in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }
}

fn write_header(file: &mut File) -> Result<()> {
    let mut header = Vec::with_capacity(HEADER_LEN as usize);
    header.extend_from_slice(&JOURNAL_MAGIC.to_le_bytes());
    header.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
    file.write_all(&header)
        .map_err(|e| Error::journal(format!("failed to write header: {e}")))?;
    file.sync_all()
        .map_err(|e| Error::journal(format!("failed to sync header: {e}")))?;
    Ok(())
}

/// Validate the header and collect records up to the first invalid one
fn scan(contents: &[u8]) -> Result<(Vec<JournalRecord>, u64)> {
    if contents.len() < HEADER_LEN as usize {
        return Err(Error::journal("journal shorter than its header"));
    }
    let magic = u64::from_le_bytes(
        contents[0..8]
            .try_into()
            .map_err(|_| Error::journal("unreadable journal magic"))?,
    );
    if magic != JOURNAL_MAGIC {
        return Err(Error::journal("invalid journal magic"));
    }
    let version = u32::from_le_bytes(
        contents[8..12]
            .try_into()
            .map_err(|_| Error::journal("unreadable journal version"))?,
    );
    if version != JOURNAL_VERSION {
        return Err(Error::journal(format!(
            "unsupported journal version: {version}"
        )));
    }

    let mut records = Vec::new();
    let mut pos = HEADER_LEN as usize;
    while let Some((record, len)) = JournalRecord::decode(&contents[pos..]) {
        records.push(record);
        pos += len;
    }
    Ok((records, pos as u64))
}
