//! Error types for the bookie
//!
//! Mount-time errors are returned directly to the caller. Per-entry errors
//! are delivered through the write/read completion path.

use crate::types::{EntryId, LedgerId};
use std::path::PathBuf;
use thiserror::Error;

/// Common result type for bookie operations
pub type Result<T> = std::result::Result<T, Error>;

/// Bookie protocol return codes
pub mod codes {
    pub const EOK: i32 = 0;
    pub const ENOLEDGER: i32 = 1;
    pub const ENOENTRY: i32 = 2;
    pub const EBADREQ: i32 = 100;
    pub const EIO: i32 = 101;
    pub const EUA: i32 = 102;
    pub const EFENCED: i32 = 104;
    pub const EREADONLY: i32 = 105;
}

/// Common error type for the bookie
#[derive(Debug, Error)]
pub enum Error {
    // Configuration / mount errors
    #[error("unable to resolve bookie address: {0}")]
    AddressResolution(String),

    #[error("invalid disk usage thresholds: warn={warn}, hard={hard}")]
    InvalidThresholdConfig { warn: f32, hard: f32 },

    #[error("ledger storage already initialized")]
    AlreadyInitialized,

    #[error("ledger storage is not mounted")]
    NotMounted,

    #[error("directory list is not configured: {0}")]
    NullDirectoryList(&'static str),

    #[error("unable to create directory {path:?}: {reason}")]
    DirectoryCreation { path: PathBuf, reason: String },

    #[error("directory {path:?} contains data from an older layout: {reason}")]
    LegacyLayout { path: PathBuf, reason: String },

    #[error("directory {0:?} is in use by another bookie")]
    DirectoryLocked(PathBuf),

    #[error("configuration error: {0}")]
    Configuration(String),

    // Per-entry errors
    #[error("malformed entry: {0}")]
    MalformedEntry(String),

    #[error("master key mismatch for ledger {0}")]
    BadMasterKey(LedgerId),

    #[error("ledger {0} is fenced")]
    LedgerFenced(LedgerId),

    #[error("entry {ledger_id}:{entry_id} already exists")]
    DuplicateEntry {
        ledger_id: LedgerId,
        entry_id: EntryId,
    },

    #[error("no such ledger: {0}")]
    NoSuchLedger(LedgerId),

    #[error("no such entry: {ledger_id}:{entry_id}")]
    NoSuchEntry {
        ledger_id: LedgerId,
        entry_id: EntryId,
    },

    #[error("disk usage above threshold, bookie is read-only")]
    DiskThresholdExceeded,

    // Storage errors
    #[error("journal error: {0}")]
    Journal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a journal error
    pub fn journal(msg: impl Into<String>) -> Self {
        Self::Journal(msg.into())
    }

    /// Create a malformed entry error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedEntry(msg.into())
    }

    /// Get the bookie protocol return code for this error
    #[must_use]
    pub const fn result_code(&self) -> i32 {
        match self {
            Self::NoSuchLedger(_) => codes::ENOLEDGER,
            Self::NoSuchEntry { .. } => codes::ENOENTRY,
            Self::BadMasterKey(_) => codes::EUA,
            Self::LedgerFenced(_) => codes::EFENCED,
            Self::DiskThresholdExceeded => codes::EREADONLY,
            Self::MalformedEntry(_) | Self::DuplicateEntry { .. } => codes::EBADREQ,
            _ => codes::EIO,
        }
    }
}
