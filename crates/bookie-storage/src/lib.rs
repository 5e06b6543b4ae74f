//! Bookie Storage - ledger storage engine
//!
//! This crate provides:
//! - Entry framing and auth codes
//! - Directory layout checks and formatting
//! - Disk usage admission control
//! - Write-ahead journal and entry logs
//! - The ledger storage engine with ordered per-ledger execution

pub mod admission;
pub mod dirs;
pub mod engine;
pub mod entry;
pub mod entry_log;
pub mod executor;
pub mod journal;
pub mod ledger;
pub mod stats;

pub use admission::{AdmissionController, DiskMonitor, DiskUsageSampler, StatvfsSampler, validate_thresholds};
pub use dirs::{ConfirmationSource, LineConfirmation, check_structure, current_directories, format};
pub use engine::{LedgerStorage, ReadOutcome, WriteOutcome};
pub use entry::Entry;
pub use ledger::EntriesOfLedger;
pub use stats::StorageStats;
