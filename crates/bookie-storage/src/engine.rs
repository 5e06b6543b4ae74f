//! Ledger storage engine
//!
//! `LedgerStorage` owns the journals, entry logs and ledger table of a
//! mounted bookie. Writes and queued reads run on an ordered executor keyed
//! by ledger id, so all mutations of one ledger form a single total order.
//! Results of writes are delivered through a completion callback.
//!
//! Every mutation is journaled before it is applied. Mounting replays the
//! journals into fresh entry logs.

use crate::admission::{AdmissionController, DiskMonitor, DiskUsageSampler, StatvfsSampler};
use crate::dirs::{self, DirectoryLock};
use crate::entry::{Entry, HEADER_LEN, read_i64};
use crate::entry_log::{EntryLocation, EntryLog};
use crate::executor::OrderedExecutor;
use crate::journal::{Journal, JournalRecord};
use crate::ledger::{EntriesOfLedger, LedgerHandle, LedgerTable};
use crate::stats::StorageStats;
use bookie_common::error::codes;
use bookie_common::{EntryId, Error, INVALID_ID, LedgerId, Result, ServerConfig};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Completion of a write-path request
#[derive(Debug)]
pub struct WriteOutcome<C> {
    pub result: Result<()>,
    pub ledger_id: LedgerId,
    /// Entry id, or the LAC value for explicit LAC writes
    pub entry_id: EntryId,
    pub ctx: C,
}

impl<C> WriteOutcome<C> {
    /// Protocol return code of the outcome
    #[must_use]
    pub const fn result_code(&self) -> i32 {
        match &self.result {
            Ok(()) => codes::EOK,
            Err(e) => e.result_code(),
        }
    }
}

/// Completion of a queued read
#[derive(Debug)]
pub struct ReadOutcome {
    pub result: Result<Bytes>,
    pub ledger_id: LedgerId,
    pub entry_id: EntryId,
}

enum Lifecycle {
    Unmounted,
    Mounted(Arc<Mounted>),
    ShutDown,
}

/// The ledger storage engine of a bookie
pub struct LedgerStorage {
    lifecycle: Mutex<Lifecycle>,
    stats: Arc<StorageStats>,
}

impl Default for LedgerStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStorage {
    /// Create an unmounted engine
    #[must_use]
    pub fn new() -> Self {
        Self {
            lifecycle: Mutex::new(Lifecycle::Unmounted),
            stats: Arc::new(StorageStats::default()),
        }
    }

    /// Mount the storage described by `config`
    ///
    /// Directory structure and threshold checks run first and their errors
    /// are returned unchanged. With `existing`, that instance is mounted
    /// unless it is already mounted.
    pub fn mount(
        config: &ServerConfig,
        existing: Option<Arc<Self>>,
    ) -> Result<Arc<Self>> {
        Self::mount_with_sampler(config, existing, Arc::new(StatvfsSampler))
    }

    /// Mount with a custom disk usage sampler
    pub fn mount_with_sampler(
        config: &ServerConfig,
        existing: Option<Arc<Self>>,
        sampler: Arc<dyn DiskUsageSampler>,
    ) -> Result<Arc<Self>> {
        let layout = DirectoryLayout::check(config)?;
        crate::admission::validate_thresholds(
            config.disk_usage_warn_threshold,
            config.disk_usage_threshold,
        )?;

        let storage = existing.unwrap_or_else(|| Arc::new(Self::new()));
        {
            let mut lifecycle = storage.lifecycle.lock();
            if matches!(*lifecycle, Lifecycle::Mounted(_)) {
                return Err(Error::AlreadyInitialized);
            }
            let mounted = Mounted::open(config, &layout, sampler, Arc::clone(&storage.stats))?;
            *lifecycle = Lifecycle::Mounted(Arc::new(mounted));
        }

        info!(
            "Mounted ledger storage: {} journal dirs, {} ledger dirs",
            layout.journal.len(),
            layout.ledger.len()
        );
        Ok(storage)
    }

    fn mounted(&self) -> Result<Arc<Mounted>> {
        match &*self.lifecycle.lock() {
            Lifecycle::Mounted(mounted) => Ok(Arc::clone(mounted)),
            Lifecycle::Unmounted | Lifecycle::ShutDown => Err(Error::NotMounted),
        }
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Mounted(_))
    }

    #[must_use]
    pub const fn stats(&self) -> &Arc<StorageStats> {
        &self.stats
    }

    /// Admission controller of the mounted storage
    pub fn admission(&self) -> Result<Arc<AdmissionController>> {
        Ok(Arc::clone(&self.mounted()?.admission))
    }

    /// Write an entry
    ///
    /// `callback` runs exactly once. With `ack_before_sync` it runs as soon as
    /// the entry is stored, otherwise after the journal is synced.
    pub fn add_entry<C, F>(
        &self,
        data: Bytes,
        ack_before_sync: bool,
        callback: F,
        ctx: C,
        master_key: &[u8],
    ) where
        C: Send + 'static,
        F: FnOnce(WriteOutcome<C>) + Send + 'static,
    {
        self.submit_write(data, WriteKind::Add { ack_before_sync }, callback, ctx, master_key);
    }

    /// Write an entry on behalf of ledger recovery
    ///
    /// Skips the fence check, may replace an existing entry, and fences the
    /// ledger against ordinary writers.
    pub fn recovery_add_entry<C, F>(&self, data: Bytes, callback: F, ctx: C, master_key: &[u8])
    where
        C: Send + 'static,
        F: FnOnce(WriteOutcome<C>) + Send + 'static,
    {
        self.submit_write(data, WriteKind::Recovery, callback, ctx, master_key);
    }

    /// Build the control entry advertising `reference`'s entry id as LAC
    #[must_use]
    pub fn create_explicit_lac_entry(ledger_id: LedgerId, reference: &Entry) -> Entry {
        Entry::explicit_lac(ledger_id, reference)
    }

    /// Record an explicit LAC control entry
    ///
    /// A value below the current explicit LAC is accepted and ignored.
    pub fn set_explicit_lac<C, F>(&self, data: Bytes, callback: F, ctx: C, master_key: &[u8])
    where
        C: Send + 'static,
        F: FnOnce(WriteOutcome<C>) + Send + 'static,
    {
        self.submit_write(data, WriteKind::ExplicitLac, callback, ctx, master_key);
    }

    fn submit_write<C, F>(
        &self,
        data: Bytes,
        kind: WriteKind,
        callback: F,
        ctx: C,
        master_key: &[u8],
    ) where
        C: Send + 'static,
        F: FnOnce(WriteOutcome<C>) + Send + 'static,
    {
        let started = Instant::now();
        let (ledger_id, entry_id) = peek_ids(&data);
        let complete = move |result: Result<()>, ctx: C| {
            callback(WriteOutcome {
                result,
                ledger_id,
                entry_id,
                ctx,
            });
        };

        let mounted = match self.mounted() {
            Ok(mounted) => mounted,
            Err(e) => {
                self.stats.op(kind).record(false, 0, started.elapsed());
                complete(Err(e), ctx);
                return;
            }
        };

        let parsed = match kind {
            WriteKind::ExplicitLac => Entry::parse_explicit_lac(data),
            WriteKind::Add { .. } | WriteKind::Recovery => Entry::parse(data),
        };
        let entry = match parsed {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Rejecting {:?} write: {}", kind, e);
                self.stats.op(kind).record(false, 0, started.elapsed());
                complete(Err(e), ctx);
                return;
            }
        };

        let master_key = Bytes::copy_from_slice(master_key);
        let task_mounted = Arc::clone(&mounted);
        mounted.dispatch(ledger_id, move |accepted| {
            if accepted {
                task_mounted.run_write(entry, kind, &master_key, started, |result| {
                    complete(result, ctx);
                });
            } else {
                task_mounted
                    .stats
                    .op(kind)
                    .record(false, 0, started.elapsed());
                complete(Err(Error::NotMounted), ctx);
            }
        });
    }

    /// Most recently accepted explicit LAC entry, if any
    pub fn get_explicit_lac(&self, ledger_id: LedgerId) -> Result<Option<Entry>> {
        let mounted = self.mounted()?;
        Ok(mounted
            .ledgers
            .get(ledger_id)
            .and_then(|ledger| ledger.lock().explicit_lac().cloned()))
    }

    /// Fence a ledger, registering it if unknown
    ///
    /// Returns whether the ledger was newly fenced. The fence is durable when
    /// this returns.
    pub fn fence_ledger(&self, ledger_id: LedgerId, master_key: &[u8]) -> Result<bool> {
        self.mounted()?.fence_ledger(ledger_id, master_key)
    }

    pub fn is_fenced(&self, ledger_id: LedgerId) -> Result<bool> {
        let mounted = self.mounted()?;
        let ledger = mounted.ledger(ledger_id)?;
        let fenced = ledger.lock().is_fenced();
        Ok(fenced)
    }

    pub fn ledger_exists(&self, ledger_id: LedgerId) -> Result<bool> {
        Ok(self.mounted()?.ledgers.contains(ledger_id))
    }

    /// Read the exact bytes written for an entry
    pub fn read_entry(&self, ledger_id: LedgerId, entry_id: EntryId) -> Result<Bytes> {
        self.mounted()?.read_entry(ledger_id, entry_id)
    }

    /// Queue a read behind pending writes to the same ledger
    pub fn submit_read<F>(&self, ledger_id: LedgerId, entry_id: EntryId, callback: F)
    where
        F: FnOnce(ReadOutcome) + Send + 'static,
    {
        let complete = move |result| {
            callback(ReadOutcome {
                result,
                ledger_id,
                entry_id,
            });
        };

        let mounted = match self.mounted() {
            Ok(mounted) => mounted,
            Err(e) => return complete(Err(e)),
        };

        let task_mounted = Arc::clone(&mounted);
        mounted.dispatch(ledger_id, move |accepted| {
            if accepted {
                complete(task_mounted.read_entry(ledger_id, entry_id));
            } else {
                complete(Err(Error::NotMounted));
            }
        });
    }

    /// Explicit LAC if set, else the highest contiguous stored entry
    ///
    /// Returns `INVALID_ID` for a known ledger with neither.
    pub fn read_last_add_confirmed(&self, ledger_id: LedgerId) -> Result<EntryId> {
        let mounted = self.mounted()?;
        let ledger = mounted.ledger(ledger_id)?;
        let lac = ledger.lock().last_add_confirmed();
        Ok(lac)
    }

    /// Ascending ids of the entries stored for a ledger
    pub fn entries_of_ledger(&self, ledger_id: LedgerId) -> Result<EntriesOfLedger> {
        let mounted = self.mounted()?;
        let ledger = mounted
            .ledgers
            .get(ledger_id)
            .filter(|ledger| ledger.lock().has_entries())
            .ok_or(Error::NoSuchLedger(ledger_id))?;
        Ok(EntriesOfLedger::new(ledger))
    }

    /// Release every storage handle
    ///
    /// Queued writes finish first. Calling this more than once, or on an
    /// instance that never mounted, is harmless.
    pub fn shutdown(&self) {
        let mounted = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::ShutDown) {
                Lifecycle::Mounted(mounted) => mounted,
                previous @ (Lifecycle::Unmounted | Lifecycle::ShutDown) => {
                    *lifecycle = previous;
                    return;
                }
            }
        };
        mounted.shutdown();
        info!("Ledger storage shut down");
    }
}

impl Drop for LedgerStorage {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriteKind {
    Add { ack_before_sync: bool },
    Recovery,
    ExplicitLac,
}

impl StorageStats {
    fn op(&self, kind: WriteKind) -> &crate::stats::OpStats {
        match kind {
            WriteKind::Add { .. } => &self.add_entry,
            WriteKind::Recovery => &self.recovery_add_entry,
            WriteKind::ExplicitLac => &self.set_explicit_lac,
        }
    }
}

/// Ledger and entry ids from a header, if one is present
fn peek_ids(data: &[u8]) -> (LedgerId, EntryId) {
    if data.len() < HEADER_LEN {
        return (INVALID_ID, INVALID_ID);
    }
    (read_i64(data, 0), read_i64(data, 8))
}

/// `current/` directories of every group, checked and created
struct DirectoryLayout {
    journal: Vec<PathBuf>,
    ledger: Vec<PathBuf>,
}

impl DirectoryLayout {
    fn check(config: &ServerConfig) -> Result<Self> {
        let journal = dirs::current_directories(config.journal_dirs.as_deref())?;
        let ledger = dirs::current_directories(config.ledger_dirs.as_deref())?;
        let index = dirs::current_directories(config.index_dirs())?;

        for dir in journal.iter().chain(&ledger).chain(&index) {
            dirs::check_structure(dir)?;
        }

        if let Some(gc_path) = config
            .gc_entry_log_metadata_cache_path
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
        {
            std::fs::create_dir_all(gc_path).map_err(|e| Error::DirectoryCreation {
                path: gc_path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        if journal.is_empty() || ledger.is_empty() {
            return Err(Error::Configuration(
                "at least one journal and one ledger directory are required".to_string(),
            ));
        }

        Ok(Self { journal, ledger })
    }
}

/// Resources of a mounted storage
struct Mounted {
    ledgers: LedgerTable,
    journals: Vec<Journal>,
    entry_logs: Vec<EntryLog>,
    admission: Arc<AdmissionController>,
    monitor: Mutex<Option<DiskMonitor>>,
    executor: OrderedExecutor,
    locks: Mutex<Vec<DirectoryLock>>,
    closed: AtomicBool,
    stats: Arc<StorageStats>,
}

impl Mounted {
    fn open(
        config: &ServerConfig,
        layout: &DirectoryLayout,
        sampler: Arc<dyn DiskUsageSampler>,
        stats: Arc<StorageStats>,
    ) -> Result<Self> {
        let lock_dirs: BTreeSet<&PathBuf> = layout.journal.iter().chain(&layout.ledger).collect();
        let locks = lock_dirs
            .into_iter()
            .map(|dir| DirectoryLock::acquire(dir))
            .collect::<Result<Vec<_>>>()?;

        let mut journals = Vec::with_capacity(layout.journal.len());
        let mut replay = Vec::new();
        for dir in &layout.journal {
            let (journal, records) = Journal::open(dir)?;
            journals.push(journal);
            replay.push(records);
        }

        let entry_logs = layout
            .ledger
            .iter()
            .map(|dir| EntryLog::create(dir))
            .collect::<Result<Vec<_>>>()?;

        let admission = Arc::new(AdmissionController::new(
            config.disk_usage_warn_threshold,
            config.disk_usage_threshold,
        )?);

        let mut mounted = Self {
            ledgers: LedgerTable::new(),
            journals,
            entry_logs,
            admission: Arc::clone(&admission),
            monitor: Mutex::new(None),
            executor: OrderedExecutor::new("bookie-ledger", config.num_workers)?,
            locks: Mutex::new(locks),
            closed: AtomicBool::new(false),
            stats,
        };

        for records in replay {
            mounted.replay(records)?;
        }

        let monitor = DiskMonitor::start(
            admission,
            sampler,
            layout.ledger.clone(),
            config.disk_check_interval(),
        )?;
        *mounted.monitor.get_mut() = Some(monitor);

        Ok(mounted)
    }

    /// Rebuild ledger state and entry logs from journal records
    fn replay(&self, records: Vec<JournalRecord>) -> Result<()> {
        let (mut entries, mut skipped) = (0usize, 0usize);

        for record in records {
            match record {
                JournalRecord::MasterKey {
                    ledger_id,
                    master_key,
                } => {
                    self.ledgers.get_or_register(ledger_id, &master_key, || Ok(()))?;
                }
                JournalRecord::AddEntry(raw) | JournalRecord::RecoveryAdd(raw) => {
                    let entry = Entry::parse(raw)?;
                    let Some(ledger) = self.ledgers.get(entry.ledger_id()) else {
                        skipped += 1;
                        continue;
                    };
                    let location = self.append_to_log(&entry)?;
                    ledger.lock().insert(entry.entry_id(), location);
                    entries += 1;
                }
                JournalRecord::Fence(ledger_id) => match self.ledgers.get(ledger_id) {
                    Some(ledger) => {
                        ledger.lock().fence();
                    }
                    None => skipped += 1,
                },
                JournalRecord::ExplicitLac(raw) => {
                    let entry = Entry::parse_explicit_lac(raw)?;
                    match self.ledgers.get(entry.ledger_id()) {
                        Some(ledger) => {
                            ledger.lock().set_explicit_lac(entry);
                        }
                        None => skipped += 1,
                    }
                }
            }
        }

        if skipped > 0 {
            warn!("Skipped {} journal records for unregistered ledgers", skipped);
        }
        debug!("Replayed {} entries from journal", entries);
        Ok(())
    }

    /// Queue `task` on the ledger's worker
    ///
    /// Once the executor has stopped, `task` runs inline on the caller with
    /// `false` instead.
    fn dispatch(&self, ledger_id: LedgerId, task: impl FnOnce(bool) + Send + 'static) {
        let refused = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&refused);
        let queued = Box::new(move || task(!flag.load(Ordering::Acquire)));
        if let Err(queued) = self.executor.submit(ledger_id, queued) {
            refused.store(true, Ordering::Release);
            queued();
        }
    }

    fn journal_for(&self, ledger_id: LedgerId) -> &Journal {
        let idx = (ledger_id.unsigned_abs() % self.journals.len() as u64) as usize;
        &self.journals[idx]
    }

    /// Pick an entry log, preferring the ledger's own directory
    fn log_for(&self, ledger_id: LedgerId) -> usize {
        let preferred = (ledger_id.unsigned_abs() % self.entry_logs.len() as u64) as usize;
        if self.admission.is_dir_writable(self.entry_logs[preferred].dir()) {
            return preferred;
        }
        self.entry_logs
            .iter()
            .position(|log| self.admission.is_dir_writable(log.dir()))
            .unwrap_or(preferred)
    }

    fn append_to_log(&self, entry: &Entry) -> Result<EntryLocation> {
        let log = self.log_for(entry.ledger_id());
        let len = u32::try_from(entry.len())
            .map_err(|_| Error::malformed(format!("entry of {} bytes is too large", entry.len())))?;
        let offset = self.entry_logs[log].append(entry.as_bytes())?;
        Ok(EntryLocation { log, offset, len })
    }

    fn ledger(&self, ledger_id: LedgerId) -> Result<LedgerHandle> {
        self.ledgers
            .get(ledger_id)
            .ok_or(Error::NoSuchLedger(ledger_id))
    }

    /// Look up a ledger, journaling its master key if it is new
    fn register(&self, ledger_id: LedgerId, master_key: &Bytes) -> Result<(LedgerHandle, bool)> {
        self.ledgers.get_or_register(ledger_id, master_key, || {
            self.journal_for(ledger_id).append(&JournalRecord::MasterKey {
                ledger_id,
                master_key: master_key.clone(),
            })
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::NotMounted)
        } else {
            Ok(())
        }
    }

    fn run_write(
        &self,
        entry: Entry,
        kind: WriteKind,
        master_key: &Bytes,
        started: Instant,
        complete: impl FnOnce(Result<()>),
    ) {
        let ledger_id = entry.ledger_id();
        let len = entry.len() as u64;

        let result = match kind {
            WriteKind::ExplicitLac => self.store_explicit_lac(entry, master_key),
            WriteKind::Add { .. } => self.store_entry(entry, false, master_key),
            WriteKind::Recovery => self.store_entry(entry, true, master_key),
        };

        let result = match (result, kind) {
            (Ok(()), WriteKind::Add { ack_before_sync: true }) => {
                self.stats.op(kind).record(true, len, started.elapsed());
                complete(Ok(()));
                // Still flush, but nobody waits for it
                if let Err(e) = self.sync_journal(ledger_id) {
                    error!("Journal sync after early ack failed for ledger {}: {}", ledger_id, e);
                }
                return;
            }
            (Ok(()), _) => self.sync_journal(ledger_id),
            (Err(e), _) => Err(e),
        };

        if let Err(e) = &result {
            debug!("{:?} write to ledger {} failed: {}", kind, ledger_id, e);
        }
        self.stats
            .op(kind)
            .record(result.is_ok(), len, started.elapsed());
        complete(result);
    }

    fn sync_journal(&self, ledger_id: LedgerId) -> Result<()> {
        let started = Instant::now();
        let result = self.journal_for(ledger_id).sync();
        self.stats
            .journal_sync
            .record(result.is_ok(), 0, started.elapsed());
        result
    }

    fn store_entry(&self, entry: Entry, recovery: bool, master_key: &Bytes) -> Result<()> {
        self.ensure_open()?;
        let ledger_id = entry.ledger_id();
        let entry_id = entry.entry_id();

        // Unknown ledgers are only created while the bookie is writable
        if !self.ledgers.contains(ledger_id) {
            self.admission.check_admission()?;
        }
        let (ledger, _) = self.register(ledger_id, master_key)?;
        let mut state = ledger.lock();

        state.check_master_key(ledger_id, master_key)?;
        if !recovery && state.is_fenced() {
            return Err(Error::LedgerFenced(ledger_id));
        }
        self.admission.check_admission()?;
        if !recovery && state.contains(entry_id) {
            return Err(Error::DuplicateEntry {
                ledger_id,
                entry_id,
            });
        }

        let journal = self.journal_for(ledger_id);
        let record = if recovery {
            JournalRecord::RecoveryAdd(entry.as_bytes().clone())
        } else {
            JournalRecord::AddEntry(entry.as_bytes().clone())
        };
        journal.append(&record)?;

        let location = self.append_to_log(&entry)?;
        state.insert(entry_id, location);

        if recovery && !state.is_fenced() {
            journal.append(&JournalRecord::Fence(ledger_id))?;
            state.fence();
            info!("Ledger {} fenced by recovery write", ledger_id);
        }
        Ok(())
    }

    fn store_explicit_lac(&self, entry: Entry, master_key: &Bytes) -> Result<()> {
        self.ensure_open()?;
        let ledger_id = entry.ledger_id();
        let (ledger, _) = self.register(ledger_id, master_key)?;
        let mut state = ledger.lock();
        state.check_master_key(ledger_id, master_key)?;

        if !state.accepts_explicit_lac(entry.entry_id()) {
            debug!(
                "Ignoring explicit LAC {} for ledger {} below current value",
                entry.entry_id(),
                ledger_id
            );
            return Ok(());
        }

        self.journal_for(ledger_id)
            .append(&JournalRecord::ExplicitLac(entry.as_bytes().clone()))?;
        state.set_explicit_lac(entry);
        Ok(())
    }

    fn fence_ledger(&self, ledger_id: LedgerId, master_key: &[u8]) -> Result<bool> {
        self.ensure_open()?;
        let master_key = Bytes::copy_from_slice(master_key);
        let (ledger, _) = self.register(ledger_id, &master_key)?;
        let newly_fenced = {
            let mut state = ledger.lock();
            state.check_master_key(ledger_id, &master_key)?;
            if state.is_fenced() {
                false
            } else {
                self.journal_for(ledger_id)
                    .append(&JournalRecord::Fence(ledger_id))?;
                state.fence()
            }
        };
        self.sync_journal(ledger_id)?;
        if newly_fenced {
            info!("Ledger {} fenced", ledger_id);
        }
        Ok(newly_fenced)
    }

    fn read_entry(&self, ledger_id: LedgerId, entry_id: EntryId) -> Result<Bytes> {
        let started = Instant::now();
        let result = self.ensure_open().and_then(|()| {
            let ledger = self.ledger(ledger_id)?;
            let location = {
                let state = ledger.lock();
                // Fencing or an explicit LAC alone does not make a ledger written
                if !state.has_entries() {
                    return Err(Error::NoSuchLedger(ledger_id));
                }
                state.location(entry_id).ok_or(Error::NoSuchEntry {
                    ledger_id,
                    entry_id,
                })?
            };
            self.entry_logs[location.log].read(location.offset, location.len)
        });

        let bytes = result.as_ref().map_or(0, |data| data.len() as u64);
        self.stats
            .read_entry
            .record(result.is_ok(), bytes, started.elapsed());
        result
    }

    fn shutdown(&self) {
        // Queued work drains before anything is closed
        self.executor.shutdown();
        self.closed.store(true, Ordering::Release);

        if let Some(mut monitor) = self.monitor.lock().take() {
            monitor.shutdown();
        }
        for journal in &self.journals {
            if let Err(e) = journal.close() {
                error!("Failed to close journal {:?}: {}", journal.path(), e);
            }
        }
        for log in &self.entry_logs {
            if let Err(e) = log.sync() {
                error!("Failed to sync entry log in {:?}: {}", log.dir(), e);
            }
        }
        self.locks.lock().clear();
    }
}
