//! Per-ledger state and the ledger table

use crate::entry::Entry;
use crate::entry_log::EntryLocation;
use bookie_common::{EntryId, Error, INVALID_ID, LedgerId, Result};
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// In-memory state of one ledger
#[derive(Debug)]
pub struct LedgerState {
    master_key: Bytes,
    fenced: bool,
    entries: BTreeMap<EntryId, EntryLocation>,
    /// End of the contiguous run starting at the lowest stored entry
    last_contiguous: Option<EntryId>,
    explicit_lac: Option<Entry>,
}

impl LedgerState {
    fn new(master_key: Bytes) -> Self {
        Self {
            master_key,
            fenced: false,
            entries: BTreeMap::new(),
            last_contiguous: None,
            explicit_lac: None,
        }
    }

    /// Fail with `BadMasterKey` unless `key` matches the registered key
    pub fn check_master_key(&self, ledger_id: LedgerId, key: &[u8]) -> Result<()> {
        if self.master_key.as_ref() == key {
            Ok(())
        } else {
            Err(Error::BadMasterKey(ledger_id))
        }
    }

    #[must_use]
    pub const fn is_fenced(&self) -> bool {
        self.fenced
    }

    /// Fence the ledger, returning whether it was newly fenced
    pub fn fence(&mut self) -> bool {
        !std::mem::replace(&mut self.fenced, true)
    }

    #[must_use]
    pub fn contains(&self, entry_id: EntryId) -> bool {
        self.entries.contains_key(&entry_id)
    }

    #[must_use]
    pub fn location(&self, entry_id: EntryId) -> Option<EntryLocation> {
        self.entries.get(&entry_id).copied()
    }

    #[must_use]
    pub fn has_entries(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Record where an entry is stored, returning the previous location
    pub fn insert(&mut self, entry_id: EntryId, location: EntryLocation) -> Option<EntryLocation> {
        let below_run = self
            .entries
            .first_key_value()
            .is_some_and(|(&first, _)| entry_id < first);
        let previous = self.entries.insert(entry_id, location);
        if below_run {
            self.last_contiguous = None;
        }
        self.advance_frontier();
        previous
    }

    fn advance_frontier(&mut self) {
        let Some((&first, _)) = self.entries.first_key_value() else {
            return;
        };
        let mut last = self.last_contiguous.unwrap_or(first);
        while let Some(next) = last.checked_add(1) {
            if !self.entries.contains_key(&next) {
                break;
            }
            last = next;
        }
        self.last_contiguous = Some(last);
    }

    /// Highest entry of the contiguous run, if any entry is stored
    #[must_use]
    pub const fn last_contiguous(&self) -> Option<EntryId> {
        self.last_contiguous
    }

    #[must_use]
    pub const fn explicit_lac(&self) -> Option<&Entry> {
        self.explicit_lac.as_ref()
    }

    /// Whether `lac` would not move the explicit LAC backwards
    #[must_use]
    pub fn accepts_explicit_lac(&self, lac: EntryId) -> bool {
        self.explicit_lac
            .as_ref()
            .is_none_or(|current| lac >= current.entry_id())
    }

    /// Store an explicit LAC entry unless it would move the LAC backwards
    pub fn set_explicit_lac(&mut self, entry: Entry) -> bool {
        let advances = self.accepts_explicit_lac(entry.entry_id());
        if advances {
            self.explicit_lac = Some(entry);
        }
        advances
    }

    /// Explicit LAC if set, else the contiguous frontier, else `INVALID_ID`
    #[must_use]
    pub fn last_add_confirmed(&self) -> EntryId {
        self.explicit_lac
            .as_ref()
            .map(Entry::entry_id)
            .or(self.last_contiguous)
            .unwrap_or(INVALID_ID)
    }

    /// First stored entry id at or after `from`
    fn next_entry_from(&self, from: EntryId) -> Option<EntryId> {
        self.entries.range(from..).next().map(|(&id, _)| id)
    }
}

pub type LedgerHandle = Arc<Mutex<LedgerState>>;

/// All ledgers known to this bookie
#[derive(Default)]
pub struct LedgerTable {
    ledgers: DashMap<LedgerId, LedgerHandle>,
}

impl LedgerTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, ledger_id: LedgerId) -> Option<LedgerHandle> {
        self.ledgers.get(&ledger_id).map(|r| Arc::clone(r.value()))
    }

    /// Look up a ledger, registering it with `master_key` if unknown
    ///
    /// `on_register` runs before a new ledger becomes visible; if it fails the
    /// ledger is not registered. The flag is true when this call created it.
    pub fn get_or_register(
        &self,
        ledger_id: LedgerId,
        master_key: &[u8],
        on_register: impl FnOnce() -> Result<()>,
    ) -> Result<(LedgerHandle, bool)> {
        match self.ledgers.entry(ledger_id) {
            MapEntry::Occupied(occupied) => Ok((Arc::clone(occupied.get()), false)),
            MapEntry::Vacant(vacant) => {
                on_register()?;
                let state = Arc::new(Mutex::new(LedgerState::new(Bytes::copy_from_slice(
                    master_key,
                ))));
                vacant.insert(Arc::clone(&state));
                Ok((state, true))
            }
        }
    }

    #[must_use]
    pub fn contains(&self, ledger_id: LedgerId) -> bool {
        self.ledgers.contains_key(&ledger_id)
    }
}

/// Ascending ids of the entries stored for one ledger
///
/// Each step looks up the next stored id after the previous one, so entries
/// added while iterating may show up. `rewind` restarts from the beginning.
#[derive(Clone)]
pub struct EntriesOfLedger {
    ledger: LedgerHandle,
    next_from: Option<EntryId>,
}

impl EntriesOfLedger {
    pub(crate) const fn new(ledger: LedgerHandle) -> Self {
        Self {
            ledger,
            next_from: Some(0),
        }
    }

    /// Restart from the lowest entry id
    pub fn rewind(&mut self) {
        self.next_from = Some(0);
    }
}

impl Iterator for EntriesOfLedger {
    type Item = EntryId;

    fn next(&mut self) -> Option<EntryId> {
        let from = self.next_from?;
        let id = self.ledger.lock().next_entry_from(from);
        self.next_from = id.and_then(|id| id.checked_add(1));
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(table: &LedgerTable, ledger_id: LedgerId, key: &[u8]) -> (LedgerHandle, bool) {
        table.get_or_register(ledger_id, key, || Ok(())).unwrap()
    }

    fn loc(offset: u64) -> EntryLocation {
        EntryLocation {
            log: 0,
            offset,
            len: 1,
        }
    }

    #[test]
    fn test_contiguous_frontier() {
        let table = LedgerTable::new();
        let (ledger, created) = register(&table, 1, b"key");
        assert!(created);
        let mut state = ledger.lock();
        assert_eq!(state.last_add_confirmed(), INVALID_ID);

        state.insert(0, loc(0));
        state.insert(1, loc(1));
        state.insert(3, loc(3));
        assert_eq!(state.last_contiguous(), Some(1));

        state.insert(2, loc(2));
        assert_eq!(state.last_contiguous(), Some(3));
        assert_eq!(state.last_add_confirmed(), 3);
    }

    #[test]
    fn test_frontier_resets_for_new_lowest_entry() {
        let (ledger, _) = register(&LedgerTable::new(), 1, b"key");
        let mut state = ledger.lock();
        state.insert(5, loc(5));
        state.insert(6, loc(6));
        assert_eq!(state.last_contiguous(), Some(6));
        state.insert(3, loc(3));
        assert_eq!(state.last_contiguous(), Some(3));
        state.insert(4, loc(4));
        assert_eq!(state.last_contiguous(), Some(6));
    }

    #[test]
    fn test_master_key_and_fence() {
        let table = LedgerTable::new();
        let (ledger, _) = register(&table, 9, b"alpha");
        let (again, created) = register(&table, 9, b"beta");
        assert!(!created);
        assert!(Arc::ptr_eq(&ledger, &again));

        let mut state = ledger.lock();
        state.check_master_key(9, b"alpha").unwrap();
        assert!(matches!(
            state.check_master_key(9, b"beta"),
            Err(Error::BadMasterKey(9))
        ));
        assert!(state.fence());
        assert!(!state.fence());
        assert!(state.is_fenced());
    }

    #[test]
    fn test_explicit_lac_is_monotonic() {
        use crate::entry::test_entries::raw_entry;

        let (ledger, _) = register(&LedgerTable::new(), 2, b"key");
        let mut state = ledger.lock();
        let five = Entry::parse(raw_entry(2, 5, 4)).unwrap();
        let three = Entry::parse(raw_entry(2, 3, 2)).unwrap();

        assert!(state.set_explicit_lac(five.clone()));
        assert!(!state.set_explicit_lac(three));
        assert_eq!(state.explicit_lac(), Some(&five));
        assert_eq!(state.last_add_confirmed(), 5);
    }

    #[test]
    fn test_failed_registration_leaves_no_ledger() {
        let table = LedgerTable::new();
        let result = table.get_or_register(4, b"key", || Err(Error::journal("disk gone")));
        assert!(result.is_err());
        assert!(!table.contains(4));
    }

    #[test]
    fn test_entries_iterator_is_lazy_and_restartable() {
        let (ledger, _) = register(&LedgerTable::new(), 3, b"key");
        for id in [0, 2, 7] {
            ledger.lock().insert(id, loc(0));
        }

        let mut entries = EntriesOfLedger::new(Arc::clone(&ledger));
        assert_eq!(entries.next(), Some(0));

        // Visible because it sorts after the cursor
        ledger.lock().insert(5, loc(0));
        assert_eq!(entries.by_ref().collect::<Vec<_>>(), vec![2, 5, 7]);
        assert_eq!(entries.next(), None);

        entries.rewind();
        assert_eq!(entries.collect::<Vec<_>>(), vec![0, 2, 5, 7]);
    }
}
