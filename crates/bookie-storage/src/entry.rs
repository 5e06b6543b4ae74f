//! Entry framing
//!
//! Entry format (big-endian):
//! ```text
//! +-----------+----------+------------------+---------+-----------+
//! | LedgerID  | EntryID  | LastAddConfirmed | Payload | Auth code |
//! | 8B        | 8B       | 8B               | var     | digest    |
//! +-----------+----------+------------------+---------+-----------+
//! ```
//!
//! The bookie keeps the raw bytes as received; header fields are decoded
//! once at parse time.

use bookie_common::{DigestType, EntryId, Error, INVALID_ID, LedgerId, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the fixed entry header
pub const HEADER_LEN: usize = 24;

/// A parsed entry backed by its raw wire bytes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    ledger_id: LedgerId,
    entry_id: EntryId,
    last_add_confirmed: EntryId,
    raw: Bytes,
}

impl Entry {
    /// Parse an entry from its wire bytes
    ///
    /// Only the header is validated; the body is opaque to the bookie.
    pub fn parse(raw: Bytes) -> Result<Self> {
        Self::parse_with_min_entry(raw, 0)
    }

    /// Parse an explicit-LAC control entry
    ///
    /// Its entry id field is the advertised LAC, which may be `INVALID_ID`
    /// while nothing is confirmed yet.
    pub fn parse_explicit_lac(raw: Bytes) -> Result<Self> {
        Self::parse_with_min_entry(raw, INVALID_ID)
    }

    fn parse_with_min_entry(raw: Bytes, min_entry_id: EntryId) -> Result<Self> {
        if raw.len() < HEADER_LEN {
            return Err(Error::malformed(format!(
                "entry of {} bytes is shorter than the {HEADER_LEN} byte header",
                raw.len()
            )));
        }

        let ledger_id = read_i64(&raw, 0);
        let entry_id = read_i64(&raw, 8);
        let last_add_confirmed = read_i64(&raw, 16);

        if ledger_id < 0 || entry_id < min_entry_id {
            return Err(Error::malformed(format!(
                "negative identifiers in header: ledger={ledger_id}, entry={entry_id}"
            )));
        }

        Ok(Self {
            ledger_id,
            entry_id,
            last_add_confirmed,
            raw,
        })
    }

    /// Build an entry, computing its auth code with `digest`
    #[must_use]
    pub fn build(
        ledger_id: LedgerId,
        entry_id: EntryId,
        last_add_confirmed: EntryId,
        payload: &[u8],
        digest: DigestType,
        master_key: &[u8],
    ) -> Self {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len() + digest.code_len());
        buf.put_i64(ledger_id);
        buf.put_i64(entry_id);
        buf.put_i64(last_add_confirmed);
        buf.put_slice(payload);
        let code = digest.compute(master_key, &buf);
        buf.put_slice(&code);

        Self {
            ledger_id,
            entry_id,
            last_add_confirmed,
            raw: buf.freeze(),
        }
    }

    /// Build an explicit-LAC control entry for `ledger_id`
    ///
    /// The header keeps the standard layout: the entry id field carries the
    /// LAC value to advertise, taken from `reference`, whose body is reused.
    #[must_use]
    pub fn explicit_lac(ledger_id: LedgerId, reference: &Self) -> Self {
        let mut buf = BytesMut::with_capacity(reference.raw.len());
        buf.put_i64(ledger_id);
        buf.put_i64(reference.entry_id);
        buf.put_i64(reference.last_add_confirmed);
        buf.put_slice(reference.body());

        Self {
            ledger_id,
            entry_id: reference.entry_id,
            last_add_confirmed: reference.last_add_confirmed,
            raw: buf.freeze(),
        }
    }

    #[must_use]
    pub const fn ledger_id(&self) -> LedgerId {
        self.ledger_id
    }

    #[must_use]
    pub const fn entry_id(&self) -> EntryId {
        self.entry_id
    }

    #[must_use]
    pub const fn last_add_confirmed(&self) -> EntryId {
        self.last_add_confirmed
    }

    /// Everything after the header (payload and auth code)
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.raw[HEADER_LEN..]
    }

    /// Payload, assuming the auth code was produced by `digest`
    #[must_use]
    pub fn payload(&self, digest: DigestType) -> &[u8] {
        let body = self.body();
        &body[..body.len().saturating_sub(digest.code_len())]
    }

    /// Trailing auth code, assuming it was produced by `digest`
    #[must_use]
    pub fn auth_code(&self, digest: DigestType) -> &[u8] {
        let body = self.body();
        &body[body.len().saturating_sub(digest.code_len())..]
    }

    /// Verify the auth code against header and payload
    #[must_use]
    pub fn verify(&self, digest: DigestType, master_key: &[u8]) -> bool {
        let signed = self.raw.len().saturating_sub(digest.code_len());
        if signed < HEADER_LEN {
            return false;
        }
        digest.verify(master_key, &self.raw[..signed], &self.raw[signed..])
    }

    /// Raw wire bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &Bytes {
        &self.raw
    }

    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.raw
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// Big-endian i64 at `at`; the caller guarantees the bounds
pub(crate) fn read_i64(buf: &[u8], at: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    i64::from_be_bytes(bytes)
}
