//! Core type definitions for the bookie

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

/// Ledger identifier
pub type LedgerId = i64;

/// Entry identifier within a ledger
pub type EntryId = i64;

/// Placeholder id reported when an entry header could not be parsed
pub const INVALID_ID: i64 = -1;

/// Network address a bookie advertises to clients
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{host}:{port}")]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Logical identifier of a bookie, used for registration
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From)]
#[display("{_0}")]
pub struct BookieId(String);

impl BookieId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&HostPort> for BookieId {
    fn from(addr: &HostPort) -> Self {
        Self(addr.to_string())
    }
}
