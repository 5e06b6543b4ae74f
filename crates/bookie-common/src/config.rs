//! Server configuration for the bookie
//!
//! The configuration is read from a TOML file. Every field has a default so a
//! partial file (or none at all) yields a usable configuration.

use crate::digest::DigestType;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for a bookie
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port the bookie listens on
    pub bookie_port: u16,
    /// Address advertised to clients, takes precedence over interface lookup
    pub advertised_address: Option<String>,
    /// Network interface to take the bookie address from
    pub listening_interface: Option<String>,
    /// Allow a loopback address to be used as the bookie address
    pub allow_loopback: bool,
    /// Use the hostname instead of the IP in the bookie address
    pub use_host_name_as_bookie_id: bool,
    /// Keep only the first label of the hostname
    pub use_short_host_name: bool,
    /// Explicit bookie id, used verbatim when set
    pub bookie_id: Option<String>,

    /// Journal directories
    pub journal_dirs: Option<Vec<PathBuf>>,
    /// Ledger (entry log) directories
    pub ledger_dirs: Option<Vec<PathBuf>>,
    /// Index directories, defaults to the ledger directories
    pub index_dirs: Option<Vec<PathBuf>>,
    /// Path for the GC entry-log metadata cache
    pub gc_entry_log_metadata_cache_path: Option<PathBuf>,

    /// Disk usage ratio above which the bookie turns read-only
    pub disk_usage_threshold: f32,
    /// Disk usage ratio above which a warning is logged
    pub disk_usage_warn_threshold: f32,
    /// Interval between disk usage samples (milliseconds)
    pub disk_check_interval_ms: u64,

    /// Number of ordered worker threads
    pub num_workers: usize,
    /// Digest type clients use for entry auth codes
    pub digest_type: DigestType,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bookie_port: 3181,
            advertised_address: None,
            listening_interface: None,
            allow_loopback: false,
            use_host_name_as_bookie_id: false,
            use_short_host_name: false,
            bookie_id: None,
            journal_dirs: Some(vec![PathBuf::from("/tmp/bk-txn")]),
            ledger_dirs: Some(vec![PathBuf::from("/tmp/bk-data")]),
            index_dirs: None,
            gc_entry_log_metadata_cache_path: None,
            disk_usage_threshold: 0.95,
            disk_usage_warn_threshold: 0.90,
            disk_check_interval_ms: 10_000,
            num_workers: 4,
            digest_type: DigestType::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Index directories, falling back to the ledger directories
    #[must_use]
    pub fn index_dirs(&self) -> Option<&[PathBuf]> {
        self.index_dirs
            .as_deref()
            .or_else(|| self.ledger_dirs.as_deref())
    }

    /// Disk check interval as a duration
    #[must_use]
    pub const fn disk_check_interval(&self) -> Duration {
        Duration::from_millis(self.disk_check_interval_ms)
    }

    /// Point every directory group at subdirectories of `root`
    ///
    /// Handy for tests and single-disk deployments.
    #[must_use]
    pub fn with_root(mut self, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        self.journal_dirs = Some(vec![root.join("journal")]);
        self.ledger_dirs = Some(vec![root.join("ledgers")]);
        self.index_dirs = Some(vec![root.join("index")]);
        self.gc_entry_log_metadata_cache_path = Some(root.join("gc-metadata"));
        self
    }
}
