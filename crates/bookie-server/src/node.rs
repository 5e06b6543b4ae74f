//! Bookie node
//!
//! Ties identity resolution and the storage engine together. Formatting is
//! only offered on a node that is not running, since it must never overlap
//! with a mounted storage.

use crate::identity::{self, BookieIdentity, NetworkEnvironment, SystemNetwork};
use bookie_common::{Result, ServerConfig};
use bookie_storage::admission::{DiskUsageSampler, StatvfsSampler};
use bookie_storage::dirs::{self, ConfirmationSource};
use bookie_storage::LedgerStorage;
use std::sync::Arc;
use tracing::info;

/// A running bookie
pub struct Bookie {
    config: ServerConfig,
    identity: BookieIdentity,
    storage: Arc<LedgerStorage>,
}

impl Bookie {
    /// Resolve the identity and mount storage using system facilities
    pub fn start(config: ServerConfig) -> Result<Self> {
        Self::start_with(config, &SystemNetwork, Arc::new(StatvfsSampler))
    }

    /// Start with explicit network and disk usage sources
    pub fn start_with(
        config: ServerConfig,
        network: &dyn NetworkEnvironment,
        sampler: Arc<dyn DiskUsageSampler>,
    ) -> Result<Self> {
        let identity = identity::resolve(&config, network)?;
        let storage = LedgerStorage::mount_with_sampler(&config, None, sampler)?;

        match &identity.address {
            Some(address) => info!("Bookie {} started at {}", identity.id, address),
            None => info!("Bookie {} started without a resolvable address", identity.id),
        }

        Ok(Self {
            config,
            identity,
            storage,
        })
    }

    /// Wipe every configured directory of a stopped bookie
    pub fn format(
        config: &ServerConfig,
        interactive: bool,
        force: bool,
        confirmation: &mut dyn ConfirmationSource,
    ) -> Result<bool> {
        dirs::format(config, interactive, force, confirmation)
    }

    #[must_use]
    pub const fn identity(&self) -> &BookieIdentity {
        &self.identity
    }

    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub const fn storage(&self) -> &Arc<LedgerStorage> {
        &self.storage
    }

    /// Storage counters in Prometheus text format
    #[must_use]
    pub fn metrics(&self) -> String {
        self.storage.stats().export_prometheus(self.identity.id.as_str())
    }

    /// Stop the bookie; storage handles are released once
    pub fn shutdown(&self) {
        self.storage.shutdown();
        info!("Bookie {} stopped", self.identity.id);
    }
}

impl Drop for Bookie {
    fn drop(&mut self) {
        self.storage.shutdown();
    }
}
