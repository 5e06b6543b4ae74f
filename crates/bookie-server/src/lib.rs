//! Bookie Server - node composition
//!
//! Resolves the bookie's network identity and drives the storage lifecycle.

pub mod identity;
pub mod node;

pub use identity::{BookieIdentity, NetworkEnvironment, SystemNetwork, resolve, resolve_address, resolve_id};
pub use node::Bookie;
