//! Bookie Common - Shared types and utilities
//!
//! This crate provides the error taxonomy, configuration and core types
//! used across the bookie crates.

pub mod config;
pub mod digest;
pub mod error;
pub mod types;

pub use config::ServerConfig;
pub use digest::DigestType;
pub use error::{Error, Result};
pub use types::*;
