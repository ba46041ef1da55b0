//! Core domain types and shared logic for the pantry registry mirror.
//!
//! This crate defines the vocabulary used across all other crates:
//! - Registry document parsing (revision, distributions, version lookup)
//! - Tarball hashes and local path mapping
//! - Application configuration

pub mod config;
pub mod document;
pub mod error;
pub mod hash;
pub mod path;

pub use config::{AppConfig, DatabaseConfig, DatabaseDriver, MirrorConfig, ServerConfig};
pub use document::Distribution;
pub use error::{Error, Result};
pub use hash::{TarballHash, TarballHasher};
pub use path::local_path;

/// Rows committed per transaction during bulk catalog ingestion.
pub const INGEST_BATCH_SIZE: usize = 10_000;

/// Capacity of the pending-package work queue.
pub const WORK_QUEUE_DEPTH: usize = 100;
