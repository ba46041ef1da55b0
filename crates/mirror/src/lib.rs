//! Mirror engine for the pantry registry mirror.
//!
//! The engine couples an upstream registry client to a bounded pool
//! of workers behind a dispatcher, reconciles each worker result into
//! the persistent catalog, and drives a sequence-based incremental
//! update loop. A consistency checker cross-checks catalog marks
//! against documents and on-disk tarballs.

pub mod check;
pub mod client;
pub mod controller;
pub mod error;
pub mod pool;
pub mod tarballs;
pub mod worker;

pub use check::{CheckReport, check};
pub use client::{AllDocs, Changes, DocumentFetch, UpstreamClient};
pub use controller::MirrorController;
pub use error::{MirrorError, MirrorResult};
pub use tarballs::TarballStore;
pub use worker::{DistState, WorkResult, Worker};
