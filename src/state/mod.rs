//! State management for the reconciliation engine.
//!
//! This module persists the last-applied resource graph and its concrete
//! outputs between runs: a versioned snapshot document, an advisory lock,
//! and pluggable storage backends (local file, S3).

mod store;
mod local;
mod s3;
mod lock;
mod types;

pub use store::StateStore;
pub use local::LocalStateStore;
pub use s3::S3StateStore;
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use types::{ResourceRecord, StateSnapshot, STATE_FORMAT_VERSION};
