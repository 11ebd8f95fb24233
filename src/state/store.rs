//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.
//! `save` enforces at-most-one concurrent writer via an optimistic version
//! check: a snapshot whose `version` is not exactly one ahead of the stored
//! version is rejected with a stale-snapshot error, forcing the caller to
//! reload and recompute its plan.

use async_trait::async_trait;

use crate::error::Result;
use super::lock::LockInfo;
use super::types::StateSnapshot;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the state snapshot.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self) -> Result<Option<StateSnapshot>>;

    /// Saves the state snapshot.
    ///
    /// Fails with [`crate::error::StateError::StaleSnapshot`] unless
    /// `snapshot.version` is exactly one ahead of the stored version
    /// (or 1 when no state exists).
    async fn save(&self, snapshot: &StateSnapshot) -> Result<()>;

    /// Deletes the state snapshot.
    async fn delete(&self) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires an advisory lock on the state.
    ///
    /// Returns lock information if successful.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases a lock on the state.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked.
    async fn is_locked(&self) -> Result<bool>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self) -> Result<Option<StateSnapshot>> {
        (**self).load().await
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        (**self).save(snapshot).await
    }

    async fn delete(&self) -> Result<()> {
        (**self).delete().await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        (**self).acquire_lock(holder).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).get_lock_info().await
    }

    async fn is_locked(&self) -> Result<bool> {
        (**self).is_locked().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}

/// Verifies the version counter progression for a save.
///
/// # Errors
///
/// Returns [`crate::error::StateError::StaleSnapshot`] when `incoming` is
/// not exactly one ahead of `stored`.
pub(crate) fn check_version(stored: u64, incoming: u64) -> Result<()> {
    if incoming != stored + 1 {
        return Err(crate::error::ConvergeError::State(
            crate::error::StateError::StaleSnapshot {
                expected: stored + 1,
                found: incoming,
            },
        ));
    }
    Ok(())
}
