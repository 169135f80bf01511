//! Named resource locks for admin operations.
//!
//! A lock is identified by `(namespace, resource)`. `try_acquire` rejects a
//! second holder immediately, which is what admin commands want: a refresh
//! requested while another refresh is running should fail, not queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Errors from acquiring a named lock.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("cannot operate on {resource} ({namespace}); it is currently in use")]
    Locked { namespace: String, resource: String },
}

type LockKey = (String, String);

/// Registry of named async mutexes, created on first use.
#[derive(Debug, Default)]
pub struct ResourceLocks {
    locks: Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, namespace: &str, resource: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            locks
                .entry((namespace.to_string(), resource.to_string()))
                .or_default(),
        )
    }

    /// Take the lock or fail straight away if it is held.
    pub fn try_acquire(&self, namespace: &str, resource: &str) -> Result<ResourceGuard, LockError> {
        let guard = self
            .lock_for(namespace, resource)
            .try_lock_owned()
            .map_err(|_| LockError::Locked {
                namespace: namespace.to_string(),
                resource: resource.to_string(),
            })?;
        debug!(namespace, resource, "Acquired resource lock");
        Ok(ResourceGuard { _guard: guard })
    }

    pub fn is_locked(&self, namespace: &str, resource: &str) -> bool {
        self.lock_for(namespace, resource).try_lock().is_err()
    }
}

/// Releases its lock on drop.
#[derive(Debug)]
pub struct ResourceGuard {
    _guard: OwnedMutexGuard<()>,
}
