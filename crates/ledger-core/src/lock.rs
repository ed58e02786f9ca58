//! The rollback lock: one named flag in a [`KeyValueStore`].
//!
//! While the flag is present, block creation is refused and further
//! rollbacks fail fast. The lock is not reentrant and never queues.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::kv::KeyValueStore;

pub const ROLLBACK_LOCK_KEY: &str = "rollback_lock";
const LOCKED: &str = "true";

#[async_trait]
pub trait RollbackLock: Send + Sync {
    async fn is_locked(&self) -> Result<bool, StoreError>;

    /// Take the lock if it is free. Returns `false` when another holder has it.
    async fn try_acquire(&self) -> Result<bool, StoreError>;

    async fn release(&self) -> Result<(), StoreError>;
}

pub struct KvRollbackLock {
    store: Arc<dyn KeyValueStore>,
}

impl KvRollbackLock {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RollbackLock for KvRollbackLock {
    async fn is_locked(&self) -> Result<bool, StoreError> {
        Ok(self.store.get(ROLLBACK_LOCK_KEY).await?.as_deref() == Some(LOCKED))
    }

    async fn try_acquire(&self) -> Result<bool, StoreError> {
        self.store.set_if_absent(ROLLBACK_LOCK_KEY, LOCKED).await
    }

    async fn release(&self) -> Result<(), StoreError> {
        self.store.delete(ROLLBACK_LOCK_KEY).await
    }
}

/// A held rollback lock.
///
/// Call [`LockGuard::release`] on the normal path. A guard dropped while still
/// armed, because its owner was cancelled or panicked, releases the lock from
/// a task spawned on the current runtime.
pub struct LockGuard {
    lock: Option<Arc<dyn RollbackLock>>,
}

impl LockGuard {
    /// Take `lock` if it is free. `None` means another holder has it.
    pub async fn try_acquire(lock: Arc<dyn RollbackLock>) -> Result<Option<Self>, StoreError> {
        if !lock.try_acquire().await? {
            return Ok(None);
        }
        Ok(Some(Self { lock: Some(lock) }))
    }

    /// Release the lock. On failure the guard stays armed and retries when dropped.
    pub async fn release(mut self) -> Result<(), StoreError> {
        if let Some(lock) = self.lock.clone() {
            lock.release().await?;
            self.lock = None;
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    match lock.release().await {
                        Ok(()) => debug!("rollback lock released after interrupted holder"),
                        Err(err) => warn!(error = %err, "failed to release rollback lock"),
                    }
                });
            }
            Err(_) => warn!("rollback lock left held, no runtime to release it"),
        }
    }
}
