use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::lock::{LockGuard, RollbackLock};
use crate::store::BlockStore;
use crate::types::BlockHeight;

/// Summary of a completed rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    pub previous_height: BlockHeight,
    pub height: BlockHeight,
    pub removed_blocks: u64,
}

/// Removes every block above a target height while holding the rollback
/// lock, so block creation is refused for the duration.
pub struct RollbackCoordinator {
    blocks: Arc<dyn BlockStore>,
    lock: Arc<dyn RollbackLock>,
}

impl RollbackCoordinator {
    pub fn new(blocks: Arc<dyn BlockStore>, lock: Arc<dyn RollbackLock>) -> Self {
        Self { blocks, lock }
    }

    /// Roll the ledger back to `target`. Fails fast with
    /// [`LedgerError::RollbackAlreadyLocked`] when another rollback holds the
    /// lock. The lock is released on every exit path, including a panic in
    /// the store and the caller dropping this future part way through.
    pub async fn rollback(&self, target: BlockHeight) -> Result<RollbackOutcome, LedgerError> {
        let Some(guard) = LockGuard::try_acquire(self.lock.clone()).await? else {
            warn!(target = %target, "rollback refused, lock already held");
            return Err(LedgerError::RollbackAlreadyLocked);
        };
        debug!(target = %target, "rollback lock acquired");

        let outcome = self.delete_above(target).await;

        if let Err(err) = guard.release().await {
            warn!(target = %target, error = %err, "failed to release rollback lock");
        }
        outcome
    }

    async fn delete_above(&self, target: BlockHeight) -> Result<RollbackOutcome, LedgerError> {
        let current = self.blocks.current_height().await?;
        if target == BlockHeight::EMPTY || target > current {
            return Err(LedgerError::InvalidHeight {
                current_height: current,
            });
        }

        let removed_blocks = self.blocks.delete_after_height(target).await?;
        info!(
            previous_height = %current,
            height = %target,
            removed_blocks,
            "ledger rolled back"
        );

        Ok(RollbackOutcome {
            previous_height: current,
            height: target,
            removed_blocks,
        })
    }
}
