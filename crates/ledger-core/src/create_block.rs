use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, error, info, warn};

use crate::error::LedgerError;
use crate::lock::RollbackLock;
use crate::store::{AtomicScope, BlockRecord, BlockStore, LedgerSession, TransactionRecord};
use crate::types::Block;
use crate::validator::TransactionValidator;

// ==============================================================================
// Block Admission
// ==============================================================================

/// Admits new blocks into the ledger.
///
/// Every check that can reject a block runs before the single atomic commit,
/// so a rejected block leaves no trace. The coordinator holds no lock of its
/// own around admission: two racing blocks for the same height, or spending
/// the same output, are resolved by storage uniqueness and the loser gets
/// [`LedgerError::CommitConflict`].
pub struct LedgerWriteCoordinator {
    validator: Arc<dyn TransactionValidator>,
    blocks: Arc<dyn BlockStore>,
    scope: Arc<dyn AtomicScope>,
    lock: Arc<dyn RollbackLock>,
}

impl LedgerWriteCoordinator {
    pub fn new(
        validator: Arc<dyn TransactionValidator>,
        blocks: Arc<dyn BlockStore>,
        scope: Arc<dyn AtomicScope>,
        lock: Arc<dyn RollbackLock>,
    ) -> Self {
        Self {
            validator,
            blocks,
            scope,
            lock,
        }
    }

    /// Validate `block` against the current tip and UTXO set, then commit it.
    /// Returns the block as stored.
    pub async fn create_block(&self, block: Block) -> Result<Block, LedgerError> {
        match self.admit(&block).await {
            Ok(committed) => {
                info!(
                    block.id = %committed.id,
                    block.height = %committed.height,
                    tx_count = committed.transactions.len(),
                    "block committed"
                );
                Ok(committed)
            }
            Err(err) => {
                match &err {
                    LedgerError::Unexpected(detail) => {
                        error!(block.id = %block.id, block.height = %block.height, %detail, "block creation failed");
                    }
                    other => {
                        warn!(block.id = %block.id, block.height = %block.height, code = other.code(), "block rejected: {other}");
                    }
                }
                Err(err)
            }
        }
    }

    async fn admit(&self, block: &Block) -> Result<Block, LedgerError> {
        if self.lock.is_locked().await? {
            return Err(LedgerError::RollbackInProgress);
        }

        if block.input_count() == 0 {
            return Err(LedgerError::MinOneInputTransaction);
        }

        let identity = block.verify_identity();
        if !identity.valid {
            return Err(LedgerError::InvalidBlockSignature {
                computed_hash: identity.computed_hash,
            });
        }

        let sequence = block.check_height(self.blocks.as_ref()).await?;
        if !sequence.valid {
            return Err(LedgerError::InvalidHeight {
                current_height: sequence.current_height,
            });
        }

        if let Some(reference) = block.find_duplicate_input() {
            return Err(LedgerError::TransactionInputNotValid { reference });
        }

        if let Some(tx_id) = block.find_duplicate_transaction_id() {
            return Err(LedgerError::DuplicateTransaction(format!(
                "{tx_id} appears more than once in the block"
            )));
        }

        self.validate_transactions(block).await?;
        self.commit(block).await
    }

    /// Validate every transaction concurrently. All reads finish before the
    /// caller commits anything.
    async fn validate_transactions(&self, block: &Block) -> Result<(), LedgerError> {
        let validator = self.validator.as_ref();
        let results = try_join_all(
            block
                .transactions
                .iter()
                .map(|transaction| transaction.validate(validator)),
        )
        .await?;

        debug!(block.height = %block.height, tx_count = results.len(), "transactions validated");

        let rejected: Vec<String> = block
            .transactions
            .iter()
            .zip(&results)
            .filter(|(_, result)| !result.valid)
            .map(|(transaction, result)| {
                format!(
                    "{}: {}",
                    transaction.id,
                    result.reason.as_deref().unwrap_or("invalid")
                )
            })
            .collect();

        if rejected.is_empty() {
            Ok(())
        } else {
            Err(LedgerError::InvalidTransactions {
                reason: rejected.join("; "),
            })
        }
    }

    async fn commit(&self, block: &Block) -> Result<Block, LedgerError> {
        let block_record = BlockRecord::from(block);
        let transaction_records: Vec<TransactionRecord> = block
            .transactions
            .iter()
            .map(|transaction| TransactionRecord::from_transaction(transaction, block.height))
            .collect();

        self.scope
            .within_transaction(Box::new(|session: &mut dyn LedgerSession| {
                session.save_block(&block_record)?;
                session.save_transactions(&transaction_records)
            }))
            .await?;

        Ok(Block::new(
            block_record.id,
            block_record.height,
            transaction_records
                .iter()
                .map(TransactionRecord::to_transaction)
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKeyValueStore;
    use crate::lock::KvRollbackLock;
    use crate::store::mock::MockStore;
    use crate::store::UnspentOutputIndex;
    use crate::test_util::*;
    use crate::types::{BlockHeight, OutputRef};
    use crate::validator::UtxoTransactionValidator;

    struct Harness {
        coordinator: LedgerWriteCoordinator,
        lock: Arc<KvRollbackLock>,
    }

    fn harness<S>(store: Arc<S>) -> Harness
    where
        S: BlockStore + UnspentOutputIndex + AtomicScope + 'static,
    {
        let lock = Arc::new(KvRollbackLock::new(Arc::new(InMemoryKeyValueStore::new())));
        let coordinator = LedgerWriteCoordinator::new(
            Arc::new(UtxoTransactionValidator::new(store.clone())),
            store.clone(),
            store,
            lock.clone(),
        );
        Harness { coordinator, lock }
    }

    // ==============================================================================
    // Happy Path
    // ==============================================================================

    #[tokio::test]
    async fn commits_valid_block() {
        let ledger = genesis_ledger().await;
        let h = harness(ledger.clone());

        let committed = h.coordinator.create_block(block_two()).await.unwrap();

        assert_eq!(committed, block_two());
        assert_eq!(ledger.current_height().await.unwrap(), BlockHeight(2));
        let addr1 = ledger.by_address("addr1").await.unwrap();
        assert_eq!(addr1.len(), 1);
        assert_eq!(addr1[0].value, dec("90000"));
    }

    #[tokio::test]
    async fn commit_writes_block_then_transactions() {
        let store = Arc::new(
            MockStore::builder()
                .with_unspent("1", 0, "genesis", "100000")
                .build(),
        );
        let h = harness(store.clone());

        h.coordinator.create_block(block_two()).await.unwrap();

        let saved = store.saved();
        let saved = saved.lock().unwrap();
        assert_eq!(saved.blocks, vec![BlockRecord::from(&block_two())]);
        assert_eq!(saved.transactions.len(), 1);
        assert_eq!(saved.transactions[0].block_height, BlockHeight(2));
    }

    // ==============================================================================
    // Rejections
    // ==============================================================================

    #[tokio::test]
    async fn rollback_in_progress_rejects_before_storage_reads() {
        let store = Arc::new(MockStore::builder().build());
        let reads = store.read_counter();
        let h = harness(store);
        assert!(h.lock.try_acquire().await.unwrap());

        let err = h.coordinator.create_block(block_two()).await.unwrap_err();

        assert_eq!(err, LedgerError::RollbackInProgress);
        assert_eq!(reads.get(), 0);
    }

    #[tokio::test]
    async fn block_without_inputs_is_rejected() {
        let ledger = genesis_ledger().await;
        let h = harness(ledger);
        let block = block_at(2, vec![tx("t", vec![], vec![output("a", "1")])]);

        let err = h.coordinator.create_block(block).await.unwrap_err();
        assert_eq!(err, LedgerError::MinOneInputTransaction);
    }

    #[tokio::test]
    async fn tampered_id_is_rejected_before_storage_reads() {
        let store = Arc::new(MockStore::builder().failing_reads().build());
        let h = harness(store);
        let mut block = block_two();
        let expected = block.id.clone();
        block.id = "not-the-hash".into();

        let err = h.coordinator.create_block(block).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::InvalidBlockSignature {
                computed_hash: expected
            }
        );
    }

    #[tokio::test]
    async fn height_gap_is_rejected_with_current_height() {
        let ledger = genesis_ledger().await;
        let h = harness(ledger);
        let block = block_at(
            3,
            vec![tx("t", vec![input("1", 0)], vec![output("a", "100000")])],
        );

        let err = h.coordinator.create_block(block).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::InvalidHeight {
                current_height: BlockHeight(1)
            }
        );
    }

    #[tokio::test]
    async fn same_input_in_two_transactions_is_rejected() {
        let ledger = genesis_ledger().await;
        let h = harness(ledger.clone());
        let block = block_at(
            2,
            vec![
                tx("a", vec![input("1", 0)], vec![output("x", "100000")]),
                tx("b", vec![input("1", 0)], vec![output("y", "100000")]),
            ],
        );

        let err = h.coordinator.create_block(block).await.unwrap_err();

        assert_eq!(
            err,
            LedgerError::TransactionInputNotValid {
                reference: OutputRef::new("1", 0)
            }
        );
        assert_eq!(ledger.current_height().await.unwrap(), BlockHeight(1));
        assert!(ledger.by_address("x").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_transaction_id_is_rejected_before_validation() {
        let store = Arc::new(
            MockStore::builder()
                .with_unspent("1", 0, "genesis", "100000")
                .build(),
        );
        let reads = store.read_counter();
        let h = harness(store.clone());
        let block = block_at(
            2,
            vec![
                tx("tx2", vec![input("1", 0)], vec![output("x", "100000")]),
                tx("tx2", vec![input("other", 0)], vec![output("y", "1")]),
            ],
        );

        let err = h.coordinator.create_block(block).await.unwrap_err();

        assert_eq!(err.code(), "DUPLICATE_TRANSACTION");
        assert!(!err.is_retryable());
        // Only the height check read storage.
        assert_eq!(reads.get(), 1);
        assert!(store.saved().lock().unwrap().blocks.is_empty());
    }

    #[tokio::test]
    async fn any_invalid_transaction_rejects_the_whole_block() {
        let ledger = genesis_ledger().await;
        let h = harness(ledger.clone());
        let block = block_at(
            2,
            vec![
                tx("good", vec![input("1", 0)], vec![output("x", "100000")]),
                tx("bad", vec![input("missing", 0)], vec![output("y", "5")]),
            ],
        );

        let err = h.coordinator.create_block(block).await.unwrap_err();

        match err {
            LedgerError::InvalidTransactions { reason } => {
                assert!(reason.starts_with("bad:"), "{reason}");
                assert!(!reason.contains("good"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(ledger.current_height().await.unwrap(), BlockHeight(1));
        assert!(ledger.by_address("x").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn spending_a_consumed_output_is_rejected() {
        let ledger = genesis_ledger().await;
        let h = harness(ledger);
        h.coordinator.create_block(block_two()).await.unwrap();

        let block = block_at(
            3,
            vec![tx("again", vec![input("1", 0)], vec![output("z", "100000")])],
        );
        let err = h.coordinator.create_block(block).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSACTIONS");
    }

    // ==============================================================================
    // Collaborator Failures
    // ==============================================================================

    #[tokio::test]
    async fn storage_failure_is_wrapped_as_unexpected() {
        let store = Arc::new(
            MockStore::builder()
                .with_unspent("1", 0, "genesis", "100000")
                .failing_commit()
                .build(),
        );
        let h = harness(store.clone());

        let err = h.coordinator.create_block(block_two()).await.unwrap_err();

        assert!(matches!(err, LedgerError::Unexpected(_)));
        assert!(store.saved().lock().unwrap().blocks.is_empty());
    }

    #[tokio::test]
    async fn lost_commit_race_is_a_retryable_conflict() {
        let store = Arc::new(
            MockStore::builder()
                .with_unspent("1", 0, "genesis", "100000")
                .conflicting_commit()
                .build(),
        );
        let h = harness(store);

        let err = h.coordinator.create_block(block_two()).await.unwrap_err();

        assert!(matches!(err, LedgerError::CommitConflict(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn committed_transaction_id_is_not_retryable() {
        let store = Arc::new(
            MockStore::builder()
                .with_unspent("1", 0, "genesis", "100000")
                .duplicate_commit()
                .build(),
        );
        let h = harness(store);

        let err = h.coordinator.create_block(block_two()).await.unwrap_err();

        assert_eq!(err.code(), "DUPLICATE_TRANSACTION");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn concurrent_blocks_for_one_height_commit_once() {
        let ledger = genesis_ledger().await;
        let h = harness(ledger.clone());

        let first = block_two();
        let second = block_at(
            2,
            vec![tx("rival", vec![input("1", 0)], vec![output("thief", "100000")])],
        );
        let (a, b) = tokio::join!(
            h.coordinator.create_block(first),
            h.coordinator.create_block(second)
        );

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let loser = a.err().or(b.err()).unwrap();
        assert!(
            matches!(
                loser,
                LedgerError::CommitConflict(_) | LedgerError::InvalidHeight { .. }
            ),
            "{loser:?}"
        );
        assert_eq!(ledger.current_height().await.unwrap(), BlockHeight(2));
    }
}
