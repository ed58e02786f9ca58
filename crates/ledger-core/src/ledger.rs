//! Composition root for the ledger core.
//!
//! [`Ledger`] wires the validator, both coordinators, the rollback lock and
//! the balance query over a single storage backend. [`seed_genesis`] gives an
//! empty backend its first block.

use std::sync::Arc;

use tracing::{debug, info};

use crate::balance::BalanceQuery;
use crate::block::compute_hash;
use crate::create_block::LedgerWriteCoordinator;
use crate::error::{LedgerError, StoreError};
use crate::kv::KeyValueStore;
use crate::lock::{KvRollbackLock, RollbackLock};
use crate::rollback::{RollbackCoordinator, RollbackOutcome};
use crate::store::{
    AtomicScope, BlockRecord, BlockStore, LedgerSession, TransactionRecord, UnspentOutputIndex,
};
use crate::types::{AddressBalance, Amount, Block, BlockHeight, Output, Transaction};
use crate::validator::UtxoTransactionValidator;

// ==============================================================================
// Genesis
// ==============================================================================

/// Id of the single transaction in the genesis block.
pub const GENESIS_TX_ID: &str = "1";

/// Who receives the initial supply, and how much.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Genesis {
    pub address: String,
    pub amount: Amount,
}

impl Default for Genesis {
    fn default() -> Self {
        Self {
            address: "genesis".to_string(),
            amount: Amount::new(100_000, 0),
        }
    }
}

impl Genesis {
    /// The genesis block: height 1, one input-less transaction paying the
    /// whole supply to `address`.
    pub fn block(&self) -> Block {
        let transaction = Transaction::new(
            GENESIS_TX_ID,
            Vec::new(),
            vec![Output::new(self.address.clone(), self.amount)],
        );
        let id = compute_hash(BlockHeight::GENESIS, [GENESIS_TX_ID]);
        Block::new(id, BlockHeight::GENESIS, vec![transaction])
    }
}

/// Write the genesis block if `store` is empty. Returns whether it seeded.
pub async fn seed_genesis<S>(store: &S, genesis: &Genesis) -> Result<bool, StoreError>
where
    S: BlockStore + AtomicScope + ?Sized,
{
    let current = store.current_height().await?;
    if current != BlockHeight::EMPTY {
        debug!(height = %current, "ledger already initialized, skipping genesis");
        return Ok(false);
    }

    let block = genesis.block();
    let block_record = BlockRecord::from(&block);
    let transactions: Vec<TransactionRecord> = block
        .transactions
        .iter()
        .map(|transaction| TransactionRecord::from_transaction(transaction, block.height))
        .collect();

    store
        .within_transaction(Box::new(|session: &mut dyn LedgerSession| {
            session.save_block(&block_record)?;
            session.save_transactions(&transactions)
        }))
        .await?;

    info!(
        block.id = %block.id,
        address = %genesis.address,
        amount = %genesis.amount,
        "genesis block written"
    );
    Ok(true)
}

// ==============================================================================
// Ledger Facade
// ==============================================================================

pub struct Ledger {
    writer: LedgerWriteCoordinator,
    rollback: RollbackCoordinator,
    balance: BalanceQuery,
    blocks: Arc<dyn BlockStore>,
}

impl Ledger {
    /// Build a ledger over `store`, keeping the rollback lock in `kv`.
    pub fn new<S>(store: Arc<S>, kv: Arc<dyn KeyValueStore>) -> Self
    where
        S: BlockStore + UnspentOutputIndex + AtomicScope + 'static,
    {
        let lock: Arc<dyn RollbackLock> = Arc::new(KvRollbackLock::new(kv));
        let validator = Arc::new(UtxoTransactionValidator::new(store.clone()));

        Self {
            writer: LedgerWriteCoordinator::new(
                validator,
                store.clone(),
                store.clone(),
                lock.clone(),
            ),
            rollback: RollbackCoordinator::new(store.clone(), lock),
            balance: BalanceQuery::new(store.clone()),
            blocks: store,
        }
    }

    pub async fn create_block(&self, block: Block) -> Result<Block, LedgerError> {
        self.writer.create_block(block).await
    }

    pub async fn rollback(&self, height: BlockHeight) -> Result<RollbackOutcome, LedgerError> {
        self.rollback.rollback(height).await
    }

    pub async fn balance(&self, address: &str) -> Result<AddressBalance, LedgerError> {
        self.balance.execute(address).await
    }

    pub async fn current_height(&self) -> Result<BlockHeight, LedgerError> {
        Ok(self.blocks.current_height().await?)
    }
}
