//! Storage collaborators consumed by the ledger core.
//!
//! Defines the capability traits ([`BlockStore`], [`UnspentOutputIndex`],
//! [`AtomicScope`] with its [`LedgerSession`]) and the flat records written
//! through them. Two backends implement every capability: [`MemoryLedger`]
//! and [`SqliteLedger`]. A failure-injecting `mock::MockStore` exists for
//! tests.

mod memory;
#[cfg(test)]
pub mod mock;
mod sqlite;

pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{Amount, Block, BlockHeight, Input, Output, OutputRef, Transaction, UnspentOutput};

// ==============================================================================
// Capabilities
// ==============================================================================

/// Block-level reads and the rollback deletion path.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Highest committed height, or [`BlockHeight::EMPTY`] for an empty ledger.
    async fn current_height(&self) -> Result<BlockHeight, StoreError>;

    /// Delete every block above `height`, cascading to its transactions,
    /// outputs and inputs. Returns the number of blocks removed.
    async fn delete_after_height(&self, height: BlockHeight) -> Result<u64, StoreError>;
}

/// Derived view over outputs not yet consumed by any committed input.
#[async_trait]
pub trait UnspentOutputIndex: Send + Sync {
    /// Return the distinct subset of `refs` that is currently unspent.
    /// Callers compare the returned count with the full length of `refs`, so
    /// a reference repeated within the request counts as missing, as does a
    /// spent or unknown output.
    async fn resolve(&self, refs: &[OutputRef]) -> Result<Vec<UnspentOutput>, StoreError>;

    /// Every unspent output owned by `address`.
    async fn by_address(&self, address: &str) -> Result<Vec<UnspentOutput>, StoreError>;
}

/// Write handle valid only inside [`AtomicScope::within_transaction`].
/// Inserts made through it become visible together when the work returns
/// `Ok`, and are discarded otherwise.
pub trait LedgerSession {
    fn save_block(&mut self, block: &BlockRecord) -> Result<(), StoreError>;

    fn save_transactions(&mut self, transactions: &[TransactionRecord]) -> Result<(), StoreError>;
}

/// Work executed inside one atomic scope.
pub type UnitOfWork<'a> =
    Box<dyn FnOnce(&mut dyn LedgerSession) -> Result<(), StoreError> + Send + 'a>;

#[async_trait]
pub trait AtomicScope: Send + Sync {
    /// Run `work` so that everything it writes commits together or not at all.
    async fn within_transaction(&self, work: UnitOfWork<'_>) -> Result<(), StoreError>;
}

// ==============================================================================
// Records
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub id: String,
    pub height: BlockHeight,
}

impl From<&Block> for BlockRecord {
    fn from(block: &Block) -> Self {
        Self {
            id: block.id.clone(),
            height: block.height,
        }
    }
}

/// Output row: position `index` of transaction `tx_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRecord {
    pub tx_id: String,
    pub index: u32,
    pub address: String,
    pub value: Amount,
}

/// Input row: position `index` of transaction `tx_id`, consuming
/// `ref_tx_id:ref_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRecord {
    pub ref_tx_id: String,
    pub ref_index: u32,
    pub tx_id: String,
    pub index: u32,
}

impl InputRecord {
    pub fn prevout(&self) -> OutputRef {
        OutputRef::new(self.ref_tx_id.clone(), self.ref_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub id: String,
    pub block_height: BlockHeight,
    pub inputs: Vec<InputRecord>,
    pub outputs: Vec<OutputRecord>,
}

impl TransactionRecord {
    /// Flatten a transaction into rows, assigning positions in declaration order.
    pub fn from_transaction(transaction: &Transaction, block_height: BlockHeight) -> Self {
        let inputs = transaction
            .inputs
            .iter()
            .zip(0u32..)
            .map(|(input, index)| InputRecord {
                ref_tx_id: input.tx_id.clone(),
                ref_index: input.index,
                tx_id: transaction.id.clone(),
                index,
            })
            .collect();
        let outputs = transaction
            .outputs
            .iter()
            .zip(0u32..)
            .map(|(output, index)| OutputRecord {
                tx_id: transaction.id.clone(),
                index,
                address: output.address.clone(),
                value: output.value,
            })
            .collect();

        Self {
            id: transaction.id.clone(),
            block_height,
            inputs,
            outputs,
        }
    }

    /// Canonical domain view of the stored rows.
    pub fn to_transaction(&self) -> Transaction {
        Transaction {
            id: self.id.clone(),
            inputs: self
                .inputs
                .iter()
                .map(|input| Input::new(input.ref_tx_id.clone(), input.ref_index))
                .collect(),
            outputs: self
                .outputs
                .iter()
                .map(|output| Output::new(output.address.clone(), output.value))
                .collect(),
        }
    }
}
