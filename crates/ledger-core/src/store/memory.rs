use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreError;
use crate::types::{Amount, BlockHeight, OutputRef, UnspentOutput};

use super::{
    AtomicScope, BlockRecord, BlockStore, LedgerSession, TransactionRecord, UnitOfWork,
    UnspentOutputIndex,
};

// ==============================================================================
// Tables
// ==============================================================================

#[derive(Debug, Clone)]
struct OutputRow {
    address: String,
    value: Amount,
}

/// The spending side of an input, keyed in [`Tables::inputs`] by the
/// reference it consumes.
#[derive(Debug, Clone)]
struct InputRow {
    tx_id: String,
}

/// In-process tables mirroring the relational schema: unique block heights
/// and ids, transactions owned by a block, outputs keyed by reference, and
/// inputs keyed by the output they consume. An output is unspent exactly
/// when no input row exists under its reference.
#[derive(Debug, Default)]
struct Tables {
    blocks: BTreeMap<BlockHeight, String>,
    transactions: HashMap<String, BlockHeight>,
    outputs: BTreeMap<OutputRef, OutputRow>,
    inputs: BTreeMap<OutputRef, InputRow>,
}

impl Tables {
    fn is_unspent(&self, reference: &OutputRef) -> bool {
        !self.inputs.contains_key(reference)
    }

    fn unspent(&self, reference: &OutputRef, row: &OutputRow) -> UnspentOutput {
        UnspentOutput {
            address: row.address.clone(),
            value: row.value,
            tx_id: reference.tx_id.clone(),
            index: reference.index,
        }
    }

    /// Check every constraint for the staged rows first, then insert them.
    /// Nothing is modified when any check fails.
    fn apply(&mut self, staged: StagedWrites) -> Result<(), StoreError> {
        self.check(&staged)?;

        for block in staged.blocks {
            self.blocks.insert(block.height, block.id);
        }
        for tx in staged.transactions {
            self.transactions.insert(tx.id, tx.block_height);
            for output in tx.outputs {
                self.outputs.insert(
                    OutputRef::new(output.tx_id, output.index),
                    OutputRow {
                        address: output.address,
                        value: output.value,
                    },
                );
            }
            for input in tx.inputs {
                self.inputs.insert(
                    OutputRef::new(input.ref_tx_id, input.ref_index),
                    InputRow { tx_id: input.tx_id },
                );
            }
        }
        Ok(())
    }

    fn check(&self, staged: &StagedWrites) -> Result<(), StoreError> {
        let mut new_heights = HashSet::new();
        let mut new_block_ids = HashSet::new();
        for block in &staged.blocks {
            if self.blocks.contains_key(&block.height) || !new_heights.insert(block.height) {
                return Err(StoreError::Conflict(format!(
                    "block height {} already exists",
                    block.height
                )));
            }
            if self.blocks.values().any(|id| *id == block.id) || !new_block_ids.insert(&block.id) {
                return Err(StoreError::Duplicate(format!(
                    "block id {} already exists",
                    block.id
                )));
            }
        }

        let mut new_tx_ids = HashSet::new();
        let mut new_outputs = HashSet::new();
        for tx in &staged.transactions {
            if self.transactions.contains_key(&tx.id) || !new_tx_ids.insert(&tx.id) {
                return Err(StoreError::Duplicate(format!(
                    "transaction {} already exists",
                    tx.id
                )));
            }
            if !self.blocks.contains_key(&tx.block_height) && !new_heights.contains(&tx.block_height)
            {
                return Err(StoreError::Conflict(format!(
                    "transaction {} references missing block height {}",
                    tx.id, tx.block_height
                )));
            }
            for output in &tx.outputs {
                new_outputs.insert(OutputRef::new(output.tx_id.clone(), output.index));
            }
        }

        let mut consumed = HashSet::new();
        for input in staged.transactions.iter().flat_map(|tx| &tx.inputs) {
            let prevout = input.prevout();
            if !self.outputs.contains_key(&prevout) && !new_outputs.contains(&prevout) {
                return Err(StoreError::Conflict(format!(
                    "input {}:{} references missing output {prevout}",
                    input.tx_id, input.index
                )));
            }
            if !self.is_unspent(&prevout) || !consumed.insert(prevout.clone()) {
                return Err(StoreError::Conflict(format!(
                    "output {prevout} is already spent"
                )));
            }
        }
        Ok(())
    }

    /// Remove blocks above `height` and everything they own.
    fn delete_after(&mut self, height: BlockHeight) -> u64 {
        let removed = self.blocks.split_off(&height.next());
        if removed.is_empty() {
            return 0;
        }

        let mut removed_txs = HashSet::new();
        self.transactions.retain(|id, block_height| {
            if *block_height > height {
                removed_txs.insert(id.clone());
                false
            } else {
                true
            }
        });
        self.outputs
            .retain(|reference, _| !removed_txs.contains(&reference.tx_id));
        let outputs = &self.outputs;
        self.inputs.retain(|reference, row| {
            !removed_txs.contains(&row.tx_id) && outputs.contains_key(reference)
        });

        removed.len() as u64
    }
}

// ==============================================================================
// Staged Writes
// ==============================================================================

/// Rows collected by a unit of work before they are applied.
#[derive(Default)]
struct StagedWrites {
    blocks: Vec<BlockRecord>,
    transactions: Vec<TransactionRecord>,
}

impl LedgerSession for StagedWrites {
    fn save_block(&mut self, block: &BlockRecord) -> Result<(), StoreError> {
        self.blocks.push(block.clone());
        Ok(())
    }

    fn save_transactions(&mut self, transactions: &[TransactionRecord]) -> Result<(), StoreError> {
        self.transactions.extend_from_slice(transactions);
        Ok(())
    }
}

// ==============================================================================
// Memory Ledger
// ==============================================================================

/// In-process ledger storage.
///
/// Shared across coordinators via `Arc<MemoryLedger>`. Uses
/// `tokio::sync::RwLock` so that reads from concurrent validations proceed in
/// parallel while commits and rollbacks take the write side.
pub struct MemoryLedger {
    tables: RwLock<Tables>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockStore for MemoryLedger {
    async fn current_height(&self) -> Result<BlockHeight, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .blocks
            .keys()
            .next_back()
            .copied()
            .unwrap_or(BlockHeight::EMPTY))
    }

    async fn delete_after_height(&self, height: BlockHeight) -> Result<u64, StoreError> {
        let removed = self.tables.write().await.delete_after(height);
        debug!(%height, removed, "memory ledger: deleted blocks");
        Ok(removed)
    }
}

#[async_trait]
impl UnspentOutputIndex for MemoryLedger {
    async fn resolve(&self, refs: &[OutputRef]) -> Result<Vec<UnspentOutput>, StoreError> {
        let tables = self.tables.read().await;
        let mut seen = HashSet::new();
        Ok(refs
            .iter()
            .filter(|reference| seen.insert(*reference))
            .filter(|reference| tables.is_unspent(reference))
            .filter_map(|reference| {
                tables
                    .outputs
                    .get(reference)
                    .map(|row| tables.unspent(reference, row))
            })
            .collect())
    }

    async fn by_address(&self, address: &str) -> Result<Vec<UnspentOutput>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .outputs
            .iter()
            .filter(|(reference, row)| row.address == address && tables.is_unspent(reference))
            .map(|(reference, row)| tables.unspent(reference, row))
            .collect())
    }
}

#[async_trait]
impl AtomicScope for MemoryLedger {
    async fn within_transaction(&self, work: UnitOfWork<'_>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let mut staged = StagedWrites::default();
        work(&mut staged)?;
        tables.apply(staged)
    }
}
