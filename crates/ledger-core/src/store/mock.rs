use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::test_util::dec;
use crate::types::{BlockHeight, OutputRef, UnspentOutput};

use super::{
    AtomicScope, BlockRecord, BlockStore, LedgerSession, TransactionRecord, UnitOfWork,
    UnspentOutputIndex,
};

/// How a mocked operation should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    None,
    Backend,
    Conflict,
    Duplicate,
    Panic,
    Hang,
}

impl Fault {
    async fn trigger(self, operation: &str) -> Result<(), StoreError> {
        match self {
            Fault::None => Ok(()),
            Fault::Backend => Err(StoreError::Backend(format!("{operation} unavailable"))),
            Fault::Conflict => Err(StoreError::Conflict(format!("{operation} conflicted"))),
            Fault::Duplicate => Err(StoreError::Duplicate(format!("{operation} reused an id"))),
            Fault::Panic => panic!("{operation} panicked"),
            Fault::Hang => std::future::pending().await,
        }
    }
}

/// Writes the mock accepted through committed atomic scopes.
#[derive(Debug, Default)]
pub struct Saved {
    pub blocks: Vec<BlockRecord>,
    pub transactions: Vec<TransactionRecord>,
}

/// Number of height and index reads served so far.
#[derive(Clone, Default)]
pub struct ReadCounter(Arc<AtomicUsize>);

impl ReadCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Failure-injecting storage for tests. Serves canned unspent outputs and a
/// fixed height, and records whatever commits through it. Committed writes
/// are not reflected back into the unspent set.
pub struct MockStore {
    height: Mutex<BlockHeight>,
    unspent: BTreeMap<OutputRef, UnspentOutput>,
    saved: Arc<Mutex<Saved>>,
    reads: ReadCounter,
    read_fault: Fault,
    commit_fault: Fault,
    delete_fault: Fault,
}

impl MockStore {
    pub fn builder() -> MockStoreBuilder {
        MockStoreBuilder {
            height: BlockHeight::GENESIS,
            unspent: BTreeMap::new(),
            read_fault: Fault::None,
            commit_fault: Fault::None,
            delete_fault: Fault::None,
        }
    }

    pub fn saved(&self) -> Arc<Mutex<Saved>> {
        self.saved.clone()
    }

    pub fn read_counter(&self) -> ReadCounter {
        self.reads.clone()
    }

    fn height(&self) -> BlockHeight {
        *self.height.lock().expect("mock height lock poisoned")
    }
}

pub struct MockStoreBuilder {
    height: BlockHeight,
    unspent: BTreeMap<OutputRef, UnspentOutput>,
    read_fault: Fault,
    commit_fault: Fault,
    delete_fault: Fault,
}

impl MockStoreBuilder {
    pub fn with_height(mut self, height: u64) -> Self {
        self.height = BlockHeight(height);
        self
    }

    pub fn with_unspent(mut self, tx_id: &str, index: u32, address: &str, value: &str) -> Self {
        let output = UnspentOutput {
            address: address.to_string(),
            value: dec(value),
            tx_id: tx_id.to_string(),
            index,
        };
        self.unspent.insert(output.reference(), output);
        self
    }

    /// Height and index reads fail with a backend error.
    pub fn failing_reads(mut self) -> Self {
        self.read_fault = Fault::Backend;
        self
    }

    /// Atomic scopes run their work and then fail to commit.
    pub fn failing_commit(mut self) -> Self {
        self.commit_fault = Fault::Backend;
        self
    }

    /// Atomic scopes lose a uniqueness race at commit time.
    pub fn conflicting_commit(mut self) -> Self {
        self.commit_fault = Fault::Conflict;
        self
    }

    /// Atomic scopes find a transaction id that is already committed.
    pub fn duplicate_commit(mut self) -> Self {
        self.commit_fault = Fault::Duplicate;
        self
    }

    pub fn failing_delete(mut self) -> Self {
        self.delete_fault = Fault::Backend;
        self
    }

    pub fn panicking_delete(mut self) -> Self {
        self.delete_fault = Fault::Panic;
        self
    }

    /// Deletes never complete.
    pub fn hanging_delete(mut self) -> Self {
        self.delete_fault = Fault::Hang;
        self
    }

    pub fn build(self) -> MockStore {
        MockStore {
            height: Mutex::new(self.height),
            unspent: self.unspent,
            saved: Arc::default(),
            reads: ReadCounter::default(),
            read_fault: self.read_fault,
            commit_fault: self.commit_fault,
            delete_fault: self.delete_fault,
        }
    }
}

#[async_trait]
impl BlockStore for MockStore {
    async fn current_height(&self) -> Result<BlockHeight, StoreError> {
        self.read_fault.trigger("current_height").await?;
        self.reads.bump();
        Ok(self.height())
    }

    async fn delete_after_height(&self, height: BlockHeight) -> Result<u64, StoreError> {
        self.delete_fault.trigger("delete_after_height").await?;
        let mut current = self.height.lock().expect("mock height lock poisoned");
        let removed = current.0.saturating_sub(height.0);
        if removed > 0 {
            *current = height;
        }
        Ok(removed)
    }
}

#[async_trait]
impl UnspentOutputIndex for MockStore {
    async fn resolve(&self, refs: &[OutputRef]) -> Result<Vec<UnspentOutput>, StoreError> {
        self.read_fault.trigger("resolve").await?;
        self.reads.bump();
        let mut found: BTreeMap<&OutputRef, &UnspentOutput> = BTreeMap::new();
        for reference in refs {
            if let Some(output) = self.unspent.get(reference) {
                found.insert(reference, output);
            }
        }
        Ok(found.into_values().cloned().collect())
    }

    async fn by_address(&self, address: &str) -> Result<Vec<UnspentOutput>, StoreError> {
        self.read_fault.trigger("by_address").await?;
        self.reads.bump();
        Ok(self
            .unspent
            .values()
            .filter(|output| output.address == address)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct RecordingSession {
    pending: Saved,
}

impl LedgerSession for RecordingSession {
    fn save_block(&mut self, block: &BlockRecord) -> Result<(), StoreError> {
        self.pending.blocks.push(block.clone());
        Ok(())
    }

    fn save_transactions(&mut self, transactions: &[TransactionRecord]) -> Result<(), StoreError> {
        self.pending.transactions.extend_from_slice(transactions);
        Ok(())
    }
}

#[async_trait]
impl AtomicScope for MockStore {
    async fn within_transaction(&self, work: UnitOfWork<'_>) -> Result<(), StoreError> {
        let mut session = RecordingSession::default();
        work(&mut session)?;
        self.commit_fault.trigger("commit").await?;

        let mut saved = self.saved.lock().expect("mock saved lock poisoned");
        saved.blocks.append(&mut session.pending.blocks);
        saved.transactions.append(&mut session.pending.transactions);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_commit_keeps_nothing() {
        let store = MockStore::builder().failing_commit().build();
        let result = store
            .within_transaction(Box::new(|session: &mut dyn LedgerSession| {
                session.save_block(&BlockRecord {
                    id: "b".into(),
                    height: BlockHeight(2),
                })
            }))
            .await;

        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert!(store.saved().lock().unwrap().blocks.is_empty());
    }

    #[tokio::test]
    async fn delete_lowers_height_once() {
        let store = MockStore::builder().with_height(5).build();
        assert_eq!(store.delete_after_height(BlockHeight(3)).await.unwrap(), 2);
        assert_eq!(store.delete_after_height(BlockHeight(3)).await.unwrap(), 0);
        assert_eq!(store.current_height().await.unwrap(), BlockHeight(3));
    }
}
