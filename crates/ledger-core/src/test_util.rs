//! Shared test helpers for `ledger-core` unit tests.
//!
//! Builders for domain values (`input`, `output`, `tx`, `block_at`) and a
//! genesis-seeded in-memory ledger, so that tests across modules share one
//! source of truth for fixture construction.

use std::str::FromStr;
use std::sync::Arc;

use crate::block::compute_hash;
use crate::ledger::{seed_genesis, Genesis};
use crate::lock::RollbackLock;
use crate::store::MemoryLedger;
use crate::types::{Amount, Block, BlockHeight, Input, Output, Transaction};

// ==============================================================================
// Value Builders
// ==============================================================================

/// Parse a decimal literal. Panics on malformed input, which only happens in
/// a broken fixture.
pub fn dec(literal: &str) -> Amount {
    Amount::from_str(literal).expect("test decimal literal must parse")
}

pub fn input(tx_id: &str, index: u32) -> Input {
    Input::new(tx_id, index)
}

pub fn output(address: &str, value: &str) -> Output {
    Output::new(address, dec(value))
}

pub fn tx(id: &str, inputs: Vec<Input>, outputs: Vec<Output>) -> Transaction {
    Transaction::new(id, inputs, outputs)
}

/// Build a block at `height` whose id is the correct content hash.
pub fn block_at(height: u64, transactions: Vec<Transaction>) -> Block {
    let height = BlockHeight(height);
    let id = compute_hash(height, transactions.iter().map(|tx| tx.id.as_str()));
    Block::new(id, height, transactions)
}

/// The standard second block: genesis sends 90000 to `addr1` and keeps 10000.
pub fn block_two() -> Block {
    block_at(
        2,
        vec![tx(
            "tx2",
            vec![input("1", 0)],
            vec![output("addr1", "90000"), output("genesis", "10000")],
        )],
    )
}

// ==============================================================================
// Ledger Fixtures
// ==============================================================================

/// An in-memory ledger holding only the default genesis block
/// (100000 paid to `genesis` by transaction `1`).
pub async fn genesis_ledger() -> Arc<MemoryLedger> {
    let ledger = Arc::new(MemoryLedger::new());
    seed_genesis(&*ledger, &Genesis::default())
        .await
        .expect("seeding an empty ledger must succeed");
    ledger
}

/// Yield until a background lock release lands.
pub async fn wait_until_unlocked(lock: &dyn RollbackLock) {
    for _ in 0..100 {
        if !lock.is_locked().await.expect("lock state must be readable") {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("rollback lock still held");
}
