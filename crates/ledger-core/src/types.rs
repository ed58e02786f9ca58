//! Domain types for the ledger's UTXO model.
//!
//! Contains the value objects (`Input`, `Output`, `OutputRef`), the
//! `Transaction` entity, the `Block` aggregate, and the read-side shapes
//! returned by the unspent-output index (`UnspentOutput`, `AddressBalance`).
//! Field names on the wire follow the REST API (`txId`, `index`, `value`).

use std::collections::HashSet;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};

/// Exact decimal amount. Never converted through binary floating point.
pub type Amount = Decimal;

/// Write an amount as a JSON number when that number parses back to the same
/// decimal, and as a decimal string otherwise. Deserialization accepts both.
pub fn serialize_amount<S: Serializer>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
    let amount = amount.normalize();
    if amount.scale() == 0 {
        if let Some(whole) = amount.to_i64() {
            return serializer.serialize_i64(whole);
        }
    }
    if let Some(float) = amount.to_f64() {
        if Decimal::from_str(&float.to_string()).ok() == Some(amount) {
            return serializer.serialize_f64(float);
        }
    }
    serializer.collect_str(&amount)
}

// ==============================================================================
// Block Height
// ==============================================================================

/// A ledger block height, wrapped for type safety.
///
/// `#[serde(transparent)]` keeps the JSON representation a bare integer.
/// Height `0` is the sentinel for an empty ledger; genesis is height `1`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BlockHeight(pub u64);

impl BlockHeight {
    pub const EMPTY: BlockHeight = BlockHeight(0);
    pub const GENESIS: BlockHeight = BlockHeight(1);

    #[must_use]
    pub fn next(self) -> BlockHeight {
        BlockHeight(self.0 + 1)
    }
}

impl From<u64> for BlockHeight {
    fn from(h: u64) -> Self {
        Self(h)
    }
}

impl From<BlockHeight> for u64 {
    fn from(h: BlockHeight) -> Self {
        h.0
    }
}

impl std::fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ==============================================================================
// Value Objects
// ==============================================================================

/// Reference to the output at position `index` of transaction `tx_id`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    #[serde(rename = "txId")]
    pub tx_id: String,
    pub index: u32,
}

impl OutputRef {
    pub fn new(tx_id: impl Into<String>, index: u32) -> Self {
        Self {
            tx_id: tx_id.into(),
            index,
        }
    }
}

impl std::fmt::Display for OutputRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.tx_id, self.index)
    }
}

/// A transaction input: points at a prior output and carries no value itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Input {
    #[serde(rename = "txId")]
    pub tx_id: String,
    pub index: u32,
}

impl Input {
    pub fn new(tx_id: impl Into<String>, index: u32) -> Self {
        Self {
            tx_id: tx_id.into(),
            index,
        }
    }

    /// The output this input consumes.
    pub fn prevout(&self) -> OutputRef {
        OutputRef::new(self.tx_id.clone(), self.index)
    }
}

/// A transaction output: `value` paid to `address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub address: String,
    #[serde(serialize_with = "serialize_amount")]
    pub value: Amount,
}

impl Output {
    pub fn new(address: impl Into<String>, value: Amount) -> Self {
        Self {
            address: address.into(),
            value,
        }
    }
}

// ==============================================================================
// Transaction
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    #[serde(default)]
    pub inputs: Vec<Input>,
    #[serde(default)]
    pub outputs: Vec<Output>,
}

impl Transaction {
    pub fn new(id: impl Into<String>, inputs: Vec<Input>, outputs: Vec<Output>) -> Self {
        Self {
            id: id.into(),
            inputs,
            outputs,
        }
    }

    /// References of every output this transaction consumes, in input order.
    pub fn prevouts(&self) -> Vec<OutputRef> {
        self.inputs.iter().map(Input::prevout).collect()
    }

    /// Sum of declared output values, or `None` on overflow.
    pub fn output_total(&self) -> Option<Amount> {
        self.outputs
            .iter()
            .try_fold(Amount::ZERO, |acc, output| acc.checked_add(output.value))
    }
}

// ==============================================================================
// Block
// ==============================================================================

/// A block: an ordered list of transactions at a height, identified by the
/// content hash of that height and the transaction ids (see [`crate::block`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub height: BlockHeight,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(id: impl Into<String>, height: BlockHeight, transactions: Vec<Transaction>) -> Self {
        Self {
            id: id.into(),
            height,
            transactions,
        }
    }

    pub fn transaction_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.transactions.iter().map(|tx| tx.id.as_str())
    }

    /// Number of inputs across every transaction of the block.
    pub fn input_count(&self) -> usize {
        self.transactions.iter().map(|tx| tx.inputs.len()).sum()
    }

    /// First output reference consumed by more than one input of this block,
    /// whether within a single transaction or across transactions.
    pub fn find_duplicate_input(&self) -> Option<OutputRef> {
        let mut seen = HashSet::new();
        self.transactions
            .iter()
            .flat_map(|tx| tx.inputs.iter())
            .map(Input::prevout)
            .find(|prevout| !seen.insert(prevout.clone()))
    }

    /// First transaction id that appears more than once in this block.
    pub fn find_duplicate_transaction_id(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.transactions
            .iter()
            .map(|tx| tx.id.as_str())
            .find(|id| !seen.insert(*id))
    }
}

// ==============================================================================
// Unspent Outputs and Balances
// ==============================================================================

/// An output that no committed input references yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub address: String,
    #[serde(serialize_with = "serialize_amount")]
    pub value: Amount,
    #[serde(rename = "txId")]
    pub tx_id: String,
    pub index: u32,
}

impl UnspentOutput {
    pub fn reference(&self) -> OutputRef {
        OutputRef::new(self.tx_id.clone(), self.index)
    }
}

/// Spendable balance of an address together with the outputs it is made of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBalance {
    pub address: String,
    #[serde(serialize_with = "serialize_amount")]
    pub balance: Amount,
    pub outputs: Vec<UnspentOutput>,
}
