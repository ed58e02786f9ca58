//! Block identity and height sequencing.
//!
//! A block's id is the lowercase hex SHA-256 of its height and transaction
//! ids joined with `|`, in block order. Sequencing requires each block to
//! sit exactly one above the current tip.

use sha2::{Digest, Sha256};

use crate::error::StoreError;
use crate::store::BlockStore;
use crate::types::{Block, BlockHeight};

/// Result of recomputing a block's content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityCheck {
    pub valid: bool,
    pub computed_hash: String,
}

/// Result of comparing a block's height with the ledger tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCheck {
    pub valid: bool,
    pub current_height: BlockHeight,
}

/// Content hash over `height|tx_1|...|tx_n`.
pub fn compute_hash<'a, I>(height: BlockHeight, transaction_ids: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut preimage = height.to_string();
    for id in transaction_ids {
        preimage.push('|');
        preimage.push_str(id);
    }
    hex::encode(Sha256::digest(preimage.as_bytes()))
}

impl Block {
    /// Recompute the content hash and compare it to the declared id.
    pub fn verify_identity(&self) -> IdentityCheck {
        let computed_hash = compute_hash(self.height, self.transaction_ids());
        IdentityCheck {
            valid: computed_hash == self.id,
            computed_hash,
        }
    }

    pub fn check_sequencing(&self, current_height: BlockHeight) -> SequenceCheck {
        SequenceCheck {
            valid: self.height == current_height.next(),
            current_height,
        }
    }

    /// Point-in-time sequencing check against the store's tip. Takes no lock.
    pub async fn check_height(&self, blocks: &dyn BlockStore) -> Result<SequenceCheck, StoreError> {
        let current_height = blocks.current_height().await?;
        Ok(self.check_sequencing(current_height))
    }
}
