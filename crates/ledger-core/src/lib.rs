pub mod balance;
pub mod block;
pub mod create_block;
pub mod error;
pub mod kv;
pub mod ledger;
pub mod lock;
pub mod rollback;
pub mod store;
pub mod types;
pub mod validator;

#[cfg(test)]
pub(crate) mod test_util;

pub use error::{LedgerError, StoreError};
pub use ledger::{seed_genesis, Genesis, Ledger};
pub use rollback::RollbackOutcome;
pub use store::{MemoryLedger, SqliteLedger};
pub use types::{AddressBalance, Amount, Block, BlockHeight, Transaction};
