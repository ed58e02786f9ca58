use std::sync::Arc;

use tracing::debug;

use crate::error::LedgerError;
use crate::store::UnspentOutputIndex;
use crate::types::{AddressBalance, Amount};

/// Reports what an address can currently spend.
pub struct BalanceQuery {
    index: Arc<dyn UnspentOutputIndex>,
}

impl BalanceQuery {
    pub fn new(index: Arc<dyn UnspentOutputIndex>) -> Self {
        Self { index }
    }

    /// Sum of the unspent outputs owned by `address`, with the outputs
    /// themselves. An unknown address has a zero balance.
    pub async fn execute(&self, address: &str) -> Result<AddressBalance, LedgerError> {
        let outputs = self.index.by_address(address).await?;
        let balance = outputs
            .iter()
            .try_fold(Amount::ZERO, |acc, output| acc.checked_add(output.value))
            .ok_or_else(|| LedgerError::Unexpected(format!("balance of {address} overflows")))?;

        debug!(address, %balance, outputs = outputs.len(), "balance computed");
        Ok(AddressBalance {
            address: address.to_string(),
            balance,
            outputs,
        })
    }
}
