//! UTXO balance validation for a single transaction.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::StoreError;
use crate::store::UnspentOutputIndex;
use crate::types::{Amount, Transaction};

/// Outcome of validating one transaction. `reason` is set when invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxValidation {
    pub valid: bool,
    pub reason: Option<String>,
}

impl TxValidation {
    pub fn accepted() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

#[async_trait]
pub trait TransactionValidator: Send + Sync {
    /// Read-only check of `transaction` against the current UTXO set.
    /// `Err` is reserved for collaborator failures; rule violations come back
    /// as an invalid [`TxValidation`].
    async fn validate(&self, transaction: &Transaction) -> Result<TxValidation, StoreError>;
}

impl Transaction {
    pub async fn validate(
        &self,
        validator: &dyn TransactionValidator,
    ) -> Result<TxValidation, StoreError> {
        let result = validator.validate(self).await?;
        if !result.valid {
            debug!(
                tx_id = %self.id,
                reason = result.reason.as_deref().unwrap_or_default(),
                "transaction is invalid"
            );
        }
        Ok(result)
    }
}

/// Validates that every input resolves to an unspent output and that the
/// resolved amounts equal the declared outputs exactly.
pub struct UtxoTransactionValidator {
    index: Arc<dyn UnspentOutputIndex>,
}

impl UtxoTransactionValidator {
    pub fn new(index: Arc<dyn UnspentOutputIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl TransactionValidator for UtxoTransactionValidator {
    async fn validate(&self, transaction: &Transaction) -> Result<TxValidation, StoreError> {
        if let Some(position) = transaction
            .outputs
            .iter()
            .position(|output| output.value.is_sign_negative() && !output.value.is_zero())
        {
            return Ok(TxValidation::rejected(format!(
                "output {position} has a negative amount"
            )));
        }

        let references = transaction.prevouts();
        let unspent = self.index.resolve(&references).await?;
        if unspent.len() < references.len() {
            return Ok(TxValidation::rejected(
                "inputs not found in unspent outputs",
            ));
        }

        let Some(unspent_total) = unspent
            .iter()
            .try_fold(Amount::ZERO, |acc, output| acc.checked_add(output.value))
        else {
            return Ok(TxValidation::rejected("input amounts overflow"));
        };
        let Some(spend_total) = transaction.output_total() else {
            return Ok(TxValidation::rejected("output amounts overflow"));
        };

        if unspent_total != spend_total {
            return Ok(TxValidation::rejected(format!(
                "balance is not equal, unspent balance: {unspent_total}, to spend balance: {spend_total}"
            )));
        }
        Ok(TxValidation::accepted())
    }
}
