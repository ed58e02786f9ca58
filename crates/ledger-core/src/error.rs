use crate::types::{BlockHeight, OutputRef};

/// Failure reported by a storage or key-value collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness or referential constraint rejected the write because a
    /// concurrent commit got there first.
    #[error("constraint violated: {0}")]
    Conflict(String),

    /// The write reuses the identity of a record that is already committed.
    #[error("record already exists: {0}")]
    Duplicate(String),

    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error(transparent)]
    Sqlite(rusqlite::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &err {
            if failure.code == rusqlite::ErrorCode::ConstraintViolation {
                let message = message.clone().unwrap_or_else(|| failure.to_string());
                // Block and transaction ids are primary keys; every race the
                // writer can lose is on a UNIQUE or FOREIGN KEY constraint.
                if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY {
                    return StoreError::Duplicate(message);
                }
                return StoreError::Conflict(message);
            }
        }
        StoreError::Sqlite(err)
    }
}

/// Domain rejections raised by the ledger coordinators. Every variant has a
/// stable machine-readable [`code`](LedgerError::code).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("chain is being rolled back")]
    RollbackInProgress,

    #[error("min one input transaction is required")]
    MinOneInputTransaction,

    #[error("invalid block, computed hash: {computed_hash}")]
    InvalidBlockSignature { computed_hash: String },

    #[error("invalid height, current height: {current_height}")]
    InvalidHeight { current_height: BlockHeight },

    #[error("output {reference} is spent more than once in the block")]
    TransactionInputNotValid { reference: OutputRef },

    #[error("duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("invalid transactions: {reason}")]
    InvalidTransactions { reason: String },

    #[error("block conflicts with a concurrent commit, retry: {0}")]
    CommitConflict(String),

    #[error("chain is already being rolled back")]
    RollbackAlreadyLocked,

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::RollbackInProgress => "ROLLBACK_IN_PROGRESS",
            Self::MinOneInputTransaction => "MIN_ONE_INPUT_TRANSACTION",
            Self::InvalidBlockSignature { .. } => "INVALID_BLOCK_SIGNATURE",
            Self::InvalidHeight { .. } => "INVALID_HEIGHT",
            Self::TransactionInputNotValid { .. } => "TRANSACTION_INPUT_NOT_VALID",
            Self::DuplicateTransaction(_) => "DUPLICATE_TRANSACTION",
            Self::InvalidTransactions { .. } => "INVALID_TRANSACTIONS",
            Self::CommitConflict(_) => "COMMIT_CONFLICT",
            Self::RollbackAlreadyLocked => "ROLLBACK_ALREADY_LOCKED",
            Self::Unexpected(_) => "UNEXPECTED_ERROR",
        }
    }

    /// Whether the same request may succeed if simply sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CommitConflict(_) | Self::RollbackInProgress)
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(message) => LedgerError::CommitConflict(message),
            StoreError::Duplicate(message) => LedgerError::DuplicateTransaction(message),
            other => LedgerError::Unexpected(other.to_string()),
        }
    }
}
