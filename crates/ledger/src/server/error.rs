use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use ledger_core::LedgerError;

// ==============================================================================
// Error Type
// ==============================================================================

pub(crate) enum AppError {
    BadRequest(String),
    NotFound(String),
    Ledger(LedgerError),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        Self::Ledger(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            Self::Ledger(err) => {
                let status = ledger_status(&err);
                let message = match &err {
                    LedgerError::Unexpected(detail) => {
                        tracing::error!(%detail, "request failed unexpectedly");
                        "internal server error".to_string()
                    }
                    other => other.to_string(),
                };
                (status, err.code(), message)
            }
        };

        (
            status,
            Json(serde_json::json!({ "code": code, "error": message })),
        )
            .into_response()
    }
}

fn ledger_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::CommitConflict(_) => StatusCode::CONFLICT,
        LedgerError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        LedgerError::RollbackInProgress
        | LedgerError::MinOneInputTransaction
        | LedgerError::InvalidBlockSignature { .. }
        | LedgerError::InvalidHeight { .. }
        | LedgerError::TransactionInputNotValid { .. }
        | LedgerError::DuplicateTransaction(_)
        | LedgerError::InvalidTransactions { .. }
        | LedgerError::RollbackAlreadyLocked => StatusCode::BAD_REQUEST,
    }
}
