use axum::extract::{Path, State};
use axum::Json;

use ledger_core::AddressBalance;

use super::error::AppError;
use super::SharedState;

pub(super) async fn get_balance(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> Result<Json<AddressBalance>, AppError> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("address must not be empty".to_string()));
    }
    Ok(Json(state.ledger.balance(trimmed).await?))
}
