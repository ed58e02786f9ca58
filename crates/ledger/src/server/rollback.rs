use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use ledger_core::{BlockHeight, RollbackOutcome};

use super::error::AppError;
use super::SharedState;

#[derive(Deserialize)]
pub(super) struct RollbackQuery {
    height: u64,
}

pub(super) async fn rollback(
    State(state): State<SharedState>,
    query: Result<Query<RollbackQuery>, QueryRejection>,
) -> Result<Json<RollbackOutcome>, AppError> {
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let outcome = state.ledger.rollback(BlockHeight(query.height)).await?;
    Ok(Json(outcome))
}
