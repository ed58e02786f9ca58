use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use ledger_core::Block;

use super::error::AppError;
use super::SharedState;

pub(super) async fn create_block(
    State(state): State<SharedState>,
    req: Result<Json<Block>, JsonRejection>,
) -> Result<Json<Block>, AppError> {
    let Json(block) = req.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let committed = state.ledger.create_block(block).await?;
    Ok(Json(committed))
}
