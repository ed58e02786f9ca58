mod balance;
mod blocks;
mod error;
mod rollback;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use ledger_core::Ledger;

// ==============================================================================
// Application State
// ==============================================================================

pub struct AppState {
    pub ledger: Arc<Ledger>,
}

type SharedState = Arc<AppState>;

// ==============================================================================
// Router
// ==============================================================================

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/blocks", post(blocks::create_block))
        .route("/rollback", post(rollback::rollback))
        .route("/balance/{address}", get(balance::get_balance))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn not_found() -> error::AppError {
    error::AppError::NotFound("route not found".to_string())
}
