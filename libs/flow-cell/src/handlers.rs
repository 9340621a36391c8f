use std::sync::Arc;

use axum::{extract::State, Json};

use resilience_cell::{RateDecision, RateLimiter};
use shared_models::error::AppError;

use crate::models::{TurnOutcome, TurnRequest};
use crate::services::flow::BookingFlowService;

#[derive(Clone)]
pub struct FlowCellState {
    pub flow: Arc<BookingFlowService>,
    pub limiter: Arc<RateLimiter>,
}

#[axum::debug_handler]
pub async fn handle_turn(
    State(state): State<FlowCellState>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnOutcome>, AppError> {
    if request.clinic_id.trim().is_empty() {
        return Err(AppError::BadRequest("clinic_id is required".to_string()));
    }
    if request.patient.phone.trim().is_empty() {
        return Err(AppError::BadRequest("patient.phone is required".to_string()));
    }

    // One bucket per outbound-channel target; an exhausted bucket asks the
    // caller to defer rather than dropping the turn.
    if let RateDecision::Deferred { retry_after } =
        state.limiter.try_acquire(&request.patient.phone).await
    {
        return Err(AppError::RateLimited(format!(
            "too many messages for this conversation, retry in {}s",
            retry_after.as_secs().max(1)
        )));
    }

    let outcome = state.flow.run_turn(request).await;
    Ok(Json(outcome))
}
