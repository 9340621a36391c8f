use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use clinic_cell::ClinicDirectory;
use shared_models::error::AppError;

use crate::services::slots::SlotFinder;

#[derive(Clone)]
pub struct AvailabilityCellState {
    pub directory: ClinicDirectory,
    pub finder: Arc<SlotFinder>,
}

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub service_id: String,
    pub days: Option<i64>,
}

#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<AvailabilityCellState>,
    Path(clinic_id): Path<String>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Value>, AppError> {
    let clinic = state
        .directory
        .get(&clinic_id)
        .await
        .map_err(|_| AppError::NotFound("Clinic not found".to_string()))?;

    let service = clinic
        .services
        .iter()
        .find(|s| s.id == query.service_id)
        .ok_or_else(|| AppError::NotFound("Service not found".to_string()))?;

    let slots = state
        .finder
        .find_available_slots(&clinic, service, query.days.unwrap_or(14))
        .await;

    let total = slots.len();
    Ok(Json(json!({
        "clinic_id": clinic.clinic_id,
        "service_id": service.id,
        "slots": slots,
        "total": total
    })))
}
