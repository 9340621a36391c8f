use axum::{routing::get, Router};

use crate::handlers::{self, AvailabilityCellState};

pub fn availability_routes(state: AvailabilityCellState) -> Router {
    Router::new()
        .route("/{clinic_id}/available-slots", get(handlers::get_available_slots))
        .with_state(state)
}
