use axum::{
    Router,
    routing::get,
};

use availability_cell::{availability_routes, AvailabilityCellState};
use flow_cell::{flow_routes, FlowCellState};

pub fn create_router(flow: FlowCellState, availability: AvailabilityCellState) -> Router {
    Router::new()
        .route("/", get(|| async { "Booking engine API is running!" }))
        .nest("/flow", flow_routes(flow))
        .nest("/clinics", availability_routes(availability))
}
