use axum::{routing::post, Router};

use crate::handlers::{self, FlowCellState};

pub fn flow_routes(state: FlowCellState) -> Router {
    Router::new()
        .route("/turn", post(handlers::handle_turn))
        .with_state(state)
}
