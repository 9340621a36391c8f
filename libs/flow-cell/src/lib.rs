pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use handlers::FlowCellState;
pub use models::{
    ConfirmationReply, FlowData, FlowState, FlowStep, Intent, IntentKind, OutcomeMetadata,
    ResponseKind, ResponsePayload, TurnOutcome, TurnRequest,
};
pub use router::flow_routes;
pub use services::flow::BookingFlowService;
pub use services::store::{
    FlowStateStore, InMemoryFlowStateStore, RedisFlowStateStore, ResilientStateStore, StoreError,
};
