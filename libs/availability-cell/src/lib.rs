pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use handlers::AvailabilityCellState;
pub use models::TimeSlot;
pub use router::availability_routes;
pub use services::slots::{generate_rule_based_slots, SlotFinder};
