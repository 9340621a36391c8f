pub mod models;
pub mod services;

pub use models::{BookingError, BookingRecord};
pub use services::booking::{idempotency_key, BookingService};
