use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use availability_cell::TimeSlot;
use clinic_cell::Service;
use shared_models::PatientProfile;

/// The committed result of a booking flow. Immutable after commit except
/// for the cancellation marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRecord {
    pub clinic_id: String,
    pub service: Service,
    pub slot: TimeSlot,
    pub patient: PatientProfile,
    pub idempotency_key: String,
    pub event_id: String,
    pub event_link: Option<String>,
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum BookingError {
    /// Another appointment occupies the slot. Never retried blindly; the
    /// caller must re-run slot discovery.
    #[error("slot is already taken by another appointment")]
    SlotTaken,

    #[error("calendar unavailable after {attempts} attempts: {message}")]
    CalendarUnavailable { attempts: u32, message: String },

    #[error("calendar rejected the booking: {0}")]
    CalendarRejected(String),

    #[error("booking is already cancelled")]
    AlreadyCancelled,
}
