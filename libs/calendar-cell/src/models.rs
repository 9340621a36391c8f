use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use resilience_cell::Retryable;

// ==============================================================================
// WIRE MODELS
// ==============================================================================

/// One occupied interval on a clinic calendar.
///
/// The provider echoes back the private metadata of events it owns, which is
/// how a duplicate commit attempt recognizes its own earlier event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl BusyInterval {
    /// Half-open interval overlap: `[start, end)` against `[other_start, other_end)`.
    pub fn overlaps(&self, other_start: DateTime<Utc>, other_end: DateTime<Utc>) -> bool {
        other_start < self.end && other_end > self.start
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAttendee {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventReminder {
    pub minutes_before: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCalendarEvent {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub summary: String,
    pub description: String,
    pub attendees: Vec<EventAttendee>,
    pub reminders: Vec<EventReminder>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedEvent {
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_link: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusyQueryResponse {
    pub intervals: Vec<BusyInterval>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar authentication failed: {0}")]
    Auth(String),

    #[error("calendar or event not found: {0}")]
    NotFound(String),

    #[error("calendar rejected the request as conflicting: {0}")]
    Conflict(String),

    #[error("calendar rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("calendar provider unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("calendar API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("calendar network error: {0}")]
    Network(String),

    #[error("calendar response could not be decoded: {0}")]
    Decode(String),
}

impl Retryable for CalendarError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            CalendarError::Network(_)
                | CalendarError::RateLimited(_)
                | CalendarError::Unavailable { .. }
        )
    }
}

impl From<reqwest::Error> for CalendarError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            CalendarError::Decode(e.to_string())
        } else {
            // Timeouts, connection resets and DNS failures all land here.
            CalendarError::Network(e.to_string())
        }
    }
}
