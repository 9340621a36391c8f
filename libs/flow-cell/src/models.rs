use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use availability_cell::TimeSlot;
use booking_cell::BookingRecord;
use clinic_cell::Service;
use shared_models::PatientProfile;

// ==============================================================================
// FLOW STATE
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowStep {
    Initial,
    ServiceSelection,
    DateTimeSelection,
    Confirmation,
    Completed,
    Cancelled,
    Escalated,
    Error,
    Reset,
    /// Intent the engine does not handle; the caller should escalate and
    /// leave any stored state untouched.
    Unsupported,
}

impl FlowStep {
    /// Terminal steps are never persisted; reaching one deletes the
    /// conversation's stored state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowStep::Completed
                | FlowStep::Cancelled
                | FlowStep::Escalated
                | FlowStep::Error
                | FlowStep::Reset
        )
    }
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowStep::Initial => "initial",
            FlowStep::ServiceSelection => "service_selection",
            FlowStep::DateTimeSelection => "date_time_selection",
            FlowStep::Confirmation => "confirmation",
            FlowStep::Completed => "completed",
            FlowStep::Cancelled => "cancelled",
            FlowStep::Escalated => "escalated",
            FlowStep::Error => "error",
            FlowStep::Reset => "reset",
            FlowStep::Unsupported => "unsupported",
        };
        write!(f, "{}", s)
    }
}

/// Everything the conversation has accumulated so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowData {
    pub service: Option<Service>,
    pub offered_slots: Vec<TimeSlot>,
    pub selected_slot: Option<TimeSlot>,
    pub additional_info: Option<String>,
}

/// One active booking conversation, owned exclusively by one conversation
/// key (the patient phone number).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowState {
    pub step: FlowStep,
    pub data: FlowData,
    /// Consecutive unrecognized inputs in the current step; resets on every
    /// successful transition.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub error_history: Vec<String>,
}

impl FlowState {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            step: FlowStep::Initial,
            data: FlowData::default(),
            attempts: 0,
            created_at: now,
            last_update: now,
            error_history: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_update = Utc::now();
    }

    pub fn advance(&mut self, step: FlowStep) {
        self.step = step;
        self.attempts = 0;
        self.touch();
    }

    /// Records one unrecognized input and answers the new attempt count.
    pub fn register_failed_attempt(&mut self, detail: impl Into<String>) -> u32 {
        self.attempts += 1;
        self.error_history.push(detail.into());
        self.touch();
        self.attempts
    }
}

impl Default for FlowState {
    fn default() -> Self {
        Self::new()
    }
}

// ==============================================================================
// TURN CONTRACT
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum IntentKind {
    Create,
    Reschedule,
    Cancel,
    List,
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntentKind::Create => "CREATE",
            IntentKind::Reschedule => "RESCHEDULE",
            IntentKind::Cancel => "CANCEL",
            IntentKind::List => "LIST",
        };
        write!(f, "{}", s)
    }
}

/// Classified intent supplied by the NLU collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub kind: IntentKind,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub clinic_id: String,
    pub patient: PatientProfile,
    pub intent: Intent,
    pub message: String,
    /// Short conversation history, read-only context for the caller's
    /// response generation; the engine itself does not consume it.
    #[serde(default)]
    pub history: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    ServiceList,
    SlotList,
    ConfirmationSummary,
    Success,
    Failure,
    Escalation,
    Info,
}

/// Structured reply for the messaging layer to relay (after whatever
/// humanization it applies).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub kind: ResponseKind,
    pub message: String,
    /// Numbered choices, populated when `kind` is a listing.
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeMetadata {
    /// Drives the caller's persist / clear / leave-untouched decision.
    pub flow_step: FlowStep,
    pub requires_human_intervention: bool,
    pub error_tag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub response: ResponsePayload,
    pub intent: String,
    pub tools_used: Vec<String>,
    pub metadata: OutcomeMetadata,
    pub booking: Option<BookingRecord>,
}

/// How a message in the confirmation step was understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationReply {
    Affirmative,
    Negative,
    Unclear,
}
