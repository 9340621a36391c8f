use std::fmt;

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ==============================================================================
// SERVICE CATALOGUE
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Consultation,
    Exam,
    Procedure,
}

impl ServiceCategory {
    /// Keyword patients actually type when referring to the category.
    pub fn keyword(&self) -> &'static str {
        match self {
            ServiceCategory::Consultation => "consulta",
            ServiceCategory::Exam => "exame",
            ServiceCategory::Procedure => "procedimento",
        }
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceCategory::Consultation => write!(f, "consultation"),
            ServiceCategory::Exam => write!(f, "exam"),
            ServiceCategory::Procedure => write!(f, "procedure"),
        }
    }
}

/// A bookable offering, immutable once snapshotted at flow start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub category: ServiceCategory,
    pub duration_minutes: i64,
    pub price: Option<f64>,
    pub description: Option<String>,
}

// ==============================================================================
// BUSINESS HOURS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaySchedule {
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub break_window: Option<BreakWindow>,
}

/// Per-weekday opening configuration; an absent day is closed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BusinessHours {
    pub monday: Option<DaySchedule>,
    pub tuesday: Option<DaySchedule>,
    pub wednesday: Option<DaySchedule>,
    pub thursday: Option<DaySchedule>,
    pub friday: Option<DaySchedule>,
    pub saturday: Option<DaySchedule>,
    pub sunday: Option<DaySchedule>,
}

impl BusinessHours {
    pub fn for_weekday(&self, weekday: Weekday) -> Option<&DaySchedule> {
        match weekday {
            Weekday::Mon => self.monday.as_ref(),
            Weekday::Tue => self.tuesday.as_ref(),
            Weekday::Wed => self.wednesday.as_ref(),
            Weekday::Thu => self.thursday.as_ref(),
            Weekday::Fri => self.friday.as_ref(),
            Weekday::Sat => self.saturday.as_ref(),
            Weekday::Sun => self.sunday.as_ref(),
        }
    }

    /// Same schedule Monday through Friday, weekend closed.
    pub fn weekdays(schedule: DaySchedule) -> Self {
        Self {
            monday: Some(schedule.clone()),
            tuesday: Some(schedule.clone()),
            wednesday: Some(schedule.clone()),
            thursday: Some(schedule.clone()),
            friday: Some(schedule),
            saturday: None,
            sunday: None,
        }
    }
}

// ==============================================================================
// APPOINTMENT RULES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppointmentRules {
    pub min_advance_hours: i64,
    pub max_advance_days: i64,
    pub spacing_minutes: i64,
    /// "HH:MM" whitelist of acceptable start times; `None` accepts all.
    pub preferred_times: Option<Vec<String>>,
    pub max_slots: usize,
}

impl Default for AppointmentRules {
    fn default() -> Self {
        Self {
            min_advance_hours: 2,
            max_advance_days: 30,
            spacing_minutes: 10,
            preferred_times: None,
            max_slots: 6,
        }
    }
}

// ==============================================================================
// CLINIC PROFILE
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClinicProfile {
    pub clinic_id: String,
    pub name: String,
    pub timezone: String,
    /// Offset applied when rendering instants for the patient.
    pub utc_offset_minutes: i32,
    pub contact_phone: String,
    pub calendar_id: String,
    /// Catalogue in configured order; ordering is a meaningful tie-break
    /// during service matching.
    pub services: Vec<Service>,
    pub business_hours: BusinessHours,
    pub rules: AppointmentRules,
}

#[derive(Debug, Error)]
pub enum ClinicError {
    #[error("clinic not found: {0}")]
    NotFound(String),

    #[error("invalid clinic configuration: {0}")]
    InvalidConfig(String),
}
