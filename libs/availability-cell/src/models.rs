use std::hash::{Hash, Hasher};

use chrono::{DateTime, Datelike, Duration, FixedOffset, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// A candidate or chosen appointment time.
///
/// Identity is the start instant plus duration; the display labels are
/// derived for the patient's benefit and carry no authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub duration_minutes: i64,
    pub date_label: String,
    pub time_label: String,
    pub available: bool,
}

impl TimeSlot {
    pub fn new(start: DateTime<Utc>, duration_minutes: i64, utc_offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
        let local = start.with_timezone(&offset);

        Self {
            start,
            duration_minutes,
            date_label: format!("{}, {}", weekday_label(local.weekday()), local.format("%d/%m")),
            time_label: local.format("%H:%M").to_string(),
            available: true,
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::minutes(self.duration_minutes)
    }
}

impl PartialEq for TimeSlot {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.duration_minutes == other.duration_minutes
    }
}

impl Eq for TimeSlot {}

impl Hash for TimeSlot {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.start.hash(state);
        self.duration_minutes.hash(state);
    }
}

fn weekday_label(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "segunda-feira",
        Weekday::Tue => "terça-feira",
        Weekday::Wed => "quarta-feira",
        Weekday::Thu => "quinta-feira",
        Weekday::Fri => "sexta-feira",
        Weekday::Sat => "sábado",
        Weekday::Sun => "domingo",
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn labels_are_rendered_in_the_clinic_offset() {
        // 13:30 UTC is 10:30 in São Paulo (-03:00).
        let start = Utc.with_ymd_and_hms(2026, 3, 10, 13, 30, 0).unwrap();
        let slot = TimeSlot::new(start, 30, -180);

        assert_eq!(slot.time_label, "10:30");
        assert_eq!(slot.date_label, "terça-feira, 10/03");
    }

    #[test]
    fn identity_ignores_display_labels() {
        let start = Utc.with_ymd_and_hms(2026, 3, 10, 13, 30, 0).unwrap();
        let a = TimeSlot::new(start, 30, -180);
        let b = TimeSlot::new(start, 30, 0);

        assert_eq!(a, b);
        assert_ne!(a, TimeSlot::new(start, 45, -180));
    }
}
