use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use tracing::{debug, warn};

use calendar_cell::{BusyInterval, CalendarApi};
use clinic_cell::{ClinicProfile, Service};
use resilience_cell::RetryExecutor;

use crate::models::TimeSlot;

/// Produces the candidate slots a patient can pick from.
///
/// Generation from business hours alone is pure computation; the only
/// suspension point is the single busy-interval fetch used to reconcile
/// candidates against what is already booked.
pub struct SlotFinder {
    calendar: Arc<dyn CalendarApi>,
    retry: RetryExecutor,
}

impl SlotFinder {
    pub fn new(calendar: Arc<dyn CalendarApi>, retry: RetryExecutor) -> Self {
        Self { calendar, retry }
    }

    pub async fn find_available_slots(
        &self,
        clinic: &ClinicProfile,
        service: &Service,
        horizon_days: i64,
    ) -> Vec<TimeSlot> {
        let now = Utc::now();
        self.find_available_slots_from(clinic, service, now, horizon_days).await
    }

    pub async fn find_available_slots_from(
        &self,
        clinic: &ClinicProfile,
        service: &Service,
        now: DateTime<Utc>,
        horizon_days: i64,
    ) -> Vec<TimeSlot> {
        let candidates = generate_rule_based_slots(clinic, service, now, horizon_days);
        if candidates.is_empty() {
            return candidates;
        }

        let window_start = candidates[0].start;
        let window_end = candidates[candidates.len() - 1].end();

        // One broad fetch for the whole window; per-slot queries would
        // hammer the provider for no benefit.
        let busy = self
            .retry
            .execute("calendar.busy_query", || {
                self.calendar
                    .list_busy_intervals(&clinic.calendar_id, window_start, window_end)
            })
            .await;

        let slots = match busy {
            Ok(busy_intervals) => {
                debug!(
                    "Reconciling {} candidate slots against {} busy intervals for clinic {}",
                    candidates.len(),
                    busy_intervals.len(),
                    clinic.clinic_id
                );
                remove_conflicting(candidates, &busy_intervals)
            }
            Err(e) => {
                // Degrade to rule-based availability rather than refusing to
                // offer appointments while the calendar integration is down.
                warn!(
                    "Busy-interval fetch failed for clinic {}, falling back to rule-based slots: {}",
                    clinic.clinic_id, e
                );
                candidates
            }
        };

        let mut slots = slots;
        slots.truncate(clinic.rules.max_slots);
        slots
    }
}

/// Slot generation from business hours and appointment rules alone.
pub fn generate_rule_based_slots(
    clinic: &ClinicProfile,
    service: &Service,
    now: DateTime<Utc>,
    horizon_days: i64,
) -> Vec<TimeSlot> {
    let rules = &clinic.rules;
    let horizon = horizon_days.min(rules.max_advance_days);
    if horizon <= 0 {
        return Vec::new();
    }

    let window_start = now + Duration::hours(rules.min_advance_hours);
    let window_end = now + Duration::days(horizon);
    if window_start >= window_end {
        return Vec::new();
    }

    let offset = clinic_offset(clinic);
    let duration = Duration::minutes(service.duration_minutes);
    let step = Duration::minutes(service.duration_minutes + rules.spacing_minutes);

    let mut slots = Vec::new();
    let mut day = window_start.with_timezone(&offset).date_naive();
    let last_day = window_end.with_timezone(&offset).date_naive();

    while day <= last_day {
        if let Some(schedule) = clinic.business_hours.for_weekday(day.weekday()) {
            let Some(open) = local_instant(&offset, day, schedule.open) else {
                break;
            };
            let Some(close) = local_instant(&offset, day, schedule.close) else {
                break;
            };
            let break_window = schedule.break_window.as_ref().and_then(|b| {
                Some((local_instant(&offset, day, b.start)?, local_instant(&offset, day, b.end)?))
            });

            let mut current = open;
            while current + duration <= close {
                let slot_end = current + duration;

                // A start whose occupied interval runs into the break is
                // shifted to the break's end instead of merely dropped, so
                // the afternoon grid stays dense.
                if let Some((break_start, break_end)) = break_window {
                    if current < break_end && slot_end > break_start {
                        current = break_end;
                        continue;
                    }
                }

                if current >= window_start && slot_end <= window_end {
                    let slot =
                        TimeSlot::new(current, service.duration_minutes, clinic.utc_offset_minutes);
                    let preferred = rules
                        .preferred_times
                        .as_ref()
                        .map(|times| times.iter().any(|t| t == &slot.time_label))
                        .unwrap_or(true);
                    if preferred {
                        slots.push(slot);
                    }
                }

                current += step;
            }
        }

        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }

    slots
}

fn remove_conflicting(candidates: Vec<TimeSlot>, busy: &[BusyInterval]) -> Vec<TimeSlot> {
    candidates
        .into_iter()
        .filter(|slot| !busy.iter().any(|b| b.overlaps(slot.start, slot.end())))
        .collect()
}

fn clinic_offset(clinic: &ClinicProfile) -> FixedOffset {
    FixedOffset::east_opt(clinic.utc_offset_minutes * 60)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"))
}

fn local_instant(
    offset: &FixedOffset,
    day: NaiveDate,
    time: chrono::NaiveTime,
) -> Option<DateTime<Utc>> {
    offset
        .from_local_datetime(&day.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}
