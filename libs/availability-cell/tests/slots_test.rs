use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};

use availability_cell::{generate_rule_based_slots, SlotFinder};
use calendar_cell::test_support::InMemoryCalendar;
use calendar_cell::BusyInterval;
use clinic_cell::{
    AppointmentRules, BreakWindow, BusinessHours, ClinicProfile, DaySchedule, Service,
    ServiceCategory,
};
use resilience_cell::{RetryExecutor, RetryPolicy};

const OFFSET_MINUTES: i32 = -180; // São Paulo

fn hm(hour: u32, min: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, min, 0).unwrap()
}

fn schedule() -> DaySchedule {
    DaySchedule {
        open: hm(9, 0),
        close: hm(18, 0),
        break_window: Some(BreakWindow {
            start: hm(12, 0),
            end: hm(13, 0),
        }),
    }
}

fn clinic() -> ClinicProfile {
    ClinicProfile {
        clinic_id: "clinic-1".to_string(),
        name: "Clínica Boa Vista".to_string(),
        timezone: "America/Sao_Paulo".to_string(),
        utc_offset_minutes: OFFSET_MINUTES,
        contact_phone: "+55 11 4000-1000".to_string(),
        calendar_id: "cal-1".to_string(),
        services: vec![consultation()],
        business_hours: BusinessHours::weekdays(schedule()),
        rules: AppointmentRules {
            min_advance_hours: 2,
            max_advance_days: 30,
            spacing_minutes: 10,
            preferred_times: None,
            max_slots: 50,
        },
    }
}

fn consultation() -> Service {
    Service {
        id: "c1".to_string(),
        name: "Consulta Geral".to_string(),
        category: ServiceCategory::Consultation,
        duration_minutes: 30,
        price: Some(150.0),
        description: None,
    }
}

/// Monday 2026-03-09, 09:00 local (12:00 UTC).
fn monday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap()
}

fn local(slot_start: DateTime<Utc>) -> chrono::DateTime<FixedOffset> {
    slot_start.with_timezone(&FixedOffset::east_opt(OFFSET_MINUTES * 60).unwrap())
}

fn fast_retry() -> RetryExecutor {
    RetryExecutor::new(RetryPolicy {
        max_attempts: 3,
        base_delay: StdDuration::from_millis(1),
        multiplier: 2.0,
        max_delay: StdDuration::from_millis(4),
    })
}

#[test]
fn generated_slots_respect_every_booking_rule() {
    let clinic = clinic();
    let service = consultation();
    let now = monday_morning();

    let slots = generate_rule_based_slots(&clinic, &service, now, 7);
    assert!(!slots.is_empty());

    let min_start = now + Duration::hours(clinic.rules.min_advance_hours);
    let max_end = now + Duration::days(7);

    for slot in &slots {
        assert!(slot.start >= min_start, "slot {} violates the advance lead", slot.start);
        assert!(slot.end() <= max_end, "slot {} exceeds the horizon", slot.start);
        assert_eq!(slot.duration_minutes, service.duration_minutes);

        let start_local = local(slot.start);
        let end_local = local(slot.end());
        assert!(start_local.time() >= hm(9, 0));
        assert!(end_local.time() <= hm(18, 0));

        // Entirely outside the lunch break.
        let intersects_break =
            start_local.time() < hm(13, 0) && end_local.time() > hm(12, 0);
        assert!(!intersects_break, "slot {} overlaps the break", start_local);
    }
}

#[test]
fn starts_inside_the_break_shift_to_its_end() {
    let mut clinic = clinic();
    clinic.rules.spacing_minutes = 0;
    let service = consultation();

    let slots = generate_rule_based_slots(&clinic, &service, monday_morning(), 1);
    let times: Vec<String> = slots.iter().map(|s| s.time_label.clone()).collect();

    // The 11:30 start still fits before the break; the 12:00 start is
    // shifted to 13:00 rather than dropped.
    assert!(times.contains(&"11:30".to_string()));
    assert!(!times.iter().any(|t| t.as_str() >= "12:00" && t.as_str() < "13:00"));
    assert!(times.contains(&"13:00".to_string()));
}

#[test]
fn closed_days_produce_no_slots() {
    let mut clinic = clinic();
    clinic.business_hours = BusinessHours::default();

    let slots = generate_rule_based_slots(&clinic, &consultation(), monday_morning(), 7);
    assert!(slots.is_empty());
}

#[test]
fn preferred_time_whitelist_filters_everything_else() {
    let mut clinic = clinic();
    clinic.rules.preferred_times = Some(vec!["09:00".to_string(), "14:20".to_string()]);

    let slots = generate_rule_based_slots(&clinic, &consultation(), monday_morning(), 3);

    assert!(!slots.is_empty());
    for slot in &slots {
        assert!(
            slot.time_label == "09:00" || slot.time_label == "14:20",
            "unexpected slot time {}",
            slot.time_label
        );
    }
}

#[test]
fn horizon_is_capped_by_the_clinic_rules() {
    let mut clinic = clinic();
    clinic.rules.max_advance_days = 2;
    let now = monday_morning();

    let slots = generate_rule_based_slots(&clinic, &consultation(), now, 30);
    let max_end = now + Duration::days(2);

    assert!(slots.iter().all(|s| s.end() <= max_end));
}

#[tokio::test]
async fn busy_intervals_remove_conflicting_slots() {
    let calendar = Arc::new(InMemoryCalendar::new());
    // Monday 11:00-11:30 local is 14:00-14:30 UTC — the first offerable slot.
    let busy_start = Utc.with_ymd_and_hms(2026, 3, 9, 14, 0, 0).unwrap();
    let busy_end = Utc.with_ymd_and_hms(2026, 3, 9, 14, 30, 0).unwrap();
    calendar
        .push_busy(BusyInterval {
            start: busy_start,
            end: busy_end,
            event_id: None,
            idempotency_key: None,
        })
        .await;

    let finder = SlotFinder::new(calendar.clone(), fast_retry());
    let clinic = clinic();

    let with_conflict = finder
        .find_available_slots_from(&clinic, &consultation(), monday_morning(), 1)
        .await;

    assert!(!with_conflict.is_empty());
    assert!(
        !with_conflict.iter().any(|s| s.time_label == "11:00"),
        "the occupied 11:00 slot must not be offered"
    );
    for slot in &with_conflict {
        assert!(
            !(slot.start < busy_end && slot.end() > busy_start),
            "slot {} overlaps the busy interval",
            slot.start
        );
    }
    assert_eq!(calendar.busy_query_count().await, 1);
}

#[tokio::test]
async fn calendar_outage_degrades_to_rule_based_slots() {
    let calendar = Arc::new(InMemoryCalendar::new());
    calendar.fail_next_busy_queries(10).await;

    let finder = SlotFinder::new(calendar.clone(), fast_retry());
    let clinic = clinic();

    let slots = finder
        .find_available_slots_from(&clinic, &consultation(), monday_morning(), 1)
        .await;

    // Degraded, not empty: the rule-based grid is still offered.
    assert!(!slots.is_empty());
    // The retry budget was spent before giving up.
    assert_eq!(calendar.busy_query_count().await, 3);
}

#[tokio::test]
async fn results_are_chronological_and_truncated() {
    let calendar = Arc::new(InMemoryCalendar::new());
    let finder = SlotFinder::new(calendar, fast_retry());
    let mut clinic = clinic();
    clinic.rules.max_slots = 4;

    let slots = finder
        .find_available_slots_from(&clinic, &consultation(), monday_morning(), 7)
        .await;

    assert_eq!(slots.len(), 4);
    for pair in slots.windows(2) {
        assert!(pair[0].start < pair[1].start);
    }
}
