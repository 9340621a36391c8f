use std::sync::Arc;
use std::time::Duration as StdDuration;

use assert_matches::assert_matches;

use availability_cell::SlotFinder;
use booking_cell::BookingService;
use calendar_cell::test_support::InMemoryCalendar;
use calendar_cell::BusyInterval;
use chrono::NaiveTime;
use clinic_cell::{
    AppointmentRules, BreakWindow, BusinessHours, ClinicDirectory, ClinicProfile, DaySchedule,
    Service, ServiceCategory,
};
use flow_cell::{
    BookingFlowService, FlowStateStore, FlowStep, InMemoryFlowStateStore, Intent, IntentKind,
    ResponseKind, TurnRequest,
};
use resilience_cell::{RetryExecutor, RetryPolicy};
use shared_models::PatientProfile;

const PHONE: &str = "5511990000000";

fn hm(hour: u32, min: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, min, 0).unwrap()
}

fn all_week_hours() -> BusinessHours {
    let schedule = DaySchedule {
        open: hm(8, 0),
        close: hm(20, 0),
        break_window: Some(BreakWindow {
            start: hm(12, 0),
            end: hm(13, 0),
        }),
    };
    BusinessHours {
        monday: Some(schedule.clone()),
        tuesday: Some(schedule.clone()),
        wednesday: Some(schedule.clone()),
        thursday: Some(schedule.clone()),
        friday: Some(schedule.clone()),
        saturday: Some(schedule.clone()),
        sunday: Some(schedule),
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

fn clinic(services: Vec<Service>) -> ClinicProfile {
    ClinicProfile {
        clinic_id: "clinic-1".to_string(),
        name: "Clínica Boa Vista".to_string(),
        timezone: "America/Sao_Paulo".to_string(),
        utc_offset_minutes: -180,
        contact_phone: "+55 11 4000-1000".to_string(),
        calendar_id: "cal-1".to_string(),
        services,
        business_hours: all_week_hours(),
        rules: AppointmentRules {
            min_advance_hours: 2,
            max_advance_days: 30,
            spacing_minutes: 10,
            preferred_times: None,
            max_slots: 3,
        },
    }
}

struct Harness {
    flow: BookingFlowService,
    calendar: Arc<InMemoryCalendar>,
    store: Arc<InMemoryFlowStateStore>,
}

async fn harness_with(services: Vec<Service>) -> Harness {
    let calendar = Arc::new(InMemoryCalendar::new());
    let store = Arc::new(InMemoryFlowStateStore::new(StdDuration::from_secs(3600)));

    let directory = ClinicDirectory::new();
    directory.upsert(clinic(services)).await;

    let fast_policy = RetryPolicy {
        max_attempts: 3,
        base_delay: StdDuration::from_millis(1),
        multiplier: 2.0,
        max_delay: StdDuration::from_millis(4),
    };

    let flow = BookingFlowService::new(
        directory,
        SlotFinder::new(calendar.clone(), RetryExecutor::new(fast_policy.clone())),
        BookingService::new(calendar.clone(), RetryExecutor::new(fast_policy)),
        store.clone(),
    );

    Harness {
        flow,
        calendar,
        store,
    }
}

async fn harness() -> Harness {
    harness_with(vec![consultation()]).await
}

fn create_turn(message: &str) -> TurnRequest {
    TurnRequest {
        clinic_id: "clinic-1".to_string(),
        patient: PatientProfile::new("Maria Silva", PHONE).with_email("maria@example.com"),
        intent: Intent {
            kind: IntentKind::Create,
            confidence: 0.95,
        },
        message: message.to_string(),
        history: Vec::new(),
    }
}

#[tokio::test]
async fn happy_path_books_an_appointment() {
    let h = harness().await;

    let opening = h.flow.run_turn(create_turn("quero marcar uma consulta")).await;
    assert_eq!(opening.metadata.flow_step, FlowStep::ServiceSelection);
    assert_eq!(opening.response.kind, ResponseKind::ServiceList);
    assert!(opening.response.message.contains("Consulta Geral"));

    let slots = h.flow.run_turn(create_turn("1")).await;
    assert_eq!(slots.metadata.flow_step, FlowStep::DateTimeSelection);
    assert_eq!(slots.response.kind, ResponseKind::SlotList);
    assert_eq!(slots.response.options.len(), 3);
    assert!(slots.tools_used.contains(&"availability_engine".to_string()));

    let confirm = h.flow.run_turn(create_turn("2")).await;
    assert_eq!(confirm.metadata.flow_step, FlowStep::Confirmation);
    assert_eq!(confirm.response.kind, ResponseKind::ConfirmationSummary);

    let done = h.flow.run_turn(create_turn("sim")).await;
    assert_eq!(done.metadata.flow_step, FlowStep::Completed);
    assert_eq!(done.response.kind, ResponseKind::Success);
    let record = done.booking.expect("completed turn carries the booking record");
    assert!(!record.event_id.is_empty());
    assert!(done.tools_used.contains(&"booking_service".to_string()));

    // Terminal outcome cleared the conversation state.
    assert!(h.store.get(PHONE).await.unwrap().is_none());
    assert_eq!(h.calendar.created_events().await.len(), 1);
}

#[tokio::test]
async fn second_offered_slot_is_the_one_committed() {
    let h = harness().await;

    h.flow.run_turn(create_turn("consulta")).await;
    h.flow.run_turn(create_turn("1")).await;

    let offered = h.store.get(PHONE).await.unwrap().unwrap().data.offered_slots;
    assert_eq!(offered.len(), 3);

    h.flow.run_turn(create_turn("2")).await;
    let done = h.flow.run_turn(create_turn("sim")).await;

    assert_eq!(done.metadata.flow_step, FlowStep::Completed);
    let created = h.calendar.created_events().await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].1.start, offered[1].start);
}

#[tokio::test]
async fn empty_catalogue_is_a_terminal_error_with_clinic_contact() {
    let h = harness_with(Vec::new()).await;

    let outcome = h.flow.run_turn(create_turn("quero marcar")).await;

    assert_eq!(outcome.metadata.flow_step, FlowStep::Error);
    assert!(outcome.metadata.requires_human_intervention);
    assert_eq!(outcome.metadata.error_tag.as_deref(), Some("empty_catalogue"));
    assert!(outcome.response.message.contains("+55 11 4000-1000"));

    assert!(h.store.get(PHONE).await.unwrap().is_none());
}

#[tokio::test]
async fn negative_confirmation_cancels_and_clears_state() {
    let h = harness().await;

    h.flow.run_turn(create_turn("oi")).await;
    h.flow.run_turn(create_turn("1")).await;
    h.flow.run_turn(create_turn("1")).await;

    let outcome = h.flow.run_turn(create_turn("não")).await;

    assert_eq!(outcome.metadata.flow_step, FlowStep::Cancelled);
    assert!(h.store.get(PHONE).await.unwrap().is_none());
    assert!(h.calendar.created_events().await.is_empty());
}

#[tokio::test]
async fn third_unrecognized_service_input_escalates() {
    let h = harness().await;

    h.flow.run_turn(create_turn("bom dia")).await;

    let first = h.flow.run_turn(create_turn("xyzzy")).await;
    assert_eq!(first.metadata.flow_step, FlowStep::ServiceSelection);

    let second = h.flow.run_turn(create_turn("xyzzy")).await;
    assert_eq!(second.metadata.flow_step, FlowStep::ServiceSelection);

    let third = h.flow.run_turn(create_turn("xyzzy")).await;
    assert_eq!(third.metadata.flow_step, FlowStep::Escalated);
    assert_eq!(third.response.kind, ResponseKind::Escalation);
    assert!(third.metadata.requires_human_intervention);
    assert_eq!(
        third.metadata.error_tag.as_deref(),
        Some("service_selection_attempts_exhausted")
    );

    // Escalation hands off and clears; the next message starts fresh.
    assert!(h.store.get(PHONE).await.unwrap().is_none());
    let fresh = h.flow.run_turn(create_turn("oi")).await;
    assert_eq!(fresh.metadata.flow_step, FlowStep::ServiceSelection);
}

#[tokio::test]
async fn unclear_confirmation_replies_also_escalate() {
    let h = harness().await;

    h.flow.run_turn(create_turn("oi")).await;
    h.flow.run_turn(create_turn("1")).await;
    h.flow.run_turn(create_turn("1")).await;

    let first = h.flow.run_turn(create_turn("talvez")).await;
    assert_eq!(first.metadata.flow_step, FlowStep::Confirmation);

    let second = h.flow.run_turn(create_turn("hum")).await;
    assert_eq!(second.metadata.flow_step, FlowStep::Confirmation);

    let third = h.flow.run_turn(create_turn("quem sabe")).await;
    assert_eq!(third.metadata.flow_step, FlowStep::Escalated);
    assert!(h.calendar.created_events().await.is_empty());
}

#[tokio::test]
async fn no_availability_is_informational_and_retryable() {
    let h = harness().await;

    // Every slot in the window is occupied.
    h.calendar
        .push_busy(BusyInterval {
            start: chrono::Utc::now() - chrono::Duration::days(1),
            end: chrono::Utc::now() + chrono::Duration::days(60),
            event_id: Some("evt-block".to_string()),
            idempotency_key: None,
        })
        .await;

    h.flow.run_turn(create_turn("oi")).await;
    let outcome = h.flow.run_turn(create_turn("1")).await;

    assert_eq!(outcome.metadata.flow_step, FlowStep::DateTimeSelection);
    assert_eq!(outcome.response.kind, ResponseKind::Info);
    assert_eq!(outcome.metadata.error_tag.as_deref(), Some("no_availability"));
    assert!(outcome.response.message.contains("+55 11 4000-1000"));

    // State survives so a later message retries discovery.
    let state = h.store.get(PHONE).await.unwrap().unwrap();
    assert_eq!(state.step, FlowStep::DateTimeSelection);
    assert!(state.data.offered_slots.is_empty());

    let retry = h.flow.run_turn(create_turn("e agora?")).await;
    assert_eq!(retry.metadata.error_tag.as_deref(), Some("no_availability"));
}

#[tokio::test]
async fn commit_failure_terminates_with_human_handoff() {
    let h = harness().await;

    h.flow.run_turn(create_turn("oi")).await;
    h.flow.run_turn(create_turn("1")).await;
    h.flow.run_turn(create_turn("1")).await;

    h.calendar.fail_event_creation(true).await;
    let outcome = h.flow.run_turn(create_turn("sim")).await;

    assert_eq!(outcome.metadata.flow_step, FlowStep::Error);
    assert!(outcome.metadata.requires_human_intervention);
    assert_eq!(outcome.metadata.error_tag.as_deref(), Some("commit_failed"));
    assert!(outcome.response.message.contains("+55 11 4000-1000"));

    // The flow terminated; the patient is not re-asked for confirmed data.
    assert!(h.store.get(PHONE).await.unwrap().is_none());
}

#[tokio::test]
async fn slot_taken_since_discovery_reports_a_conflict() {
    let h = harness().await;

    h.flow.run_turn(create_turn("oi")).await;
    h.flow.run_turn(create_turn("1")).await;

    // Another patient grabs the first offered slot before confirmation.
    let offered = h.store.get(PHONE).await.unwrap().unwrap().data.offered_slots;
    h.calendar
        .push_busy(BusyInterval {
            start: offered[0].start,
            end: offered[0].end(),
            event_id: Some("evt-foreign".to_string()),
            idempotency_key: Some("someone-else".to_string()),
        })
        .await;

    h.flow.run_turn(create_turn("1")).await;
    let outcome = h.flow.run_turn(create_turn("sim")).await;

    assert_eq!(outcome.metadata.flow_step, FlowStep::Error);
    assert!(!outcome.metadata.requires_human_intervention);
    assert_eq!(outcome.metadata.error_tag.as_deref(), Some("booking_conflict"));
    assert!(h.calendar.created_events().await.is_empty());
    assert!(h.store.get(PHONE).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_duplicate_confirmations_create_one_event() {
    let h = harness().await;

    h.flow.run_turn(create_turn("oi")).await;
    h.flow.run_turn(create_turn("1")).await;
    h.flow.run_turn(create_turn("1")).await;

    // The patient taps "sim" twice in quick succession.
    let (a, b) = tokio::join!(
        h.flow.run_turn(create_turn("sim")),
        h.flow.run_turn(create_turn("sim")),
    );

    // Turns are serialized per key: one completes the booking, the other
    // lands on the freshly cleared state and restarts the flow.
    let steps = [a.metadata.flow_step, b.metadata.flow_step];
    assert!(steps.contains(&FlowStep::Completed));
    assert_eq!(h.calendar.created_events().await.len(), 1);
}

#[tokio::test]
async fn other_intents_answer_a_contact_stub() {
    let h = harness().await;

    for kind in [IntentKind::Reschedule, IntentKind::Cancel, IntentKind::List] {
        let mut request = create_turn("quero remarcar");
        request.intent = Intent {
            kind,
            confidence: 0.9,
        };

        let outcome = h.flow.run_turn(request).await;

        assert_eq!(outcome.metadata.flow_step, FlowStep::Unsupported);
        assert!(outcome.metadata.requires_human_intervention);
        assert_eq!(outcome.intent, kind.to_string());
        assert!(outcome.response.message.contains("+55 11 4000-1000"));
    }

    // Unsupported intents leave any stored state untouched.
    h.flow.run_turn(create_turn("oi")).await;
    let mut request = create_turn("cancela tudo");
    request.intent = Intent {
        kind: IntentKind::Cancel,
        confidence: 0.9,
    };
    h.flow.run_turn(request).await;
    assert_matches!(h.store.get(PHONE).await.unwrap(), Some(state) if state.step == FlowStep::ServiceSelection);
}

#[tokio::test]
async fn unknown_clinic_is_a_terminal_error() {
    let h = harness().await;

    let mut request = create_turn("oi");
    request.clinic_id = "clinic-missing".to_string();

    let outcome = h.flow.run_turn(request).await;

    assert_eq!(outcome.metadata.flow_step, FlowStep::Error);
    assert_eq!(outcome.metadata.error_tag.as_deref(), Some("clinic_not_configured"));
}

#[tokio::test]
async fn calendar_outage_still_offers_rule_based_slots() {
    let h = harness().await;
    h.calendar.fail_next_busy_queries(3).await;

    h.flow.run_turn(create_turn("oi")).await;
    let outcome = h.flow.run_turn(create_turn("1")).await;

    // Degraded availability, not a dead conversation.
    assert_eq!(outcome.metadata.flow_step, FlowStep::DateTimeSelection);
    assert_eq!(outcome.response.kind, ResponseKind::SlotList);
    assert_eq!(outcome.response.options.len(), 3);
}
