use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use availability_cell::TimeSlot;
use calendar_cell::{
    CalendarApi, CalendarError, EventAttendee, EventReminder, NewCalendarEvent,
};
use clinic_cell::{ClinicProfile, Service};
use resilience_cell::{RetryError, RetryExecutor};
use shared_models::PatientProfile;

use crate::models::{BookingError, BookingRecord};

/// Deterministic duplicate-detection key for a commit attempt. Two
/// confirmations of the same slot by the same patient always derive the
/// same key, regardless of which turn produced them.
pub fn idempotency_key(clinic_id: &str, start: DateTime<Utc>, patient_phone: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(clinic_id.as_bytes());
    hasher.update(b"|");
    hasher.update(start.to_rfc3339().as_bytes());
    hasher.update(b"|");
    hasher.update(patient_phone.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Commits a confirmed slot as an external calendar event.
pub struct BookingService {
    calendar: Arc<dyn CalendarApi>,
    retry: RetryExecutor,
}

impl BookingService {
    pub fn new(calendar: Arc<dyn CalendarApi>, retry: RetryExecutor) -> Self {
        Self { calendar, retry }
    }

    pub async fn commit(
        &self,
        clinic: &ClinicProfile,
        service: &Service,
        slot: &TimeSlot,
        patient: &PatientProfile,
    ) -> Result<BookingRecord, BookingError> {
        let key = idempotency_key(&clinic.clinic_id, slot.start, &patient.phone);

        // Narrow re-check over exactly the slot window: the broad fetch that
        // produced this slot may be minutes old by confirmation time.
        let busy = self
            .retry
            .execute("calendar.commit_precheck", || {
                self.calendar
                    .list_busy_intervals(&clinic.calendar_id, slot.start, slot.end())
            })
            .await
            .map_err(map_calendar_failure)?;

        for interval in &busy {
            if !interval.overlaps(slot.start, slot.end()) {
                continue;
            }
            if interval.idempotency_key.as_deref() == Some(key.as_str()) {
                // Our own earlier commit; answer with the existing event.
                let event_id = interval.event_id.clone().unwrap_or_default();
                if event_id.is_empty() {
                    warn!(
                        "Calendar echoed idempotency key {} without an event id for clinic {}",
                        key, clinic.clinic_id
                    );
                }
                info!(
                    "Duplicate commit for clinic {} resolved to existing event {}",
                    clinic.clinic_id, event_id
                );
                return Ok(self.record(clinic, service, slot, patient, key, event_id, None));
            }
            warn!(
                "Slot {} for clinic {} taken by a foreign event since discovery",
                slot.start, clinic.clinic_id
            );
            return Err(BookingError::SlotTaken);
        }

        let event = build_event(clinic, service, slot, patient, &key);
        let created = self
            .retry
            .execute("calendar.create_event", || {
                self.calendar.create_event(&clinic.calendar_id, event.clone())
            })
            .await
            .map_err(map_calendar_failure)?;

        info!(
            "Booked {} for {} at {} (event {})",
            service.name, patient.phone, slot.start, created.event_id
        );

        Ok(self.record(
            clinic,
            service,
            slot,
            patient,
            key,
            created.event_id,
            created.event_link,
        ))
    }

    /// Marks the backing calendar event cancelled, preserving the audit
    /// trail, and flips the record's cancellation marker.
    pub async fn cancel(
        &self,
        clinic: &ClinicProfile,
        record: &BookingRecord,
    ) -> Result<BookingRecord, BookingError> {
        if record.cancelled {
            return Err(BookingError::AlreadyCancelled);
        }

        self.retry
            .execute("calendar.cancel_event", || {
                self.calendar.cancel_event(&clinic.calendar_id, &record.event_id)
            })
            .await
            .map_err(map_calendar_failure)?;

        info!("Cancelled booking event {} for clinic {}", record.event_id, clinic.clinic_id);

        let mut cancelled = record.clone();
        cancelled.cancelled = true;
        Ok(cancelled)
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        clinic: &ClinicProfile,
        service: &Service,
        slot: &TimeSlot,
        patient: &PatientProfile,
        idempotency_key: String,
        event_id: String,
        event_link: Option<String>,
    ) -> BookingRecord {
        BookingRecord {
            clinic_id: clinic.clinic_id.clone(),
            service: service.clone(),
            slot: slot.clone(),
            patient: patient.clone(),
            idempotency_key,
            event_id,
            event_link,
            cancelled: false,
            created_at: Utc::now(),
        }
    }
}

fn build_event(
    clinic: &ClinicProfile,
    service: &Service,
    slot: &TimeSlot,
    patient: &PatientProfile,
    key: &str,
) -> NewCalendarEvent {
    let mut attendees = Vec::new();
    if let Some(email) = &patient.email {
        attendees.push(EventAttendee {
            email: email.clone(),
            display_name: Some(patient.name.clone()),
        });
    }

    let description = format!(
        "Agendamento feito pelo assistente virtual.\n\n\
         Serviço: {} ({} min)\n\
         Paciente: {}\n\
         Telefone: {}\n\
         Clínica: {} ({})",
        service.name,
        service.duration_minutes,
        patient.name,
        patient.phone,
        clinic.name,
        clinic.contact_phone
    );

    NewCalendarEvent {
        start: slot.start,
        end: slot.end(),
        summary: format!("{} - {}", service.name, patient.name),
        description,
        attendees,
        // A day before and an hour before.
        reminders: vec![
            EventReminder { minutes_before: 24 * 60 },
            EventReminder { minutes_before: 60 },
        ],
        idempotency_key: key.to_string(),
    }
}

fn map_calendar_failure(err: RetryError<CalendarError>) -> BookingError {
    match err {
        RetryError::Exhausted { attempts, source } => BookingError::CalendarUnavailable {
            attempts,
            message: source.to_string(),
        },
        // The provider itself can detect the overlap when the event lands.
        RetryError::Aborted { source: CalendarError::Conflict(_), .. } => BookingError::SlotTaken,
        RetryError::Aborted { source, .. } => BookingError::CalendarRejected(source.to_string()),
    }
}
