//! In-memory [`CalendarApi`] double for tests across the booking cells.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::models::{BusyInterval, CalendarError, CreatedEvent, EventPatch, NewCalendarEvent};
use crate::services::client::CalendarApi;

#[derive(Default)]
struct Inner {
    busy: Vec<BusyInterval>,
    created: Vec<(String, NewCalendarEvent)>,
    cancelled: Vec<String>,
    patched: Vec<(String, EventPatch)>,
    busy_failures_remaining: u32,
    create_fails: bool,
    busy_calls: u32,
    create_calls: u32,
}

#[derive(Default)]
pub struct InMemoryCalendar {
    inner: Mutex<Inner>,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_busy(&self, interval: BusyInterval) {
        self.inner.lock().await.busy.push(interval);
    }

    /// The next `count` busy queries answer with a retryable failure.
    pub async fn fail_next_busy_queries(&self, count: u32) {
        self.inner.lock().await.busy_failures_remaining = count;
    }

    pub async fn fail_event_creation(&self, fails: bool) {
        self.inner.lock().await.create_fails = fails;
    }

    pub async fn created_events(&self) -> Vec<(String, NewCalendarEvent)> {
        self.inner.lock().await.created.clone()
    }

    pub async fn cancelled_events(&self) -> Vec<String> {
        self.inner.lock().await.cancelled.clone()
    }

    pub async fn busy_query_count(&self) -> u32 {
        self.inner.lock().await.busy_calls
    }

    pub async fn create_call_count(&self) -> u32 {
        self.inner.lock().await.create_calls
    }
}

#[async_trait]
impl CalendarApi for InMemoryCalendar {
    async fn list_busy_intervals(
        &self,
        _calendar_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, CalendarError> {
        let mut inner = self.inner.lock().await;
        inner.busy_calls += 1;

        if inner.busy_failures_remaining > 0 {
            inner.busy_failures_remaining -= 1;
            return Err(CalendarError::Unavailable {
                status: 503,
                message: "injected outage".to_string(),
            });
        }

        let mut intervals: Vec<BusyInterval> = inner
            .busy
            .iter()
            .filter(|b| b.overlaps(from, to))
            .cloned()
            .collect();

        // Events created through this double show up as busy time, with
        // their metadata echoed back the way the live provider does.
        for (event_id, event) in &inner.created {
            if inner.cancelled.contains(event_id) {
                continue;
            }
            let interval = BusyInterval {
                start: event.start,
                end: event.end,
                event_id: Some(event_id.clone()),
                idempotency_key: Some(event.idempotency_key.clone()),
            };
            if interval.overlaps(from, to) {
                intervals.push(interval);
            }
        }

        intervals.sort_by(|a, b| a.start.cmp(&b.start));
        Ok(intervals)
    }

    async fn create_event(
        &self,
        _calendar_id: &str,
        event: NewCalendarEvent,
    ) -> Result<CreatedEvent, CalendarError> {
        let mut inner = self.inner.lock().await;
        inner.create_calls += 1;

        if inner.create_fails {
            return Err(CalendarError::Unavailable {
                status: 502,
                message: "injected create failure".to_string(),
            });
        }

        let event_id = format!("evt-{}", inner.created.len() + 1);
        inner.created.push((event_id.clone(), event));

        Ok(CreatedEvent {
            event_id: event_id.clone(),
            event_link: Some(format!("https://calendar.test/events/{}", event_id)),
        })
    }

    async fn update_event(
        &self,
        _calendar_id: &str,
        event_id: &str,
        patch: EventPatch,
    ) -> Result<(), CalendarError> {
        let mut inner = self.inner.lock().await;
        if !inner.created.iter().any(|(id, _)| id == event_id) {
            return Err(CalendarError::NotFound(event_id.to_string()));
        }
        inner.patched.push((event_id.to_string(), patch));
        Ok(())
    }

    async fn cancel_event(&self, _calendar_id: &str, event_id: &str) -> Result<(), CalendarError> {
        let mut inner = self.inner.lock().await;
        if !inner.created.iter().any(|(id, _)| id == event_id) {
            return Err(CalendarError::NotFound(event_id.to_string()));
        }
        inner.cancelled.push(event_id.to_string());
        Ok(())
    }
}
