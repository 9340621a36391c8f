use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, error};

use shared_config::AppConfig;

use crate::models::{
    BusyInterval, BusyQueryResponse, CalendarError, CreatedEvent, EventPatch, NewCalendarEvent,
};

/// Contract every calendar provider integration must honor.
///
/// Cancellation marks the event cancelled rather than deleting it, so the
/// clinic keeps an audit trail of what was booked and undone.
#[async_trait]
pub trait CalendarApi: Send + Sync {
    async fn list_busy_intervals(
        &self,
        calendar_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, CalendarError>;

    async fn create_event(
        &self,
        calendar_id: &str,
        event: NewCalendarEvent,
    ) -> Result<CreatedEvent, CalendarError>;

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        patch: EventPatch,
    ) -> Result<(), CalendarError>;

    async fn cancel_event(&self, calendar_id: &str, event_id: &str) -> Result<(), CalendarError>;
}

pub struct HttpCalendarClient {
    client: Client,
    base_url: String,
    api_token: String,
}

impl HttpCalendarClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.calendar_api_base_url.clone(),
            api_token: config.calendar_api_token.clone(),
        }
    }

    fn get_headers(&self) -> Result<HeaderMap, CalendarError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_token))
                .map_err(|e| CalendarError::Auth(e.to_string()))?,
        );
        Ok(headers)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<reqwest::Response, CalendarError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Calendar request {} {}", method, url);

        let mut req = self.client.request(method, &url).headers(self.get_headers()?);
        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Calendar API error ({}): {}", status, error_text);

            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    CalendarError::Auth(error_text)
                }
                StatusCode::NOT_FOUND => CalendarError::NotFound(error_text),
                StatusCode::CONFLICT => CalendarError::Conflict(error_text),
                StatusCode::TOO_MANY_REQUESTS => CalendarError::RateLimited(error_text),
                s if s.is_server_error() => CalendarError::Unavailable {
                    status: s.as_u16(),
                    message: error_text,
                },
                s => CalendarError::Api {
                    status: s.as_u16(),
                    message: error_text,
                },
            });
        }

        Ok(response)
    }

    async fn request<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, CalendarError>
    where
        T: DeserializeOwned,
    {
        let response = self.send(method, path, body).await?;
        let data = response.json::<T>().await?;
        Ok(data)
    }
}

#[async_trait]
impl CalendarApi for HttpCalendarClient {
    async fn list_busy_intervals(
        &self,
        calendar_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, CalendarError> {
        let path = format!("/v1/calendars/{}/busy-query", calendar_id);
        let body = json!({
            "time_min": from.to_rfc3339(),
            "time_max": to.to_rfc3339(),
        });

        let response: BusyQueryResponse = self.request(Method::POST, &path, Some(body)).await?;
        Ok(response.intervals)
    }

    async fn create_event(
        &self,
        calendar_id: &str,
        event: NewCalendarEvent,
    ) -> Result<CreatedEvent, CalendarError> {
        let path = format!("/v1/calendars/{}/events", calendar_id);
        let body = serde_json::to_value(&event)
            .map_err(|e| CalendarError::Decode(e.to_string()))?;

        self.request(Method::POST, &path, Some(body)).await
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        patch: EventPatch,
    ) -> Result<(), CalendarError> {
        let path = format!("/v1/calendars/{}/events/{}", calendar_id, event_id);
        let body = serde_json::to_value(&patch)
            .map_err(|e| CalendarError::Decode(e.to_string()))?;

        // Providers answer a PATCH with the updated resource or an empty
        // body; neither is needed here.
        let _ = self.send(Method::PATCH, &path, Some(body)).await?;
        Ok(())
    }

    async fn cancel_event(&self, calendar_id: &str, event_id: &str) -> Result<(), CalendarError> {
        let patch = EventPatch {
            status: Some("cancelled".to_string()),
            ..EventPatch::default()
        };
        self.update_event(calendar_id, event_id, patch).await
    }
}
