//! Google Calendar v3 events over REST.

use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};

use super::CalendarSync;
use crate::models::{AppointmentDetails, TimeOfDay};

const API_BASE: &str = "https://www.googleapis.com/calendar/v3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GoogleCalendar {
    client: reqwest::Client,
    base_url: String,
    calendar_id: String,
    token: String,
    time_zone: String,
    business_name: String,
}

#[derive(Deserialize)]
struct EventResponse {
    id: String,
}

impl GoogleCalendar {
    pub fn new(
        calendar_id: String,
        token: String,
        time_zone: String,
        business_name: String,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build calendar HTTP client")?;

        Ok(Self {
            client,
            base_url: API_BASE.to_string(),
            calendar_id,
            token,
            time_zone,
            business_name,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn events_url(&self, event_id: Option<&str>) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.base_url).context("invalid calendar API base url")?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| anyhow!("calendar API base url cannot take a path"))?;
            segments.pop_if_empty().extend(["calendars", self.calendar_id.as_str(), "events"]);
            if let Some(id) = event_id {
                segments.push(id);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl CalendarSync for GoogleCalendar {
    async fn create_event(&self, appt: &AppointmentDetails) -> anyhow::Result<Option<String>> {
        let body = event_body(appt, &self.business_name, &self.time_zone);

        let event: EventResponse = self
            .client
            .post(self.events_url(None)?)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .context("failed to create calendar event")?
            .error_for_status()
            .context("calendar API returned error")?
            .json()
            .await
            .context("failed to parse calendar event")?;

        tracing::info!(appointment_id = appt.appointment.id, event_id = %event.id, "calendar event created");
        Ok(Some(event.id))
    }

    async fn update_event(&self, event_id: &str, appt: &AppointmentDetails) -> anyhow::Result<()> {
        let body = event_body(appt, &self.business_name, &self.time_zone);

        self.client
            .put(self.events_url(Some(event_id))?)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .context("failed to update calendar event")?
            .error_for_status()
            .context("calendar API returned error")?;

        Ok(())
    }

    async fn delete_event(&self, event_id: &str) -> anyhow::Result<()> {
        let res = self
            .client
            .delete(self.events_url(Some(event_id))?)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("failed to delete calendar event")?;

        // Already gone on the calendar side.
        if matches!(res.status(), StatusCode::NOT_FOUND | StatusCode::GONE) {
            return Ok(());
        }
        res.error_for_status().context("calendar API returned error")?;
        Ok(())
    }
}

/// Request body for an event insert or update.
pub fn event_body(details: &AppointmentDetails, business_name: &str, time_zone: &str) -> Value {
    let appt = &details.appointment;
    let date_time = |time: TimeOfDay| format!("{}T{}:00", appt.appointment_date.format("%Y-%m-%d"), time);

    let mut description = vec![
        format!("Customer: {}", details.customer.name),
        format!("Email: {}", details.customer.email),
    ];
    if let Some(phone) = &details.customer.phone {
        description.push(format!("Phone: {phone}"));
    }
    if let Some(requests) = appt.special_requests.as_deref().filter(|s| !s.is_empty()) {
        description.push(format!("Special requests: {requests}"));
    }
    description.push(format!("Booking ID: {}", appt.id));

    json!({
        "summary": format!("{business_name} Appointment - {}", details.service.name),
        "description": description.join("\n"),
        "start": { "dateTime": date_time(appt.start_time), "timeZone": time_zone },
        "end": { "dateTime": date_time(appt.end_time), "timeZone": time_zone },
        "attendees": [
            { "email": details.customer.email, "displayName": details.customer.name }
        ],
        "reminders": {
            "useDefault": false,
            "overrides": [
                { "method": "email", "minutes": 24 * 60 },
                { "method": "popup", "minutes": 60 }
            ]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppointmentStatus;
    use crate::services::calendar::sample_details;

    fn calendar(id: &str) -> GoogleCalendar {
        GoogleCalendar::new(
            id.to_string(),
            "token".to_string(),
            "America/New_York".to_string(),
            "Parlor".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_event_body() {
        let details = sample_details(9, "10:00", "11:30", AppointmentStatus::Confirmed);
        let body = event_body(&details, "Parlor", "America/New_York");

        assert_eq!(body["summary"], "Parlor Appointment - Hair Styling");
        assert_eq!(body["start"]["dateTime"], "2025-03-15T10:00:00");
        assert_eq!(body["end"]["dateTime"], "2025-03-15T11:30:00");
        assert_eq!(body["start"]["timeZone"], "America/New_York");
        assert_eq!(body["attendees"][0]["email"], "alice@example.com");
        assert_eq!(body["reminders"]["overrides"][0]["minutes"], 1440);
        assert_eq!(body["reminders"]["overrides"][1]["method"], "popup");

        let description = body["description"].as_str().unwrap();
        assert!(description.contains("Special requests: Window seat, please"));
        assert!(description.ends_with("Booking ID: 9"));
    }

    #[test]
    fn test_events_url_escapes_calendar_id() {
        let url = calendar("team@group.calendar.google.com").events_url(None).unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.googleapis.com/calendar/v3/calendars/team@group.calendar.google.com/events"
        );

        let url = calendar("a/b").events_url(Some("evt1")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.googleapis.com/calendar/v3/calendars/a%2Fb/events/evt1"
        );
    }

    #[test]
    fn test_custom_base_url_with_trailing_slash() {
        let url = calendar("primary")
            .with_base_url("http://localhost:9000/v3/")
            .events_url(Some("abc"))
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/v3/calendars/primary/events/abc");
    }
}
