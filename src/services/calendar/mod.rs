pub mod google;
pub mod ics;

use async_trait::async_trait;

use crate::models::AppointmentDetails;

/// External calendar mirrored from committed appointments.
#[async_trait]
pub trait CalendarSync: Send + Sync {
    /// Returns the provider's event id, if it keeps one.
    async fn create_event(&self, appt: &AppointmentDetails) -> anyhow::Result<Option<String>>;
    async fn update_event(&self, event_id: &str, appt: &AppointmentDetails) -> anyhow::Result<()>;
    async fn delete_event(&self, event_id: &str) -> anyhow::Result<()>;
}

/// Used when no calendar provider is configured.
pub struct NoopCalendar;

#[async_trait]
impl CalendarSync for NoopCalendar {
    async fn create_event(&self, _appt: &AppointmentDetails) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    async fn update_event(&self, _event_id: &str, _appt: &AppointmentDetails) -> anyhow::Result<()> {
        Ok(())
    }

    async fn delete_event(&self, _event_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_details(
    id: i64,
    start: &str,
    end: &str,
    status: crate::models::AppointmentStatus,
) -> AppointmentDetails {
    use chrono::{NaiveDate, NaiveDateTime};

    use crate::models::{
        Appointment, CustomerSummary, Money, PaymentStatus, ServiceSummary, TimeOfDay,
    };

    let ts = NaiveDateTime::parse_from_str("2025-03-10 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
    AppointmentDetails {
        appointment: Appointment {
            id,
            customer_id: 1,
            service_id: 1,
            appointment_date: NaiveDate::from_ymd_opt(2025, 3, 15).unwrap(),
            start_time: TimeOfDay::parse(start).unwrap(),
            end_time: TimeOfDay::parse(end).unwrap(),
            status,
            total_price: Money::from_cents(7500).unwrap(),
            special_requests: Some("Window seat, please".to_string()),
            notes: None,
            calendar_event_id: None,
            payment_status: PaymentStatus::Pending,
            cancelled_at: None,
            cancelled_by: None,
            created_at: ts,
            updated_at: ts,
        },
        customer: CustomerSummary {
            id: 1,
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            phone: Some("+1234567890".to_string()),
        },
        service: ServiceSummary {
            id: 1,
            name: "Hair Styling".to_string(),
            duration_minutes: 90,
            price: Money::from_cents(7500).unwrap(),
        },
    }
}
