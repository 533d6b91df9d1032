use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::{CustomerSummary, Money, ServiceSummary, TimeOfDay, TimeRange};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: i64,
    pub customer_id: i64,
    pub service_id: i64,
    pub appointment_date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub status: AppointmentStatus,
    pub total_price: Money,
    pub special_requests: Option<String>,
    pub notes: Option<String>,
    pub calendar_event_id: Option<String>,
    pub payment_status: PaymentStatus,
    pub cancelled_at: Option<NaiveDateTime>,
    pub cancelled_by: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Appointment {
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }

    pub fn as_booked(&self) -> BookedInterval {
        BookedInterval {
            id: self.id,
            date: self.appointment_date,
            start: self.start_time,
            end: self.end_time,
            status: self.status.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "confirmed" => AppointmentStatus::Confirmed,
            "cancelled" => AppointmentStatus::Cancelled,
            "completed" => AppointmentStatus::Completed,
            _ => AppointmentStatus::Pending,
        }
    }

    /// Pending and confirmed appointments hold their slot and pin the customer.
    pub fn is_active(&self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "paid" => PaymentStatus::Paid,
            "refunded" => PaymentStatus::Refunded,
            _ => PaymentStatus::Pending,
        }
    }
}

/// What the conflict checker and slot generator see of an existing booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookedInterval {
    pub id: i64,
    pub date: NaiveDate,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub status: AppointmentStatus,
}

impl BookedInterval {
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.start, self.end)
    }
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub customer_id: i64,
    pub service_id: i64,
    pub appointment_date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub status: AppointmentStatus,
    pub total_price: Money,
    pub special_requests: Option<String>,
}

/// Field-level changes applied by the persistence layer. `customer_id`
/// and `service_id` are immutable and have no patch field.
#[derive(Debug, Clone, Default)]
pub struct AppointmentPatch {
    pub appointment_date: Option<NaiveDate>,
    pub start_time: Option<TimeOfDay>,
    pub end_time: Option<TimeOfDay>,
    pub status: Option<AppointmentStatus>,
    pub special_requests: Option<String>,
    pub notes: Option<String>,
    pub payment_status: Option<PaymentStatus>,
    pub calendar_event_id: Option<String>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub cancelled_by: Option<String>,
}

impl AppointmentPatch {
    pub fn apply(&self, appt: &mut Appointment) {
        if let Some(date) = self.appointment_date {
            appt.appointment_date = date;
        }
        if let Some(start) = self.start_time {
            appt.start_time = start;
        }
        if let Some(end) = self.end_time {
            appt.end_time = end;
        }
        if let Some(status) = &self.status {
            appt.status = status.clone();
        }
        if let Some(special_requests) = &self.special_requests {
            appt.special_requests = Some(special_requests.clone());
        }
        if let Some(notes) = &self.notes {
            appt.notes = Some(notes.clone());
        }
        if let Some(payment_status) = &self.payment_status {
            appt.payment_status = payment_status.clone();
        }
        if let Some(event_id) = &self.calendar_event_id {
            appt.calendar_event_id = Some(event_id.clone());
        }
        if let Some(cancelled_at) = self.cancelled_at {
            appt.cancelled_at = Some(cancelled_at);
        }
        if let Some(cancelled_by) = &self.cancelled_by {
            appt.cancelled_by = Some(cancelled_by.clone());
        }
    }
}

/// An appointment joined with its customer and service summaries.
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentDetails {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub customer: CustomerSummary,
    pub service: ServiceSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            AppointmentStatus::Pending,
            AppointmentStatus::Confirmed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::Completed,
        ] {
            assert_eq!(AppointmentStatus::parse(status.as_str()), status);
        }
        assert_eq!(AppointmentStatus::parse("bogus"), AppointmentStatus::Pending);
    }

    #[test]
    fn test_active_statuses() {
        assert!(AppointmentStatus::Pending.is_active());
        assert!(AppointmentStatus::Confirmed.is_active());
        assert!(!AppointmentStatus::Cancelled.is_active());
        assert!(!AppointmentStatus::Completed.is_active());
    }
}
