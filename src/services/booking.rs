//! Booking orchestration: validate, check for conflicts, commit, then sync
//! the external calendar on a best-effort basis.
//!
//! The conflict check and the write for a date run under a per-date lock,
//! so two concurrent requests for the same day cannot both pass the check.
//! The storage layer carries an overlap trigger as a second line.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

use crate::errors::{BookingError, StoreError};
use crate::models::customer::validate_email;
use crate::models::{
    Appointment, AppointmentDetails, AppointmentPatch, AppointmentStatus, BookedInterval,
    BusinessHours, Customer, NewAppointment, NewCustomer, PaymentStatus, Service, ServiceSummary,
    TimeOfDay, TimeRange, WeeklyHours,
};
use crate::services::calendar::CalendarSync;
use crate::services::scheduling;

pub const DEFAULT_CANCELLED_BY: &str = "system";

/// Persistence collaborator used by the orchestrator.
pub trait BookingStore: Send + Sync {
    /// All appointments on `date`, whatever their status.
    fn find_bookings_by_date(&self, date: NaiveDate) -> Result<Vec<BookedInterval>, StoreError>;
    fn get_service(&self, id: i64) -> Result<Option<Service>, StoreError>;
    fn get_customer(&self, id: i64) -> Result<Option<Customer>, StoreError>;
    fn find_customer_by_email(&self, email: &str) -> Result<Option<Customer>, StoreError>;
    fn create_customer(&self, new: &NewCustomer) -> Result<Customer, StoreError>;
    fn get_appointment(&self, id: i64) -> Result<Option<Appointment>, StoreError>;
    fn create_appointment(&self, new: &NewAppointment) -> Result<Appointment, StoreError>;
    fn update_appointment(&self, id: i64, patch: &AppointmentPatch)
        -> Result<Appointment, StoreError>;
    fn appointment_details(&self, id: i64) -> Result<Option<AppointmentDetails>, StoreError>;
}

/// Who the appointment is for: a known customer id, or contact details
/// that are matched by email and created on first booking.
#[derive(Debug, Clone)]
pub enum CustomerRef {
    Id(i64),
    Details(NewCustomer),
}

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub customer: CustomerRef,
    pub service_id: i64,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub special_requests: Option<String>,
}

/// Requested changes to an existing appointment.
#[derive(Debug, Clone, Default)]
pub struct AppointmentChanges {
    pub date: Option<NaiveDate>,
    pub start_time: Option<TimeOfDay>,
    pub status: Option<AppointmentStatus>,
    pub special_requests: Option<String>,
    pub notes: Option<String>,
    pub payment_status: Option<PaymentStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingOutcome {
    pub appointment: AppointmentDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar_warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityReport {
    pub date: NaiveDate,
    pub service: ServiceSummary,
    pub business_hours: Option<BusinessHours>,
    pub available_slots: Vec<TimeRange>,
}

/// One lock per date with an in-flight write.
#[derive(Default)]
struct DateLocks {
    inner: Mutex<HashMap<NaiveDate, Arc<Mutex<()>>>>,
}

impl DateLocks {
    fn for_date(&self, date: NaiveDate) -> Arc<Mutex<()>> {
        let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(date).or_default())
    }

    /// Locks for every distinct date, in ascending date order. Callers must
    /// acquire them in the returned order.
    fn for_dates(&self, dates: &[NaiveDate]) -> Vec<Arc<Mutex<()>>> {
        let mut dates = dates.to_vec();
        dates.sort();
        dates.dedup();

        let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        dates
            .into_iter()
            .map(|date| Arc::clone(locks.entry(date).or_default()))
            .collect()
    }
}

pub struct BookingService {
    store: Arc<dyn BookingStore>,
    calendar: Arc<dyn CalendarSync>,
    hours: WeeklyHours,
    slot_granularity: u32,
    locks: DateLocks,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn BookingStore>,
        calendar: Arc<dyn CalendarSync>,
        hours: WeeklyHours,
        slot_granularity: u32,
    ) -> Self {
        Self {
            store,
            calendar,
            hours,
            slot_granularity: slot_granularity.max(1),
            locks: DateLocks::default(),
        }
    }

    pub fn hours(&self) -> &WeeklyHours {
        &self.hours
    }

    pub fn availability(
        &self,
        date: NaiveDate,
        service_id: i64,
    ) -> Result<AvailabilityReport, BookingError> {
        let service = self.active_service(service_id)?;
        let hours = self.hours.hours_for(date);

        let available_slots = match hours {
            Some(hours) => {
                let existing = self.store.find_bookings_by_date(date)?;
                scheduling::generate_slots(
                    date,
                    hours,
                    self.slot_granularity,
                    service.duration_minutes,
                    &existing,
                )
                .collect()
            }
            None => Vec::new(),
        };

        Ok(AvailabilityReport {
            date,
            service: ServiceSummary::from(&service),
            business_hours: hours,
            available_slots,
        })
    }

    pub async fn create(&self, req: BookingRequest) -> Result<BookingOutcome, BookingError> {
        let details = self.commit_create(&req)?;
        Ok(self.publish(details).await)
    }

    /// Applies `changes`; a date or start change is a reschedule and goes
    /// through the same conflict check as a create, ignoring the appointment
    /// itself. Setting status `cancelled` is routed to [`Self::cancel`].
    pub async fn update(
        &self,
        id: i64,
        changes: AppointmentChanges,
    ) -> Result<BookingOutcome, BookingError> {
        if changes.status == Some(AppointmentStatus::Cancelled) {
            return self.cancel(id, DEFAULT_CANCELLED_BY).await;
        }

        let (details, rescheduled) = self.commit_update(id, &changes)?;
        if rescheduled {
            Ok(self.publish(details).await)
        } else {
            Ok(BookingOutcome {
                appointment: details,
                calendar_warning: None,
            })
        }
    }

    /// Cancelling an already-cancelled appointment is a no-op.
    pub async fn cancel(&self, id: i64, actor: &str) -> Result<BookingOutcome, BookingError> {
        let (details, changed) = self.commit_cancel(id, actor)?;
        if changed {
            Ok(self.retract(details).await)
        } else {
            Ok(BookingOutcome {
                appointment: details,
                calendar_warning: None,
            })
        }
    }

    fn commit_create(&self, req: &BookingRequest) -> Result<AppointmentDetails, BookingError> {
        if let CustomerRef::Details(new) = &req.customer {
            if new.name.trim().is_empty() {
                return Err(BookingError::InvalidInput("customer name is required".to_string()));
            }
            validate_email(&new.email).map_err(BookingError::InvalidInput)?;
        }

        let service = self.active_service(req.service_id)?;
        let range = self.bookable_range(req.date, req.start_time, service.duration_minutes)?;

        let lock = self.locks.for_date(req.date);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let existing = self.store.find_bookings_by_date(req.date)?;
        if let Some(clash) = scheduling::find_conflict(req.date, &range, &existing, None) {
            return Err(conflict(req.date, &range, clash));
        }

        let customer = self.resolve_customer(&req.customer)?;
        let appt = self.store.create_appointment(&NewAppointment {
            customer_id: customer.id,
            service_id: service.id,
            appointment_date: req.date,
            start_time: range.start,
            end_time: range.end,
            status: AppointmentStatus::Confirmed,
            total_price: service.price,
            special_requests: req.special_requests.clone(),
        })?;

        tracing::info!(
            appointment_id = appt.id,
            customer_id = customer.id,
            service_id = service.id,
            date = %req.date,
            slot = %range,
            "appointment created"
        );

        self.details(appt.id)
    }

    fn commit_update(
        &self,
        id: i64,
        changes: &AppointmentChanges,
    ) -> Result<(AppointmentDetails, bool), BookingError> {
        self.with_locked(id, changes.date, |current| self.apply_update(current, changes))
    }

    /// Runs with the appointment's current date and the target date locked.
    fn apply_update(
        &self,
        current: Appointment,
        changes: &AppointmentChanges,
    ) -> Result<(AppointmentDetails, bool), BookingError> {
        let id = current.id;
        let date = changes.date.unwrap_or(current.appointment_date);
        let start = changes.start_time.unwrap_or(current.start_time);
        let rescheduling = date != current.appointment_date || start != current.start_time;

        if current.status == AppointmentStatus::Cancelled
            && (rescheduling || changes.status.is_some())
        {
            return Err(BookingError::Conflict(format!(
                "appointment {id} is cancelled and cannot be changed"
            )));
        }

        let mut patch = AppointmentPatch {
            status: changes.status.clone(),
            special_requests: changes.special_requests.clone(),
            notes: changes.notes.clone(),
            payment_status: changes.payment_status.clone(),
            ..Default::default()
        };

        if !rescheduling {
            let appt = self.store.update_appointment(id, &patch)?;
            return Ok((self.details(appt.id)?, false));
        }

        self.store
            .get_service(current.service_id)?
            .ok_or_else(|| BookingError::NotFound(format!("service {} not found", current.service_id)))?;

        // Keeps the duration booked at creation time.
        let range = self.bookable_range(date, start, current.time_range().duration_minutes())?;

        let existing = self.store.find_bookings_by_date(date)?;
        if let Some(clash) = scheduling::find_conflict(date, &range, &existing, Some(id)) {
            return Err(conflict(date, &range, clash));
        }

        patch.appointment_date = Some(date);
        patch.start_time = Some(range.start);
        patch.end_time = Some(range.end);
        let appt = self.store.update_appointment(id, &patch)?;

        tracing::info!(
            appointment_id = id,
            from_date = %current.appointment_date,
            from = %current.time_range(),
            date = %date,
            slot = %range,
            "appointment rescheduled"
        );

        Ok((self.details(appt.id)?, true))
    }

    fn commit_cancel(&self, id: i64, actor: &str) -> Result<(AppointmentDetails, bool), BookingError> {
        self.with_locked(id, None, |current| self.apply_cancel(current, actor))
    }

    fn apply_cancel(
        &self,
        current: Appointment,
        actor: &str,
    ) -> Result<(AppointmentDetails, bool), BookingError> {
        let id = current.id;
        if current.status == AppointmentStatus::Cancelled {
            return Ok((self.details(id)?, false));
        }

        let actor = actor.trim();
        let patch = AppointmentPatch {
            status: Some(AppointmentStatus::Cancelled),
            cancelled_at: Some(now()),
            cancelled_by: Some(if actor.is_empty() { DEFAULT_CANCELLED_BY } else { actor }.to_string()),
            ..Default::default()
        };
        self.store.update_appointment(id, &patch)?;

        tracing::info!(appointment_id = id, cancelled_by = actor, "appointment cancelled");

        Ok((self.details(id)?, true))
    }

    /// Creates or moves the calendar event. Failures only produce a warning.
    async fn publish(&self, mut details: AppointmentDetails) -> BookingOutcome {
        let id = details.appointment.id;
        let result = match details.appointment.calendar_event_id.clone() {
            Some(event_id) => self.calendar.update_event(&event_id, &details).await.map(|_| None),
            None => self.calendar.create_event(&details).await,
        };

        let calendar_warning = match result {
            Ok(Some(event_id)) => match self.record_event(id, &event_id) {
                Ok((appt, true)) => {
                    details.appointment = appt;
                    None
                }
                Ok((appt, false)) => {
                    // Cancelled while the event was being created.
                    details.appointment = appt;
                    self.discard_event(id, &event_id).await
                }
                Err(e) => {
                    tracing::warn!(appointment_id = id, error = %e, "failed to record calendar event id");
                    Some(format!("calendar event created but not recorded: {e}"))
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(appointment_id = id, error = %e, "calendar sync failed");
                Some(format!("calendar sync failed: {e}"))
            }
        };

        BookingOutcome {
            appointment: details,
            calendar_warning,
        }
    }

    /// Stores `event_id` unless the appointment has been cancelled since it
    /// was committed. Returns the stored row and whether the id was kept.
    fn record_event(&self, id: i64, event_id: &str) -> Result<(Appointment, bool), BookingError> {
        self.with_locked(id, None, |current| {
            if current.status == AppointmentStatus::Cancelled {
                return Ok((current, false));
            }
            let patch = AppointmentPatch {
                calendar_event_id: Some(event_id.to_string()),
                ..Default::default()
            };
            Ok((self.store.update_appointment(id, &patch)?, true))
        })
    }

    async fn discard_event(&self, id: i64, event_id: &str) -> Option<String> {
        match self.calendar.delete_event(event_id).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(appointment_id = id, error = %e, "failed to remove calendar event");
                Some(format!("calendar sync failed: {e}"))
            }
        }
    }

    async fn retract(&self, details: AppointmentDetails) -> BookingOutcome {
        let mut calendar_warning = None;
        if let Some(event_id) = &details.appointment.calendar_event_id {
            if let Err(e) = self.calendar.delete_event(event_id).await {
                tracing::warn!(
                    appointment_id = details.appointment.id,
                    error = %e,
                    "failed to remove calendar event"
                );
                calendar_warning = Some(format!("calendar sync failed: {e}"));
            }
        }

        BookingOutcome {
            appointment: details,
            calendar_warning,
        }
    }

    fn active_service(&self, id: i64) -> Result<Service, BookingError> {
        self.store
            .get_service(id)?
            .filter(|s| s.is_active)
            .ok_or_else(|| BookingError::NotFound(format!("service {id} not found")))
    }

    fn existing(&self, id: i64) -> Result<Appointment, BookingError> {
        self.store
            .get_appointment(id)?
            .ok_or_else(|| BookingError::NotFound(format!("appointment {id} not found")))
    }

    /// Runs `f` on a fresh read of appointment `id` while its date, and
    /// `also` when given, are locked. Retries if the appointment moves to
    /// another date before the locks are taken.
    fn with_locked<T>(
        &self,
        id: i64,
        also: Option<NaiveDate>,
        f: impl FnOnce(Appointment) -> Result<T, BookingError>,
    ) -> Result<T, BookingError> {
        loop {
            let seen = self.existing(id)?.appointment_date;
            let mut dates = vec![seen];
            dates.extend(also);

            let locks = self.locks.for_dates(&dates);
            let _guards: Vec<_> = locks
                .iter()
                .map(|lock| lock.lock().unwrap_or_else(PoisonError::into_inner))
                .collect();

            let current = self.existing(id)?;
            if current.appointment_date == seen {
                return f(current);
            }
        }
    }

    fn details(&self, id: i64) -> Result<AppointmentDetails, BookingError> {
        self.store
            .appointment_details(id)?
            .ok_or_else(|| BookingError::NotFound(format!("appointment {id} not found")))
    }

    fn bookable_range(
        &self,
        date: NaiveDate,
        start: TimeOfDay,
        duration: u32,
    ) -> Result<TimeRange, BookingError> {
        let hours = self.hours.hours_for(date).ok_or_else(|| {
            BookingError::InvalidInput(format!("closed on {}", date.format("%A, %Y-%m-%d")))
        })?;

        let fits = start
            .minutes()
            .checked_add(duration)
            .is_some_and(|end| end <= hours.end.minutes());
        if !fits {
            return Err(BookingError::InvalidInput(format!(
                "a {duration}-minute appointment starting at {start} runs past closing time ({})",
                hours.end
            )));
        }

        let range = TimeRange::starting_at(start, duration);
        if !hours.contains(&range) {
            return Err(BookingError::InvalidInput(format!(
                "{range} is outside business hours ({}-{})",
                hours.start, hours.end
            )));
        }
        Ok(range)
    }

    /// Email is the dedup key. A concurrent insert of the same email loses
    /// the unique-constraint race and picks up the winner's record.
    fn resolve_customer(&self, customer: &CustomerRef) -> Result<Customer, BookingError> {
        let new = match customer {
            CustomerRef::Id(id) => {
                return self
                    .store
                    .get_customer(*id)?
                    .filter(|c| c.is_active)
                    .ok_or_else(|| BookingError::NotFound(format!("customer {id} not found")));
            }
            CustomerRef::Details(new) => new,
        };

        if let Some(customer) = self.store.find_customer_by_email(&new.email)? {
            return active(customer);
        }

        match self.store.create_customer(new) {
            Ok(customer) => Ok(customer),
            Err(StoreError::Conflict(msg)) => self
                .store
                .find_customer_by_email(&new.email)?
                .ok_or(BookingError::Conflict(msg))
                .and_then(active),
            Err(e) => Err(e.into()),
        }
    }
}

fn conflict(date: NaiveDate, range: &TimeRange, clash: &BookedInterval) -> BookingError {
    BookingError::Conflict(format!(
        "time slot {range} on {date} conflicts with existing appointment {} ({})",
        clash.id,
        clash.time_range()
    ))
}

/// Deactivated customers keep their email but cannot book.
fn active(customer: Customer) -> Result<Customer, BookingError> {
    if customer.is_active {
        Ok(customer)
    } else {
        Err(BookingError::Conflict(format!(
            "customer {} ({}) is deactivated",
            customer.id, customer.email
        )))
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use rusqlite::Connection;
    use serde_json::Map;

    use crate::db::{self, queries, SqliteStore};
    use crate::models::{overlaps, parse_date, parse_time};

    const HAIR_STYLING: i64 = 1; // 90 minutes
    const FACIAL: i64 = 3; // 60 minutes

    #[derive(Default)]
    struct RecordingCalendar {
        calls: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl CalendarSync for RecordingCalendar {
        async fn create_event(&self, appt: &AppointmentDetails) -> anyhow::Result<Option<String>> {
            self.calls.lock().unwrap().push(format!("create {}", appt.appointment.id));
            Ok(Some(format!("evt-{}", appt.appointment.id)))
        }

        async fn update_event(&self, event_id: &str, _appt: &AppointmentDetails) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(format!("update {event_id}"));
            Ok(())
        }

        async fn delete_event(&self, event_id: &str) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(format!("delete {event_id}"));
            Ok(())
        }
    }

    struct FailingCalendar;

    #[async_trait]
    impl CalendarSync for FailingCalendar {
        async fn create_event(&self, _appt: &AppointmentDetails) -> anyhow::Result<Option<String>> {
            anyhow::bail!("calendar API timed out")
        }

        async fn update_event(&self, _event_id: &str, _appt: &AppointmentDetails) -> anyhow::Result<()> {
            anyhow::bail!("calendar API timed out")
        }

        async fn delete_event(&self, _event_id: &str) -> anyhow::Result<()> {
            anyhow::bail!("calendar API timed out")
        }
    }

    fn setup_with(calendar: Arc<dyn CalendarSync>) -> (BookingService, Arc<StdMutex<Connection>>) {
        let conn = db::init_db(":memory:").unwrap();
        queries::seed_default_services(&conn).unwrap();
        let db = Arc::new(StdMutex::new(conn));
        let service = BookingService::new(
            Arc::new(SqliteStore::new(Arc::clone(&db))),
            calendar,
            WeeklyHours::default(),
            30,
        );
        (service, db)
    }

    fn setup() -> BookingService {
        setup_with(Arc::new(crate::services::calendar::NoopCalendar)).0
    }

    fn customer(email: &str) -> CustomerRef {
        CustomerRef::Details(NewCustomer {
            name: "Jane Doe".to_string(),
            email: email.to_string(),
            phone: Some("555-0100".to_string()),
            address: None,
            preferences: Map::new(),
        })
    }

    fn request(service_id: i64, date: &str, start: &str) -> BookingRequest {
        BookingRequest {
            customer: customer("jane@example.com"),
            service_id,
            date: parse_date(date).unwrap(),
            start_time: parse_time(start).unwrap(),
            special_requests: None,
        }
    }

    fn reschedule_to(start: &str) -> AppointmentChanges {
        AppointmentChanges {
            start_time: Some(parse_time(start).unwrap()),
            ..Default::default()
        }
    }

    fn assert_no_overlaps(db: &Arc<StdMutex<Connection>>, date: &str) {
        let conn = db.lock().unwrap();
        let bookings = queries::find_bookings_by_date(&conn, parse_date(date).unwrap()).unwrap();
        let live: Vec<_> = bookings.iter().filter(|b| b.status != AppointmentStatus::Cancelled).collect();
        for (i, a) in live.iter().enumerate() {
            for b in &live[i + 1..] {
                assert!(
                    !overlaps(a.start, a.end, b.start, b.end),
                    "{} and {} overlap",
                    a.time_range(),
                    b.time_range()
                );
            }
        }
    }

    #[tokio::test]
    async fn test_create_snapshots_price_and_derives_end() {
        let service = setup();
        let outcome = service.create(request(HAIR_STYLING, "2024-02-15", "10:00")).await.unwrap();

        let appt = &outcome.appointment.appointment;
        assert_eq!(appt.start_time.to_string(), "10:00");
        assert_eq!(appt.end_time.to_string(), "11:30");
        assert_eq!(appt.status, AppointmentStatus::Confirmed);
        assert_eq!(appt.total_price.to_string(), "75.00");
        assert_eq!(outcome.appointment.service.name, "Hair Styling");
        assert_eq!(outcome.appointment.customer.email, "jane@example.com");
        assert!(outcome.calendar_warning.is_none());
    }

    #[tokio::test]
    async fn test_same_interval_twice_conflicts() {
        let service = setup();
        service.create(request(FACIAL, "2024-02-15", "10:00")).await.unwrap();

        let err = service.create(request(FACIAL, "2024-02-15", "10:00")).await.unwrap_err();
        assert!(matches!(err, BookingError::Conflict(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_overlap_rejected_touching_accepted() {
        let service = setup();
        service.create(request(HAIR_STYLING, "2024-02-15", "10:00")).await.unwrap();

        let err = service.create(request(HAIR_STYLING, "2024-02-15", "11:00")).await.unwrap_err();
        assert!(matches!(err, BookingError::Conflict(_)));

        let outcome = service.create(request(HAIR_STYLING, "2024-02-15", "11:30")).await.unwrap();
        assert_eq!(outcome.appointment.appointment.end_time.to_string(), "13:00");
    }

    #[tokio::test]
    async fn test_customer_matched_by_email() {
        let service = setup();
        let first = service.create(request(FACIAL, "2024-02-15", "09:00")).await.unwrap();
        let second = service.create(request(FACIAL, "2024-02-15", "10:00")).await.unwrap();
        assert_eq!(first.appointment.customer.id, second.appointment.customer.id);

        let mut other = request(FACIAL, "2024-02-15", "11:00");
        other.customer = customer("JANE@example.com");
        let third = service.create(other).await.unwrap();
        assert_ne!(third.appointment.customer.id, first.appointment.customer.id);
    }

    #[tokio::test]
    async fn test_book_existing_customer_by_id() {
        let service = setup();
        let first = service.create(request(FACIAL, "2024-02-15", "09:00")).await.unwrap();

        let mut req = request(FACIAL, "2024-02-15", "10:00");
        req.customer = CustomerRef::Id(first.appointment.customer.id);
        let second = service.create(req).await.unwrap();
        assert_eq!(second.appointment.customer.id, first.appointment.customer.id);

        let mut req = request(FACIAL, "2024-02-15", "12:00");
        req.customer = CustomerRef::Id(999);
        assert!(matches!(service.create(req).await, Err(BookingError::NotFound(_))));
    }

    fn deactivate_customer(db: &Arc<StdMutex<Connection>>, id: i64) {
        let conn = db.lock().unwrap();
        let mut customer = queries::get_customer(&conn, id).unwrap().unwrap();
        customer.is_active = false;
        queries::save_customer(&conn, &customer).unwrap();
    }

    #[tokio::test]
    async fn test_deactivated_customer_cannot_book_by_id() {
        let (service, db) = setup_with(Arc::new(crate::services::calendar::NoopCalendar));
        let first = service.create(request(FACIAL, "2024-02-15", "09:00")).await.unwrap();
        let customer_id = first.appointment.customer.id;
        service.cancel(first.appointment.appointment.id, "system").await.unwrap();
        deactivate_customer(&db, customer_id);

        let mut req = request(FACIAL, "2024-02-15", "10:00");
        req.customer = CustomerRef::Id(customer_id);
        let err = service.create(req).await.unwrap_err();
        assert!(matches!(err, BookingError::NotFound(_)), "got {err:?}");

        let conn = db.lock().unwrap();
        let bookings = queries::find_bookings_by_date(&conn, parse_date("2024-02-15").unwrap()).unwrap();
        assert!(bookings.iter().all(|b| b.status == AppointmentStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_deactivated_customer_cannot_book_by_email() {
        let (service, db) = setup_with(Arc::new(crate::services::calendar::NoopCalendar));
        let first = service.create(request(FACIAL, "2024-02-15", "09:00")).await.unwrap();
        service.cancel(first.appointment.appointment.id, "system").await.unwrap();
        deactivate_customer(&db, first.appointment.customer.id);

        let err = service.create(request(FACIAL, "2024-02-15", "10:00")).await.unwrap_err();
        assert!(matches!(err, BookingError::Conflict(_)), "got {err:?}");
        assert!(err.to_string().contains("deactivated"));
    }

    #[tokio::test]
    async fn test_failed_booking_creates_no_customer() {
        let (service, db) = setup_with(Arc::new(crate::services::calendar::NoopCalendar));
        service.create(request(FACIAL, "2024-02-15", "10:00")).await.unwrap();

        let mut req = request(FACIAL, "2024-02-15", "10:30");
        req.customer = customer("late@example.com");
        assert!(service.create(req).await.is_err());

        let conn = db.lock().unwrap();
        assert!(queries::get_customer_by_email(&conn, "late@example.com").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_customer_details() {
        let service = setup();
        let mut req = request(FACIAL, "2024-02-15", "10:00");
        req.customer = customer("not-an-email");
        assert!(matches!(service.create(req).await, Err(BookingError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_unknown_or_inactive_service() {
        let (service, db) = setup_with(Arc::new(crate::services::calendar::NoopCalendar));
        assert!(matches!(
            service.create(request(999, "2024-02-15", "10:00")).await,
            Err(BookingError::NotFound(_))
        ));

        {
            let conn = db.lock().unwrap();
            let mut facial = queries::get_service(&conn, FACIAL).unwrap().unwrap();
            facial.is_active = false;
            queries::save_service(&conn, &facial).unwrap();
        }
        assert!(matches!(
            service.create(request(FACIAL, "2024-02-15", "10:00")).await,
            Err(BookingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_day_and_outside_hours() {
        let service = setup();
        // 2024-02-18 is a Sunday
        let err = service.create(request(FACIAL, "2024-02-18", "10:00")).await.unwrap_err();
        assert!(matches!(err, BookingError::InvalidInput(_)));

        let err = service.create(request(HAIR_STYLING, "2024-02-15", "18:00")).await.unwrap_err();
        assert!(matches!(err, BookingError::InvalidInput(_)));

        let err = service.create(request(FACIAL, "2024-02-15", "08:30")).await.unwrap_err();
        assert!(matches!(err, BookingError::InvalidInput(_)));

        service.create(request(FACIAL, "2024-02-15", "18:00")).await.unwrap();
    }

    #[tokio::test]
    async fn test_duration_longer_than_opening_hours() {
        let (service, db) = setup_with(Arc::new(crate::services::calendar::NoopCalendar));
        for minutes in [610, 1440, 1500] {
            {
                let conn = db.lock().unwrap();
                let mut facial = queries::get_service(&conn, FACIAL).unwrap().unwrap();
                facial.duration_minutes = minutes;
                queries::save_service(&conn, &facial).unwrap();
            }

            for start in ["09:00", "10:00"] {
                let err = service.create(request(FACIAL, "2024-02-15", start)).await.unwrap_err();
                assert!(matches!(err, BookingError::InvalidInput(_)), "{minutes} min at {start}: {err:?}");
            }

            let report = service.availability(parse_date("2024-02-15").unwrap(), FACIAL).unwrap();
            assert!(report.available_slots.is_empty());
        }

        let conn = db.lock().unwrap();
        assert!(queries::find_bookings_by_date(&conn, parse_date("2024-02-15").unwrap()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_availability_reflects_bookings() {
        let service = setup();
        let date = parse_date("2024-02-15").unwrap();

        let before = service.availability(date, FACIAL).unwrap();
        assert_eq!(before.available_slots.len(), 19);
        assert_eq!(before.service.duration_minutes, 60);

        service.create(request(FACIAL, "2024-02-15", "10:00")).await.unwrap();
        let after = service.availability(date, FACIAL).unwrap();
        let starts: Vec<String> = after.available_slots.iter().map(|s| s.start.to_string()).collect();
        assert!(!starts.contains(&"09:30".to_string()));
        assert!(!starts.contains(&"10:30".to_string()));
        assert!(starts.contains(&"09:00".to_string()));
        assert!(starts.contains(&"11:00".to_string()));
    }

    #[tokio::test]
    async fn test_availability_closed_day_is_empty() {
        let service = setup();
        let report = service.availability(parse_date("2024-02-18").unwrap(), FACIAL).unwrap();
        assert!(report.available_slots.is_empty());
        assert!(report.business_hours.is_none());

        assert!(matches!(
            service.availability(parse_date("2024-02-15").unwrap(), 999),
            Err(BookingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reschedule_excludes_itself() {
        let service = setup();
        let booked = service.create(request(HAIR_STYLING, "2024-02-15", "10:00")).await.unwrap();
        let id = booked.appointment.appointment.id;

        // Overlaps its own prior interval only
        let moved = service.update(id, reschedule_to("10:30")).await.unwrap();
        assert_eq!(moved.appointment.appointment.start_time.to_string(), "10:30");
        assert_eq!(moved.appointment.appointment.end_time.to_string(), "12:00");

        let same = service.update(id, reschedule_to("10:30")).await.unwrap();
        assert_eq!(same.appointment.appointment.end_time.to_string(), "12:00");
    }

    #[tokio::test]
    async fn test_reschedule_onto_other_appointment_conflicts() {
        let service = setup();
        service.create(request(FACIAL, "2024-02-15", "10:00")).await.unwrap();
        let other = service.create(request(FACIAL, "2024-02-15", "14:00")).await.unwrap();

        let err = service
            .update(other.appointment.appointment.id, reschedule_to("10:30"))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Conflict(_)));

        let err = service.update(999, reschedule_to("10:30")).await.unwrap_err();
        assert!(matches!(err, BookingError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reschedule_keeps_booked_duration() {
        let (service, db) = setup_with(Arc::new(crate::services::calendar::NoopCalendar));
        let booked = service.create(request(FACIAL, "2024-02-15", "10:00")).await.unwrap();

        {
            let conn = db.lock().unwrap();
            let mut facial = queries::get_service(&conn, FACIAL).unwrap().unwrap();
            facial.duration_minutes = 120;
            queries::save_service(&conn, &facial).unwrap();
        }

        let moved = service
            .update(
                booked.appointment.appointment.id,
                AppointmentChanges {
                    date: Some(parse_date("2024-02-16").unwrap()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let appt = moved.appointment.appointment;
        assert_eq!(appt.appointment_date, parse_date("2024-02-16").unwrap());
        assert_eq!(appt.time_range().to_string(), "10:00-11:00");
    }

    #[tokio::test]
    async fn test_status_and_notes_update() {
        let service = setup();
        let booked = service.create(request(FACIAL, "2024-02-15", "10:00")).await.unwrap();
        let id = booked.appointment.appointment.id;

        let updated = service
            .update(
                id,
                AppointmentChanges {
                    status: Some(AppointmentStatus::Completed),
                    notes: Some("Used the lavender oil".to_string()),
                    payment_status: Some(PaymentStatus::Paid),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let appt = updated.appointment.appointment;
        assert_eq!(appt.status, AppointmentStatus::Completed);
        assert_eq!(appt.notes.as_deref(), Some("Used the lavender oil"));
        assert_eq!(appt.payment_status, PaymentStatus::Paid);
        assert_eq!(appt.time_range().to_string(), "10:00-11:00");
    }

    #[tokio::test]
    async fn test_cancel_frees_slot_and_is_idempotent() {
        let service = setup();
        let booked = service.create(request(FACIAL, "2024-02-15", "10:00")).await.unwrap();
        let id = booked.appointment.appointment.id;

        let cancelled = service.cancel(id, "front desk").await.unwrap();
        let first = cancelled.appointment.appointment;
        assert_eq!(first.status, AppointmentStatus::Cancelled);
        assert_eq!(first.cancelled_by.as_deref(), Some("front desk"));
        assert!(first.cancelled_at.is_some());

        let again = service.cancel(id, "someone else").await.unwrap();
        let second = again.appointment.appointment;
        assert_eq!(second.cancelled_by.as_deref(), Some("front desk"));
        assert_eq!(second.cancelled_at, first.cancelled_at);

        service.create(request(FACIAL, "2024-02-15", "10:00")).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_defaults_actor_and_status_route() {
        let service = setup();
        let booked = service.create(request(FACIAL, "2024-02-15", "10:00")).await.unwrap();
        let id = booked.appointment.appointment.id;

        let cancelled = service
            .update(
                id,
                AppointmentChanges {
                    status: Some(AppointmentStatus::Cancelled),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cancelled.appointment.appointment.cancelled_by.as_deref(), Some("system"));

        assert!(matches!(
            service.cancel(999, "system").await,
            Err(BookingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_appointment_cannot_be_reopened() {
        let service = setup();
        let booked = service.create(request(FACIAL, "2024-02-15", "10:00")).await.unwrap();
        let id = booked.appointment.appointment.id;
        service.cancel(id, "system").await.unwrap();

        let err = service.update(id, reschedule_to("12:00")).await.unwrap_err();
        assert!(matches!(err, BookingError::Conflict(_)));

        let err = service
            .update(
                id,
                AppointmentChanges {
                    status: Some(AppointmentStatus::Confirmed),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Conflict(_)));

        let noted = service
            .update(
                id,
                AppointmentChanges {
                    notes: Some("Called to apologise".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(noted.appointment.appointment.notes.as_deref(), Some("Called to apologise"));
    }

    #[tokio::test]
    async fn test_calendar_event_lifecycle() {
        let calendar = Arc::new(RecordingCalendar::default());
        let (service, _db) = setup_with(calendar.clone());

        let booked = service.create(request(FACIAL, "2024-02-15", "10:00")).await.unwrap();
        let id = booked.appointment.appointment.id;
        let event_id = format!("evt-{id}");
        assert_eq!(booked.appointment.appointment.calendar_event_id.as_deref(), Some(event_id.as_str()));

        service.update(id, reschedule_to("12:00")).await.unwrap();
        service.cancel(id, "system").await.unwrap();
        service.cancel(id, "system").await.unwrap();

        let calls = calendar.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![format!("create {id}"), format!("update {event_id}"), format!("delete {event_id}")]
        );
    }

    #[tokio::test]
    async fn test_calendar_failure_keeps_booking() {
        let (service, db) = setup_with(Arc::new(FailingCalendar));

        let outcome = service.create(request(FACIAL, "2024-02-15", "10:00")).await.unwrap();
        let warning = outcome.calendar_warning.unwrap();
        assert!(warning.contains("calendar API timed out"), "{warning}");
        assert!(outcome.appointment.appointment.calendar_event_id.is_none());

        let conn = db.lock().unwrap();
        let stored = queries::get_appointment(&conn, outcome.appointment.appointment.id).unwrap();
        assert_eq!(stored.unwrap().status, AppointmentStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_event_created_after_cancel_is_discarded() {
        let (service, db) = setup_with(Arc::new(crate::services::calendar::NoopCalendar));
        let calendar = Arc::new(RecordingCalendar::default());
        let syncing = BookingService::new(
            Arc::new(SqliteStore::new(Arc::clone(&db))),
            calendar.clone(),
            WeeklyHours::default(),
            30,
        );

        let booked = service.create(request(FACIAL, "2024-02-15", "10:00")).await.unwrap();
        let id = booked.appointment.appointment.id;
        service.cancel(id, "front desk").await.unwrap();

        // Publish a snapshot taken before the cancel landed.
        let outcome = syncing.publish(booked.appointment).await;
        assert!(outcome.calendar_warning.is_none());
        assert_eq!(outcome.appointment.appointment.status, AppointmentStatus::Cancelled);
        assert!(outcome.appointment.appointment.calendar_event_id.is_none());

        let calls = calendar.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![format!("create {id}"), format!("delete evt-{id}")]);

        let conn = db.lock().unwrap();
        let stored = queries::get_appointment(&conn, id).unwrap().unwrap();
        assert!(stored.calendar_event_id.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reschedule_racing_cancel_never_moves_cancelled_row() {
        let service = Arc::new(setup());

        for round in 0..10 {
            let start = format!("{:02}:00", 9 + round);
            let booked = service.create(request(FACIAL, "2024-02-16", &start)).await.unwrap();
            let id = booked.appointment.appointment.id;

            let mover = Arc::clone(&service);
            let reschedule = tokio::spawn(async move {
                let changes = AppointmentChanges {
                    date: Some(parse_date("2024-02-15").unwrap()),
                    ..Default::default()
                };
                mover.update(id, changes).await
            });
            let canceller = Arc::clone(&service);
            let cancel = tokio::spawn(async move { canceller.cancel(id, "system").await });

            let cancelled = cancel.await.unwrap().unwrap();
            assert_eq!(cancelled.appointment.appointment.status, AppointmentStatus::Cancelled);

            match reschedule.await.unwrap() {
                Ok(moved) => {
                    // Moved first, then cancelled on the new date.
                    assert_ne!(moved.appointment.appointment.status, AppointmentStatus::Cancelled);
                    assert_eq!(
                        cancelled.appointment.appointment.appointment_date,
                        parse_date("2024-02-15").unwrap()
                    );
                }
                Err(BookingError::Conflict(_)) => {
                    assert_eq!(
                        cancelled.appointment.appointment.appointment_date,
                        parse_date("2024-02-16").unwrap()
                    );
                }
                Err(e) => panic!("unexpected error: {e:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_no_overlaps_after_mixed_operations() {
        let (service, db) = setup_with(Arc::new(crate::services::calendar::NoopCalendar));
        let starts = ["09:00", "09:30", "10:00", "11:00", "11:15", "12:30", "13:00", "15:00", "16:45"];

        let mut ids = Vec::new();
        for (i, start) in starts.iter().enumerate() {
            let service_id = if i % 2 == 0 { HAIR_STYLING } else { FACIAL };
            if let Ok(outcome) = service.create(request(service_id, "2024-02-15", start)).await {
                ids.push(outcome.appointment.appointment.id);
            }
        }
        assert!(!ids.is_empty());

        service.cancel(ids[0], "system").await.unwrap();
        for (id, start) in ids.iter().skip(1).zip(["09:00", "10:00", "14:00", "17:00"]) {
            let _ = service.update(*id, reschedule_to(start)).await;
        }
        for start in starts {
            let _ = service.create(request(FACIAL, "2024-02-15", start)).await;
        }

        assert_no_overlaps(&db, "2024-02-15");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_for_same_slot() {
        let (service, db) = setup_with(Arc::new(crate::services::calendar::NoopCalendar));
        let service = Arc::new(service);

        let mut handles = Vec::new();
        for i in 0..8 {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                let mut req = request(HAIR_STYLING, "2024-02-15", if i % 2 == 0 { "10:00" } else { "10:30" });
                req.customer = customer(&format!("guest{i}@example.com"));
                service.create(req).await
            }));
        }

        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(BookingError::Conflict(_)) => {}
                Err(e) => panic!("unexpected error: {e:?}"),
            }
        }

        assert_eq!(created, 1);
        assert_no_overlaps(&db, "2024-02-15");
    }
}
