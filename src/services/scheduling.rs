//! Slot generation and conflict detection.
//!
//! Everything here is pure: callers hand in a snapshot of the bookings for a
//! date and are responsible for serializing check-then-write sequences.

use chrono::NaiveDate;

use crate::models::{AppointmentStatus, BookedInterval, BusinessHours, TimeOfDay, TimeRange};

pub const DEFAULT_SLOT_GRANULARITY: u32 = 30;

/// Bookings on `date` that still hold their interval, minus `exclude_id`.
fn holding<'a>(
    existing: &'a [BookedInterval],
    date: NaiveDate,
    exclude_id: Option<i64>,
) -> impl Iterator<Item = &'a BookedInterval> + Clone + 'a {
    existing.iter().filter(move |b| {
        b.date == date && b.status != AppointmentStatus::Cancelled && Some(b.id) != exclude_id
    })
}

/// Open start times for a service of `service_duration` minutes.
///
/// Candidates start at `hours.start` and advance by `granularity_minutes`;
/// a candidate is kept when it ends no later than `hours.end` and overlaps
/// no booking on `date`. The iterator is lazy and can be cloned to replay.
pub fn generate_slots<'a>(
    date: NaiveDate,
    hours: BusinessHours,
    granularity_minutes: u32,
    service_duration: u32,
    existing: &'a [BookedInterval],
) -> impl Iterator<Item = TimeRange> + Clone + 'a {
    let open = hours.start.minutes();
    let close = hours.end.minutes();
    let step = granularity_minutes.max(1) as usize;
    let booked = holding(existing, date, None);

    (open..close).step_by(step).filter_map(move |start| {
        let end = start.checked_add(service_duration)?;
        if end > close {
            return None;
        }
        let slot = TimeRange::new(TimeOfDay::from_minutes(start)?, TimeOfDay::from_minutes(end)?);
        let taken = booked.clone().any(|b| b.time_range().overlaps(&slot));
        (!taken).then_some(slot)
    })
}

/// First booking on `date` that overlaps `proposed`.
pub fn find_conflict<'a>(
    date: NaiveDate,
    proposed: &TimeRange,
    existing: &'a [BookedInterval],
    exclude_id: Option<i64>,
) -> Option<&'a BookedInterval> {
    holding(existing, date, exclude_id).find(|b| b.time_range().overlaps(proposed))
}

pub fn has_conflict(
    date: NaiveDate,
    proposed: &TimeRange,
    existing: &[BookedInterval],
    exclude_id: Option<i64>,
) -> bool {
    find_conflict(date, proposed, existing, exclude_id).is_some()
}
