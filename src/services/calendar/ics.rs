use chrono::NaiveDateTime;

use crate::models::{AppointmentDetails, AppointmentStatus, TimeOfDay};

const ICS_FORMAT: &str = "%Y%m%dT%H%M%S";

/// A single-event calendar file for one appointment.
pub fn generate_ics(appt: &AppointmentDetails, business_name: &str) -> String {
    calendar(std::iter::once(appt), business_name)
}

/// A feed of every appointment in `appts`, in the order given.
pub fn generate_feed(appts: &[AppointmentDetails], business_name: &str) -> String {
    calendar(appts.iter(), business_name)
}

fn calendar<'a>(
    appts: impl Iterator<Item = &'a AppointmentDetails>,
    business_name: &str,
) -> String {
    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//Parlor//Appointments//EN".to_string(),
        format!("X-WR-CALNAME:{}", escape_text(business_name)),
    ];
    for appt in appts {
        lines.extend(vevent(appt, business_name));
    }
    lines.push("END:VCALENDAR".to_string());

    let mut out = lines.join("\r\n");
    out.push_str("\r\n");
    out
}

fn vevent(details: &AppointmentDetails, business_name: &str) -> Vec<String> {
    let appt = &details.appointment;
    let stamp = |time: TimeOfDay| -> String {
        appt.appointment_date
            .and_hms_opt(time.minutes() / 60, time.minutes() % 60, 0)
            .map(|dt: NaiveDateTime| dt.format(ICS_FORMAT).to_string())
            .unwrap_or_default()
    };

    let status = match appt.status {
        AppointmentStatus::Pending => "TENTATIVE",
        AppointmentStatus::Cancelled => "CANCELLED",
        AppointmentStatus::Confirmed | AppointmentStatus::Completed => "CONFIRMED",
    };

    let mut description = format!(
        "Customer: {} <{}>",
        details.customer.name, details.customer.email
    );
    if let Some(phone) = &details.customer.phone {
        description.push_str(&format!("\nPhone: {phone}"));
    }
    if let Some(requests) = appt.special_requests.as_deref().filter(|s| !s.is_empty()) {
        description.push_str(&format!("\nSpecial requests: {requests}"));
    }
    description.push_str(&format!("\nBooking #{}", appt.id));

    vec![
        "BEGIN:VEVENT".to_string(),
        format!("UID:appointment-{}@parlor", appt.id),
        format!("DTSTAMP:{}", appt.updated_at.format(ICS_FORMAT)),
        format!("DTSTART:{}", stamp(appt.start_time)),
        format!("DTEND:{}", stamp(appt.end_time)),
        format!(
            "SUMMARY:{}",
            escape_text(&format!("{business_name} Appointment - {}", details.service.name))
        ),
        format!("DESCRIPTION:{}", escape_text(&description)),
        format!("STATUS:{status}"),
        "END:VEVENT".to_string(),
    ]
}

/// RFC 5545 TEXT escaping.
fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            _ => out.push(c),
        }
    }
    out
}
