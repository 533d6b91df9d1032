pub mod appointment;
pub mod business_hours;
pub mod customer;
pub mod money;
pub mod service;
pub mod time;

pub use appointment::{
    Appointment, AppointmentDetails, AppointmentPatch, AppointmentStatus, BookedInterval,
    NewAppointment, PaymentStatus,
};
pub use business_hours::{BusinessHours, WeeklyHours};
pub use customer::{Customer, CustomerPatch, CustomerSummary, NewCustomer};
pub use money::Money;
pub use service::{NewService, Service, ServicePatch, ServiceSummary};
pub use time::{overlaps, parse_date, parse_time, TimeOfDay, TimeRange};
