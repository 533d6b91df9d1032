use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDate;
use rusqlite::Connection;

use super::queries;
use crate::errors::StoreError;
use crate::models::{
    Appointment, AppointmentDetails, AppointmentPatch, BookedInterval, Customer, NewAppointment,
    NewCustomer, Service,
};
use crate::services::booking::BookingStore;

/// `BookingStore` over the shared SQLite connection.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.db
            .lock()
            .map_err(|_| StoreError::Unavailable("database connection lock poisoned".to_string()))
    }
}

impl BookingStore for SqliteStore {
    fn find_bookings_by_date(&self, date: NaiveDate) -> Result<Vec<BookedInterval>, StoreError> {
        let conn = self.conn()?;
        Ok(queries::find_bookings_by_date(&conn, date)?)
    }

    fn get_service(&self, id: i64) -> Result<Option<Service>, StoreError> {
        let conn = self.conn()?;
        Ok(queries::get_service(&conn, id)?)
    }

    fn get_customer(&self, id: i64) -> Result<Option<Customer>, StoreError> {
        let conn = self.conn()?;
        Ok(queries::get_customer(&conn, id)?)
    }

    fn find_customer_by_email(&self, email: &str) -> Result<Option<Customer>, StoreError> {
        let conn = self.conn()?;
        Ok(queries::get_customer_by_email(&conn, email)?)
    }

    fn create_customer(&self, new: &NewCustomer) -> Result<Customer, StoreError> {
        let conn = self.conn()?;
        Ok(queries::create_customer(&conn, new)?)
    }

    fn get_appointment(&self, id: i64) -> Result<Option<Appointment>, StoreError> {
        let conn = self.conn()?;
        Ok(queries::get_appointment(&conn, id)?)
    }

    fn create_appointment(&self, new: &NewAppointment) -> Result<Appointment, StoreError> {
        let conn = self.conn()?;
        Ok(queries::insert_appointment(&conn, new)?)
    }

    fn update_appointment(
        &self,
        id: i64,
        patch: &AppointmentPatch,
    ) -> Result<Appointment, StoreError> {
        let conn = self.conn()?;
        let mut appt = queries::get_appointment(&conn, id)?
            .ok_or_else(|| StoreError::NotFound(format!("appointment {id}")))?;

        patch.apply(&mut appt);
        if !queries::save_appointment(&conn, &appt)? {
            return Err(StoreError::NotFound(format!("appointment {id}")));
        }

        queries::get_appointment(&conn, id)?
            .ok_or_else(|| StoreError::NotFound(format!("appointment {id}")))
    }

    fn appointment_details(&self, id: i64) -> Result<Option<AppointmentDetails>, StoreError> {
        let conn = self.conn()?;
        Ok(queries::get_appointment_details(&conn, id)?)
    }
}
