use chrono::{NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{
    service, Appointment, AppointmentDetails, AppointmentStatus, BookedInterval, Customer,
    CustomerSummary, Money, NewAppointment, NewCustomer, NewService, PaymentStatus, Service,
    ServiceSummary, TimeOfDay,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

fn now_ts() -> String {
    Utc::now().naive_utc().format(TS_FORMAT).to_string()
}

fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn get_ts(row: &Row, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let s: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&s, TS_FORMAT).map_err(|e| conversion_err(idx, e))
}

fn get_opt_ts(row: &Row, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| NaiveDateTime::parse_from_str(&s, TS_FORMAT).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

fn get_date(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let s: String = row.get(idx)?;
    NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| conversion_err(idx, e))
}

fn get_time(row: &Row, idx: usize) -> rusqlite::Result<TimeOfDay> {
    let s: String = row.get(idx)?;
    TimeOfDay::parse(&s).map_err(|e| conversion_err(idx, e))
}

fn get_money(row: &Row, idx: usize) -> rusqlite::Result<Money> {
    let cents: i64 = row.get(idx)?;
    Money::from_cents(cents).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, cents))
}

fn date_str(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> rusqlite::Result<Vec<T>> {
    rows.collect()
}

/// Numbered WHERE clause builder for optional list filters.
#[derive(Default)]
struct Filter {
    clauses: Vec<String>,
    params: Vec<Box<dyn ToSql>>,
}

impl Filter {
    fn push(&mut self, clause: impl FnOnce(usize) -> String, value: impl ToSql + 'static) {
        self.params.push(Box::new(value));
        self.clauses.push(clause(self.params.len()));
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }

    fn params_with<'a>(&'a self, extra: &[&'a dyn ToSql]) -> Vec<&'a dyn ToSql> {
        self.params
            .iter()
            .map(|p| p.as_ref())
            .chain(extra.iter().copied())
            .collect()
    }
}

// ── Services ──

const SERVICE_COLUMNS: &str = "id, name, slug, description, duration_minutes, price_cents, category, is_active, image_url, created_at, updated_at";

fn parse_service_row(row: &Row) -> rusqlite::Result<Service> {
    Ok(Service {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        description: row.get(3)?,
        duration_minutes: row.get(4)?,
        price: get_money(row, 5)?,
        category: row.get(6)?,
        is_active: row.get(7)?,
        image_url: row.get(8)?,
        created_at: get_ts(row, 9)?,
        updated_at: get_ts(row, 10)?,
    })
}

pub fn list_services(
    conn: &Connection,
    category: Option<&str>,
    is_active: Option<bool>,
) -> rusqlite::Result<Vec<Service>> {
    let mut filter = Filter::default();
    if let Some(category) = category {
        filter.push(|n| format!("category = ?{n}"), category.to_string());
    }
    if let Some(is_active) = is_active {
        filter.push(|n| format!("is_active = ?{n}"), is_active);
    }

    let sql = format!(
        "SELECT {SERVICE_COLUMNS} FROM services {} ORDER BY name ASC",
        filter.where_sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(filter.params_with(&[]).as_slice(), parse_service_row)?;
    collect(rows)
}

pub fn list_categories(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT category FROM services WHERE category IS NOT NULL AND category != '' ORDER BY category ASC",
    )?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    collect(rows)
}

pub fn get_service(conn: &Connection, id: i64) -> rusqlite::Result<Option<Service>> {
    conn.query_row(
        &format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?1"),
        params![id],
        parse_service_row,
    )
    .optional()
}

pub fn get_service_by_slug(conn: &Connection, slug: &str) -> rusqlite::Result<Option<Service>> {
    conn.query_row(
        &format!("SELECT {SERVICE_COLUMNS} FROM services WHERE slug = ?1"),
        params![slug],
        parse_service_row,
    )
    .optional()
}

pub fn create_service(conn: &Connection, new: &NewService) -> rusqlite::Result<Service> {
    let now = now_ts();
    conn.execute(
        "INSERT INTO services (name, slug, description, duration_minutes, price_cents, category, is_active, image_url, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?8)",
        params![
            new.name,
            new.slug,
            new.description,
            new.duration_minutes,
            new.price.cents(),
            new.category,
            new.image_url,
            now,
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_service(conn, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

pub fn save_service(conn: &Connection, service: &Service) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE services SET name = ?1, slug = ?2, description = ?3, duration_minutes = ?4,
           price_cents = ?5, category = ?6, is_active = ?7, image_url = ?8, updated_at = ?9
         WHERE id = ?10",
        params![
            service.name,
            service.slug,
            service.description,
            service.duration_minutes,
            service.price.cents(),
            service.category,
            service.is_active,
            service.image_url,
            now_ts(),
            service.id,
        ],
    )?;
    Ok(count > 0)
}

pub fn delete_service(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    let count = conn.execute("DELETE FROM services WHERE id = ?1", params![id])?;
    Ok(count > 0)
}

pub fn count_appointments_for_service(conn: &Connection, id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM appointments WHERE service_id = ?1",
        params![id],
        |row| row.get(0),
    )
}

/// Installs the default catalogue when the services table is empty.
pub fn seed_default_services(conn: &Connection) -> rusqlite::Result<usize> {
    let existing: i64 = conn.query_row("SELECT COUNT(*) FROM services", [], |row| row.get(0))?;
    if existing > 0 {
        return Ok(0);
    }

    let catalogue = service::default_catalogue();
    for new in &catalogue {
        create_service(conn, new)?;
    }
    Ok(catalogue.len())
}

// ── Customers ──

const CUSTOMER_COLUMNS: &str =
    "id, name, email, phone, address, preferences, is_active, created_at, updated_at";

fn parse_customer_row(row: &Row) -> rusqlite::Result<Customer> {
    let preferences_json: String = row.get(5)?;
    let preferences = serde_json::from_str(&preferences_json).map_err(|e| conversion_err(5, e))?;

    Ok(Customer {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        address: row.get(4)?,
        preferences,
        is_active: row.get(6)?,
        created_at: get_ts(row, 7)?,
        updated_at: get_ts(row, 8)?,
    })
}

#[derive(Debug, Default)]
pub struct CustomerFilter<'a> {
    pub search: Option<&'a str>,
    pub is_active: Option<bool>,
}

pub fn list_customers(
    conn: &Connection,
    filter: &CustomerFilter,
    limit: i64,
    offset: i64,
) -> rusqlite::Result<(Vec<Customer>, i64)> {
    let mut where_ = Filter::default();
    if let Some(is_active) = filter.is_active {
        where_.push(|n| format!("is_active = ?{n}"), is_active);
    }
    if let Some(search) = filter.search.filter(|s| !s.trim().is_empty()) {
        let pattern = format!("%{}%", search.trim().to_lowercase());
        where_.push(
            |n| {
                format!(
                    "(LOWER(name) LIKE ?{n} OR LOWER(email) LIKE ?{n} OR LOWER(COALESCE(phone, '')) LIKE ?{n})"
                )
            },
            pattern,
        );
    }

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM customers {}", where_.where_sql()),
        where_.params_with(&[]).as_slice(),
        |row| row.get(0),
    )?;

    let n = where_.params.len();
    let sql = format!(
        "SELECT {CUSTOMER_COLUMNS} FROM customers {} ORDER BY name ASC LIMIT ?{} OFFSET ?{}",
        where_.where_sql(),
        n + 1,
        n + 2
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        where_.params_with(&[&limit, &offset]).as_slice(),
        parse_customer_row,
    )?;
    Ok((collect(rows)?, total))
}

pub fn get_customer(conn: &Connection, id: i64) -> rusqlite::Result<Option<Customer>> {
    conn.query_row(
        &format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = ?1"),
        params![id],
        parse_customer_row,
    )
    .optional()
}

/// Exact, case-sensitive email match.
pub fn get_customer_by_email(conn: &Connection, email: &str) -> rusqlite::Result<Option<Customer>> {
    conn.query_row(
        &format!("SELECT {CUSTOMER_COLUMNS} FROM customers WHERE email = ?1"),
        params![email],
        parse_customer_row,
    )
    .optional()
}

pub fn create_customer(conn: &Connection, new: &NewCustomer) -> rusqlite::Result<Customer> {
    let preferences = serde_json::to_string(&new.preferences)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let now = now_ts();
    conn.execute(
        "INSERT INTO customers (name, email, phone, address, preferences, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
        params![new.name, new.email, new.phone, new.address, preferences, now],
    )?;
    let id = conn.last_insert_rowid();
    get_customer(conn, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

pub fn save_customer(conn: &Connection, customer: &Customer) -> rusqlite::Result<bool> {
    let preferences = serde_json::to_string(&customer.preferences)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let count = conn.execute(
        "UPDATE customers SET name = ?1, email = ?2, phone = ?3, address = ?4, preferences = ?5,
           is_active = ?6, updated_at = ?7
         WHERE id = ?8",
        params![
            customer.name,
            customer.email,
            customer.phone,
            customer.address,
            preferences,
            customer.is_active,
            now_ts(),
            customer.id,
        ],
    )?;
    Ok(count > 0)
}

/// Pending or confirmed appointments that pin a customer record.
pub fn count_active_appointments_for_customer(conn: &Connection, id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM appointments WHERE customer_id = ?1 AND status IN ('pending', 'confirmed')",
        params![id],
        |row| row.get(0),
    )
}

// ── Appointments ──

const APPOINTMENT_COLUMNS: &str = "a.id, a.customer_id, a.service_id, a.appointment_date, a.start_time, a.end_time, a.status, a.total_price_cents, a.special_requests, a.notes, a.calendar_event_id, a.payment_status, a.cancelled_at, a.cancelled_by, a.created_at, a.updated_at";

const DETAILS_FROM: &str = "FROM appointments a
     JOIN customers c ON c.id = a.customer_id
     JOIN services s ON s.id = a.service_id";

fn parse_appointment_row(row: &Row) -> rusqlite::Result<Appointment> {
    let status: String = row.get(6)?;
    let payment_status: String = row.get(11)?;

    Ok(Appointment {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        service_id: row.get(2)?,
        appointment_date: get_date(row, 3)?,
        start_time: get_time(row, 4)?,
        end_time: get_time(row, 5)?,
        status: AppointmentStatus::parse(&status),
        total_price: get_money(row, 7)?,
        special_requests: row.get(8)?,
        notes: row.get(9)?,
        calendar_event_id: row.get(10)?,
        payment_status: PaymentStatus::parse(&payment_status),
        cancelled_at: get_opt_ts(row, 12)?,
        cancelled_by: row.get(13)?,
        created_at: get_ts(row, 14)?,
        updated_at: get_ts(row, 15)?,
    })
}

fn parse_details_row(row: &Row) -> rusqlite::Result<AppointmentDetails> {
    Ok(AppointmentDetails {
        appointment: parse_appointment_row(row)?,
        customer: CustomerSummary {
            id: row.get(16)?,
            name: row.get(17)?,
            email: row.get(18)?,
            phone: row.get(19)?,
        },
        service: ServiceSummary {
            id: row.get(20)?,
            name: row.get(21)?,
            duration_minutes: row.get(22)?,
            price: get_money(row, 23)?,
        },
    })
}

fn details_select() -> String {
    format!(
        "SELECT {APPOINTMENT_COLUMNS}, c.id, c.name, c.email, c.phone, s.id, s.name, s.duration_minutes, s.price_cents {DETAILS_FROM}"
    )
}

/// Every appointment on `date`, cancelled ones included.
pub fn find_bookings_by_date(conn: &Connection, date: NaiveDate) -> rusqlite::Result<Vec<BookedInterval>> {
    let mut stmt = conn.prepare(
        "SELECT id, appointment_date, start_time, end_time, status
         FROM appointments WHERE appointment_date = ?1 ORDER BY start_time ASC",
    )?;
    let rows = stmt.query_map(params![date_str(date)], |row| {
        let status: String = row.get(4)?;
        Ok(BookedInterval {
            id: row.get(0)?,
            date: get_date(row, 1)?,
            start: get_time(row, 2)?,
            end: get_time(row, 3)?,
            status: AppointmentStatus::parse(&status),
        })
    })?;
    collect(rows)
}

pub fn get_appointment(conn: &Connection, id: i64) -> rusqlite::Result<Option<Appointment>> {
    conn.query_row(
        &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments a WHERE a.id = ?1"),
        params![id],
        parse_appointment_row,
    )
    .optional()
}

pub fn get_appointment_details(
    conn: &Connection,
    id: i64,
) -> rusqlite::Result<Option<AppointmentDetails>> {
    conn.query_row(
        &format!("{} WHERE a.id = ?1", details_select()),
        params![id],
        parse_details_row,
    )
    .optional()
}

#[derive(Debug, Default)]
pub struct AppointmentFilter {
    pub status: Option<AppointmentStatus>,
    pub date: Option<NaiveDate>,
    pub customer_id: Option<i64>,
}

pub fn list_appointment_details(
    conn: &Connection,
    filter: &AppointmentFilter,
    newest_first: bool,
    limit: i64,
    offset: i64,
) -> rusqlite::Result<(Vec<AppointmentDetails>, i64)> {
    let mut where_ = Filter::default();
    if let Some(status) = &filter.status {
        where_.push(|n| format!("a.status = ?{n}"), status.as_str());
    }
    if let Some(date) = filter.date {
        where_.push(|n| format!("a.appointment_date = ?{n}"), date_str(date));
    }
    if let Some(customer_id) = filter.customer_id {
        where_.push(|n| format!("a.customer_id = ?{n}"), customer_id);
    }

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM appointments a {}", where_.where_sql()),
        where_.params_with(&[]).as_slice(),
        |row| row.get(0),
    )?;

    let order = if newest_first {
        "a.appointment_date DESC, a.start_time ASC"
    } else {
        "a.appointment_date ASC, a.start_time ASC"
    };
    let n = where_.params.len();
    let sql = format!(
        "{} {} ORDER BY {order} LIMIT ?{} OFFSET ?{}",
        details_select(),
        where_.where_sql(),
        n + 1,
        n + 2
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        where_.params_with(&[&limit, &offset]).as_slice(),
        parse_details_row,
    )?;
    Ok((collect(rows)?, total))
}

/// Non-cancelled appointments on or after `from`, soonest first.
pub fn upcoming_appointment_details(
    conn: &Connection,
    from: NaiveDate,
) -> rusqlite::Result<Vec<AppointmentDetails>> {
    let sql = format!(
        "{} WHERE a.appointment_date >= ?1 AND a.status != 'cancelled'
         ORDER BY a.appointment_date ASC, a.start_time ASC",
        details_select()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![date_str(from)], parse_details_row)?;
    collect(rows)
}

pub fn insert_appointment(conn: &Connection, new: &NewAppointment) -> rusqlite::Result<Appointment> {
    let now = now_ts();
    conn.execute(
        "INSERT INTO appointments (customer_id, service_id, appointment_date, start_time, end_time, status,
           total_price_cents, special_requests, payment_status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9, ?9)",
        params![
            new.customer_id,
            new.service_id,
            date_str(new.appointment_date),
            new.start_time.to_string(),
            new.end_time.to_string(),
            new.status.as_str(),
            new.total_price.cents(),
            new.special_requests,
            now,
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_appointment(conn, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

/// Writes every mutable column. `customer_id`, `service_id` and the price
/// snapshot are never rewritten.
pub fn save_appointment(conn: &Connection, appt: &Appointment) -> rusqlite::Result<bool> {
    let count = conn.execute(
        "UPDATE appointments SET appointment_date = ?1, start_time = ?2, end_time = ?3, status = ?4,
           special_requests = ?5, notes = ?6, calendar_event_id = ?7, payment_status = ?8,
           cancelled_at = ?9, cancelled_by = ?10, updated_at = ?11
         WHERE id = ?12",
        params![
            date_str(appt.appointment_date),
            appt.start_time.to_string(),
            appt.end_time.to_string(),
            appt.status.as_str(),
            appt.special_requests,
            appt.notes,
            appt.calendar_event_id,
            appt.payment_status.as_str(),
            appt.cancelled_at.map(|t| t.format(TS_FORMAT).to_string()),
            appt.cancelled_by,
            now_ts(),
            appt.id,
        ],
    )?;
    Ok(count > 0)
}
