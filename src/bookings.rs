use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{FromRow, PgPool, query_as};
use tracing::instrument;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Booking, BookingStatus, Contact, ReminderFlagUpdate};
use crate::store::BookingStore;
use crate::window::ReminderWindow;

const BOOKING_COLUMNS: &str = r#"
    id, status, scheduled_date, scheduled_time,
    patient_name, patient_email, patient_phone,
    professional_name, professional_email,
    reminder_patient_sent, reminder_professional_sent, reminder_sent, reminder_sent_at
"#;

#[derive(Debug, FromRow)]
struct BookingRow {
    id: Uuid,
    status: String,
    scheduled_date: NaiveDate,
    scheduled_time: NaiveTime,
    patient_name: String,
    patient_email: String,
    patient_phone: Option<String>,
    professional_name: Option<String>,
    professional_email: Option<String>,
    reminder_patient_sent: bool,
    reminder_professional_sent: bool,
    reminder_sent: bool,
    reminder_sent_at: Option<DateTime<Utc>>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<BookingStatus>()
            .map_err(|reason| StoreError::InvalidRecord { id: row.id, reason })?;

        // A professional without an email address cannot be notified; the
        // dispatcher treats that the same as having no professional.
        let professional_contact = row
            .professional_email
            .filter(|email| !email.trim().is_empty())
            .map(|email| Contact {
                name: row.professional_name.unwrap_or_default(),
                email,
                phone: None,
            });

        Ok(Booking {
            id: row.id,
            status,
            scheduled_date: row.scheduled_date,
            scheduled_time: row.scheduled_time,
            patient_contact: Contact {
                name: row.patient_name,
                email: row.patient_email,
                phone: row.patient_phone,
            },
            professional_contact,
            reminder_patient_sent: row.reminder_patient_sent,
            reminder_professional_sent: row.reminder_professional_sent,
            reminder_sent: row.reminder_sent,
            reminder_sent_at: row.reminder_sent_at,
        })
    }
}

/// Postgres-backed booking store over `core.bookings`.
#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    #[instrument(skip(self), fields(window = %window))]
    async fn find_reminder_eligible_bookings(
        &self,
        window: &ReminderWindow,
    ) -> Result<Vec<Booking>, StoreError> {
        let rows = query_as::<_, BookingRow>(&format!(
            r#"
            SELECT {BOOKING_COLUMNS}
            FROM core.bookings
            WHERE status IN ('confirmed', 'paid')
                AND (scheduled_date, scheduled_time) >= ($1, $2)
                AND (scheduled_date, scheduled_time) < ($3, $4)
                AND reminder_sent IS NOT TRUE
            ORDER BY scheduled_date, scheduled_time
            "#
        ))
        .bind(window.start.date())
        .bind(window.start.time())
        .bind(window.end.date())
        .bind(window.end.time())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Booking::try_from).collect()
    }

    async fn find_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        let row = query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM core.bookings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Booking::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn update_booking_flags(
        &self,
        id: Uuid,
        update: ReminderFlagUpdate,
    ) -> Result<(), StoreError> {
        let query = match update {
            ReminderFlagUpdate::PatientSent => sqlx::query(
                "UPDATE core.bookings SET reminder_patient_sent = TRUE WHERE id = $1",
            )
            .bind(id),
            ReminderFlagUpdate::ProfessionalSent => sqlx::query(
                "UPDATE core.bookings SET reminder_professional_sent = TRUE WHERE id = $1",
            )
            .bind(id),
            ReminderFlagUpdate::Completed { at } => sqlx::query(
                r#"
                UPDATE core.bookings
                SET reminder_sent = TRUE,
                    reminder_sent_at = COALESCE(reminder_sent_at, $2)
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(at),
        };

        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }

        Ok(())
    }

    async fn save_booking(&self, booking: &Booking) -> Result<(), StoreError> {
        let professional = booking.professional_contact.as_ref();
        let result = sqlx::query(
            r#"
            UPDATE core.bookings
            SET status = $2,
                scheduled_date = $3,
                scheduled_time = $4,
                patient_name = $5,
                patient_email = $6,
                patient_phone = $7,
                professional_name = $8,
                professional_email = $9
            WHERE id = $1
            "#,
        )
        .bind(booking.id)
        .bind(booking.status.as_str())
        .bind(booking.scheduled_date)
        .bind(booking.scheduled_time)
        .bind(&booking.patient_contact.name)
        .bind(&booking.patient_contact.email)
        .bind(&booking.patient_contact.phone)
        .bind(professional.map(|c| c.name.as_str()))
        .bind(professional.map(|c| c.email.as_str()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(booking.id));
        }

        Ok(())
    }
}
