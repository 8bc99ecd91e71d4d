//! Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

use crate::error::{NotificationError, StoreError};
use crate::messaging::{EmailMessage, Mailer, NotificationSink, SendReceipt};
use crate::models::{Booking, BookingStatus, Contact, ReminderFlagUpdate};
use crate::retry::RetryPolicy;
use crate::store::BookingStore;
use crate::window::ReminderWindow;

pub fn test_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
}

/// A confirmed booking on `test_date()` with both contacts present.
pub fn booking_at(hour: u32, minute: u32) -> Booking {
    let id = Uuid::new_v4();
    Booking {
        id,
        status: BookingStatus::Confirmed,
        scheduled_date: test_date(),
        scheduled_time: NaiveTime::from_hms_opt(hour, minute, 0).unwrap(),
        patient_contact: Contact {
            name: "Ana Souza".into(),
            email: format!("patient-{id}@example.com"),
            phone: Some("+55 11 90000-0000".into()),
        },
        professional_contact: Some(Contact {
            name: "Dr. Lima".into(),
            email: format!("professional-{id}@example.com"),
            phone: None,
        }),
        reminder_patient_sent: false,
        reminder_professional_sent: false,
        reminder_sent: false,
        reminder_sent_at: None,
    }
}

pub fn mailer_with(sink: Arc<dyn NotificationSink>, max_retries: u32) -> Mailer {
    Mailer::new(sink, RetryPolicy::new(max_retries, 1, false), 1_000, None)
}

/// Records every send attempt; can be scripted to fail.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<EmailMessage>>,
    attempts: AtomicU32,
    fail_first: AtomicU32,
    failing: HashSet<String>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` attempts regardless of recipient.
    pub fn fail_first(self, count: u32) -> Self {
        self.fail_first.store(count, Ordering::SeqCst);
        self
    }

    /// Always fail sends to `email`.
    pub fn failing_for(mut self, email: &str) -> Self {
        self.failing.insert(email.to_string());
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<EmailMessage> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn delivered_to(&self, email: &str) -> usize {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.to == email)
            .count()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, NotificationError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let scripted_failure = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure || self.failing.contains(&message.to) {
            return Err(NotificationError::Network(format!(
                "connection refused sending to {}",
                message.to
            )));
        }

        let mut delivered = self.delivered.lock().unwrap();
        delivered.push(message.clone());
        Ok(SendReceipt {
            message_id: Some(format!("msg-{}", delivered.len())),
            disabled: false,
        })
    }
}

/// In-memory `BookingStore` with the same filtering rules as Postgres.
#[derive(Default)]
pub struct InMemoryBookingStore {
    bookings: Mutex<HashMap<Uuid, Booking>>,
    fail_queries: AtomicBool,
    fail_flag_writes: Mutex<HashSet<Uuid>>,
}

impl InMemoryBookingStore {
    pub fn with_bookings(bookings: impl IntoIterator<Item = Booking>) -> Self {
        let store = Self::default();
        {
            let mut map = store.bookings.lock().unwrap();
            for booking in bookings {
                map.insert(booking.id, booking);
            }
        }
        store
    }

    pub fn fail_queries(&self) {
        self.fail_queries.store(true, Ordering::SeqCst);
    }

    pub fn fail_flag_writes_for(&self, id: Uuid) {
        self.fail_flag_writes.lock().unwrap().insert(id);
    }

    pub fn get(&self, id: Uuid) -> Booking {
        self.bookings.lock().unwrap()[&id].clone()
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn find_reminder_eligible_bookings(
        &self,
        window: &ReminderWindow,
    ) -> Result<Vec<Booking>, StoreError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut found: Vec<Booking> = self
            .bookings
            .lock()
            .unwrap()
            .values()
            .filter(|b| {
                b.needs_reminder() && window.contains(b.scheduled_date, b.scheduled_time)
            })
            .cloned()
            .collect();
        found.sort_by_key(|b| (b.scheduled_date, b.scheduled_time));
        Ok(found)
    }

    async fn find_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.lock().unwrap().get(&id).cloned())
    }

    async fn update_booking_flags(
        &self,
        id: Uuid,
        update: ReminderFlagUpdate,
    ) -> Result<(), StoreError> {
        if self.fail_flag_writes.lock().unwrap().contains(&id) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut bookings = self.bookings.lock().unwrap();
        let booking = bookings.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        match update {
            ReminderFlagUpdate::PatientSent => booking.reminder_patient_sent = true,
            ReminderFlagUpdate::ProfessionalSent => booking.reminder_professional_sent = true,
            ReminderFlagUpdate::Completed { at } => {
                booking.reminder_sent = true;
                booking.reminder_sent_at.get_or_insert(at);
            }
        }
        Ok(())
    }

    async fn save_booking(&self, booking: &Booking) -> Result<(), StoreError> {
        let mut bookings = self.bookings.lock().unwrap();
        let stored = bookings.get_mut(&booking.id).ok_or(StoreError::NotFound(booking.id))?;
        *stored = Booking {
            reminder_patient_sent: stored.reminder_patient_sent,
            reminder_professional_sent: stored.reminder_professional_sent,
            reminder_sent: stored.reminder_sent,
            reminder_sent_at: stored.reminder_sent_at,
            ..booking.clone()
        };
        Ok(())
    }
}
