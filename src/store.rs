use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Booking, ReminderFlagUpdate};
use crate::window::ReminderWindow;

/// The persistent booking store. Booking records are owned by the booking
/// management side; the dispatcher only reads them and sets reminder flags.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Bookings with an eligible status, starting inside `window`, whose
    /// reminder has not completed.
    async fn find_reminder_eligible_bookings(
        &self,
        window: &ReminderWindow,
    ) -> Result<Vec<Booking>, StoreError>;

    async fn find_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError>;

    /// Narrow, idempotent update of one reminder flag.
    async fn update_booking_flags(
        &self,
        id: Uuid,
        update: ReminderFlagUpdate,
    ) -> Result<(), StoreError>;

    /// Persists an administrative edit. Reminder flags are left untouched.
    async fn save_booking(&self, booking: &Booking) -> Result<(), StoreError>;
}
