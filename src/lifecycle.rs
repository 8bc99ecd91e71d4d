//! Notifications triggered by administrative edits to a booking.
//!
//! The edit is persisted first and is the source of truth; delivery problems
//! come back as a [`NotificationWarning`] and never undo the change.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use futures::future::join_all;
use tracing::{info, instrument, warn};

use crate::error::{NotificationWarning, StoreError};
use crate::messaging::Mailer;
use crate::models::{Booking, BookingStatus, Contact};
use crate::store::BookingStore;
use crate::templates::{TemplateData, TemplateKind};

/// Used when a booking still awaiting payment is cancelled.
pub const DEFAULT_CANCELLATION_REASON: &str = "Payment was not confirmed in time.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleNotification {
    PaymentApproved,
    Cancelled {
        reason: Option<String>,
    },
    ThankYou,
    Rescheduled {
        previous_date: NaiveDate,
        previous_time: NaiveTime,
    },
}

impl LifecycleNotification {
    fn template(&self) -> TemplateKind {
        match self {
            LifecycleNotification::PaymentApproved => TemplateKind::PaymentApproved,
            LifecycleNotification::Cancelled { .. } => TemplateKind::Cancellation,
            LifecycleNotification::ThankYou => TemplateKind::ThankYou,
            LifecycleNotification::Rescheduled { .. } => TemplateKind::Reschedule,
        }
    }

    /// Cancellations and reschedules concern both parties; the rest only the
    /// patient.
    fn notifies_professional(&self) -> bool {
        matches!(
            self,
            LifecycleNotification::Cancelled { .. } | LifecycleNotification::Rescheduled { .. }
        )
    }
}

/// Notifications implied by the change from `old` to `new`. Rules are
/// independent, so one edit may yield several.
pub fn lifecycle_notifications(old: &Booking, new: &Booking) -> Vec<LifecycleNotification> {
    let mut notifications = Vec::new();

    if old.status != new.status {
        match new.status {
            BookingStatus::Confirmed | BookingStatus::Paid => {
                notifications.push(LifecycleNotification::PaymentApproved)
            }
            BookingStatus::CancelledByPatient | BookingStatus::CancelledByProfessional => {
                let reason = (old.status == BookingStatus::PendingPayment)
                    .then(|| DEFAULT_CANCELLATION_REASON.to_string());
                notifications.push(LifecycleNotification::Cancelled { reason });
            }
            BookingStatus::Completed => notifications.push(LifecycleNotification::ThankYou),
            BookingStatus::PendingPayment => {}
        }
    }

    let moved = old.scheduled_date != new.scheduled_date || old.scheduled_time != new.scheduled_time;
    if moved && !new.status.is_cancelled() {
        notifications.push(LifecycleNotification::Rescheduled {
            previous_date: old.scheduled_date,
            previous_time: old.scheduled_time,
        });
    }

    notifications
}

pub struct StatusTransitionNotifier {
    mailer: Arc<Mailer>,
}

impl StatusTransitionNotifier {
    pub fn new(mailer: Arc<Mailer>) -> Self {
        Self { mailer }
    }

    #[instrument(skip_all, fields(booking_id = %new.id))]
    pub async fn notify(&self, old: &Booking, new: &Booking) -> Result<(), NotificationWarning> {
        let notifications = lifecycle_notifications(old, new);
        if notifications.is_empty() {
            return Ok(());
        }

        let mut deliveries: Vec<(TemplateKind, &Contact, TemplateData)> = Vec::new();
        let mut failures = Vec::new();

        for notification in &notifications {
            deliveries.push(delivery(notification, new, &new.patient_contact));

            if notification.notifies_professional() {
                match new.notifiable_professional() {
                    Some(professional) => deliveries.push(delivery(notification, new, professional)),
                    None => warn!(?notification, "No professional contact, skipping professional copy."),
                }
            }
        }

        let results = join_all(
            deliveries
                .iter()
                .map(|(kind, recipient, data)| self.mailer.deliver(*kind, recipient, data)),
        )
        .await;

        for ((kind, recipient, _), result) in deliveries.iter().zip(results) {
            match result {
                Ok(_) => info!(?kind, to = %recipient.email, "Lifecycle notification sent."),
                Err(e) => {
                    warn!(?kind, to = %recipient.email, "Lifecycle notification failed: {}", e);
                    failures.push(format!("{kind:?} to {}: {e}", recipient.email));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(NotificationWarning {
                booking_id: new.id,
                failures,
            })
        }
    }
}

fn delivery<'a>(
    notification: &LifecycleNotification,
    booking: &Booking,
    recipient: &'a Contact,
) -> (TemplateKind, &'a Contact, TemplateData) {
    let mut data = TemplateData::for_booking(booking, recipient);
    match notification {
        LifecycleNotification::Cancelled { reason } => data.reason = reason.clone(),
        LifecycleNotification::Rescheduled {
            previous_date,
            previous_time,
        } => {
            data.previous_date = Some(*previous_date);
            data.previous_time = Some(*previous_time);
        }
        _ => {}
    }
    (notification.template(), recipient, data)
}

/// Result of an administrative edit: the saved booking plus the outcome of
/// its notifications.
#[derive(Debug)]
pub struct BookingUpdateOutcome {
    pub booking: Booking,
    pub notification: Result<(), NotificationWarning>,
}

impl BookingUpdateOutcome {
    /// Message for the operator who made the edit.
    pub fn operator_message(&self) -> &'static str {
        match self.notification {
            Ok(()) => "Booking saved.",
            Err(_) => "Booking saved, but notification may not have been delivered.",
        }
    }
}

/// Persists administrative booking edits and fires the matching
/// notifications afterwards.
pub struct BookingAdminService {
    store: Arc<dyn BookingStore>,
    notifier: StatusTransitionNotifier,
}

impl BookingAdminService {
    pub fn new(store: Arc<dyn BookingStore>, notifier: StatusTransitionNotifier) -> Self {
        Self { store, notifier }
    }

    #[instrument(skip_all, fields(booking_id = %updated.id))]
    pub async fn update_booking(&self, updated: Booking) -> Result<BookingUpdateOutcome, StoreError> {
        let previous = self
            .store
            .find_booking(updated.id)
            .await?
            .ok_or(StoreError::NotFound(updated.id))?;

        self.store.save_booking(&updated).await?;

        // Reminder flags in the request are ignored on save; report what is stored.
        let saved = self
            .store
            .find_booking(updated.id)
            .await?
            .ok_or(StoreError::NotFound(updated.id))?;
        info!(from = %previous.status, to = %saved.status, "Booking updated.");

        let notification = self.notifier.notify(&previous, &saved).await;
        if let Err(warning) = &notification {
            warn!("{}", warning);
        }

        Ok(BookingUpdateOutcome {
            booking: saved,
            notification,
        })
    }
}
