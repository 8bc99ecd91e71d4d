use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{error, info, instrument, warn};

use crate::messaging::Mailer;
use crate::models::{Booking, Contact, DispatchOutcome, ReminderFlagUpdate, ReminderStatus};
use crate::store::BookingStore;
use crate::templates::{TemplateData, TemplateKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Patient,
    Professional,
}

impl Leg {
    fn label(&self) -> &'static str {
        match self {
            Leg::Patient => "patient",
            Leg::Professional => "professional",
        }
    }

    fn template(&self) -> TemplateKind {
        match self {
            Leg::Patient => TemplateKind::PatientReminder,
            Leg::Professional => TemplateKind::ProfessionalReminder,
        }
    }

    fn flag(&self) -> ReminderFlagUpdate {
        match self {
            Leg::Patient => ReminderFlagUpdate::PatientSent,
            Leg::Professional => ReminderFlagUpdate::ProfessionalSent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegState {
    SentNow,
    SentPreviously,
    /// No professional on the booking.
    NotApplicable,
    Failed,
}

impl LegState {
    fn is_satisfied(&self) -> bool {
        !matches!(self, LegState::Failed)
    }

    fn is_delivered(&self) -> bool {
        matches!(self, LegState::SentNow | LegState::SentPreviously)
    }
}

/// Sends the patient and professional reminders for a batch of bookings and
/// records progress through the idempotent reminder flags.
pub struct BookingReminderDispatcher {
    store: Arc<dyn BookingStore>,
    mailer: Arc<Mailer>,
}

impl BookingReminderDispatcher {
    pub fn new(store: Arc<dyn BookingStore>, mailer: Arc<Mailer>) -> Self {
        Self { store, mailer }
    }

    /// Processes every booking concurrently. A failing booking never stops
    /// the others; each one yields exactly one outcome.
    #[instrument(skip_all, fields(bookings = bookings.len()))]
    pub async fn dispatch(&self, bookings: Vec<Booking>, now: DateTime<Utc>) -> Vec<DispatchOutcome> {
        join_all(
            bookings
                .into_iter()
                .map(|booking| self.process_booking(booking, now)),
        )
        .await
    }

    #[instrument(skip_all, fields(booking_id = %snapshot.id))]
    async fn process_booking(&self, snapshot: Booking, now: DateTime<Utc>) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::new(snapshot.id);

        // Flags may have moved since the batch was queried.
        let booking = match self.store.find_booking(snapshot.id).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                outcome.errors.push("booking no longer exists".to_string());
                return outcome;
            }
            Err(e) => {
                warn!("Could not refresh booking, using queried copy: {}", e);
                snapshot
            }
        };

        if !booking.needs_reminder() {
            outcome.success = true;
            if booking.reminder_sent {
                outcome.patient_sent = true;
                outcome.professional_sent = booking.notifiable_professional().is_some();
                outcome.status = ReminderStatus::AlreadySent;
            } else {
                info!(status = %booking.status, "Booking no longer eligible for a reminder.");
                outcome.status = ReminderStatus::Skipped;
            }
            return outcome;
        }

        let patient = if booking.reminder_patient_sent {
            LegState::SentPreviously
        } else {
            self.send_leg(Leg::Patient, &booking, &booking.patient_contact, &mut outcome.errors)
                .await
        };

        let professional = match booking.notifiable_professional() {
            _ if booking.reminder_professional_sent => LegState::SentPreviously,
            None => {
                outcome
                    .errors
                    .push("professional contact missing; professional reminder not applicable".to_string());
                LegState::NotApplicable
            }
            Some(contact) => {
                self.send_leg(Leg::Professional, &booking, contact, &mut outcome.errors)
                    .await
            }
        };

        outcome.patient_sent = patient.is_delivered();
        outcome.professional_sent = professional.is_delivered();

        if !(patient.is_satisfied() && professional.is_satisfied()) {
            outcome.status = if patient.is_delivered() || professional.is_delivered() {
                ReminderStatus::Partial
            } else {
                ReminderStatus::Failed
            };
            warn!(errors = ?outcome.errors, "Reminder incomplete, will retry on the next run.");
            return outcome;
        }

        match self
            .store
            .update_booking_flags(booking.id, ReminderFlagUpdate::Completed { at: now })
            .await
        {
            Ok(()) => {
                outcome.success = true;
                outcome.status = if patient == LegState::SentNow || professional == LegState::SentNow {
                    ReminderStatus::Sent
                } else {
                    ReminderStatus::Reconciled
                };
                info!(status = ?outcome.status, "Reminder complete.");
            }
            Err(e) => {
                error!("Reminders delivered but completion flag not saved: {}", e);
                outcome
                    .errors
                    .push(format!("failed to mark reminder complete: {e}"));
                outcome.status = ReminderStatus::Partial;
            }
        }

        outcome
    }

    /// Sends one leg and persists its flag. The leg only counts as sent once
    /// the flag is stored; otherwise it will be re-sent on the next run.
    async fn send_leg(
        &self,
        leg: Leg,
        booking: &Booking,
        recipient: &Contact,
        errors: &mut Vec<String>,
    ) -> LegState {
        let data = TemplateData::for_booking(booking, recipient);

        let receipt = match self.mailer.deliver(leg.template(), recipient, &data).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(leg = leg.label(), "Reminder send failed: {}", e);
                errors.push(format!("{} reminder failed: {e}", leg.label()));
                return LegState::Failed;
            }
        };

        if let Err(e) = self.store.update_booking_flags(booking.id, leg.flag()).await {
            error!(leg = leg.label(), "Reminder sent but flag not saved: {}. It WILL be re-sent.", e);
            errors.push(format!("{} reminder sent but not recorded: {e}", leg.label()));
            return LegState::Failed;
        }

        info!(
            leg = leg.label(),
            message_id = receipt.message_id.as_deref().unwrap_or("-"),
            disabled = receipt.disabled,
            "Reminder sent."
        );
        LegState::SentNow
    }
}
