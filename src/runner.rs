use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{Span, error, field, info, instrument};

use crate::dispatcher::BookingReminderDispatcher;
use crate::error::StoreError;
use crate::models::RunSummary;
use crate::store::BookingStore;
use crate::window::ReminderWindowCalculator;

/// One reminder pass: window, query, dispatch, report. Stateless between
/// invocations.
pub struct DispatchRunner {
    store: Arc<dyn BookingStore>,
    dispatcher: BookingReminderDispatcher,
    calculator: ReminderWindowCalculator,
}

impl DispatchRunner {
    pub fn new(
        store: Arc<dyn BookingStore>,
        dispatcher: BookingReminderDispatcher,
        calculator: ReminderWindowCalculator,
    ) -> Self {
        Self {
            store,
            dispatcher,
            calculator,
        }
    }

    /// Fails only when the eligible bookings cannot be loaded, in which case
    /// nothing has been sent or written.
    #[instrument(skip_all, fields(window = field::Empty, bookings_found = 0))]
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RunSummary, StoreError> {
        let window = self.calculator.compute_window(now);
        Span::current().record("window", field::display(&window));
        info!("Checking for bookings due a reminder...");

        let bookings = match self.store.find_reminder_eligible_bookings(&window).await {
            Ok(bookings) => bookings,
            Err(e) => {
                error!("Failed to load bookings for reminder window: {}", e);
                return Err(e);
            }
        };

        let bookings_found = bookings.len();
        if bookings_found == 0 {
            info!("No bookings in the reminder window.");
            return Ok(RunSummary::from_outcomes(Vec::new()));
        }
        Span::current().record("bookings_found", bookings_found);
        info!(bookings_found, "Found bookings to remind.");

        let outcomes = self.dispatcher.dispatch(bookings, now).await;
        let summary = RunSummary::from_outcomes(outcomes);

        info!(
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            "Reminder run complete."
        );

        Ok(summary)
    }
}
