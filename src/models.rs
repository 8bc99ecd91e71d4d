use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    PendingPayment,
    Confirmed,
    Paid,
    Completed,
    CancelledByPatient,
    CancelledByProfessional,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingPayment => "pending_payment",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Paid => "paid",
            BookingStatus::Completed => "completed",
            BookingStatus::CancelledByPatient => "cancelled_by_patient",
            BookingStatus::CancelledByProfessional => "cancelled_by_professional",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            BookingStatus::CancelledByPatient | BookingStatus::CancelledByProfessional
        )
    }

    pub fn is_reminder_eligible(&self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Paid)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_payment" => Ok(BookingStatus::PendingPayment),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "paid" => Ok(BookingStatus::Paid),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled_by_patient" => Ok(BookingStatus::CancelledByPatient),
            "cancelled_by_professional" => Ok(BookingStatus::CancelledByProfessional),
            other => Err(format!("unknown booking status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub status: BookingStatus,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub patient_contact: Contact,
    pub professional_contact: Option<Contact>,
    pub reminder_patient_sent: bool,
    pub reminder_professional_sent: bool,
    pub reminder_sent: bool,
    pub reminder_sent_at: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn has_email(&self) -> bool {
        !self.email.trim().is_empty()
    }
}

impl Booking {
    /// Still waiting for its reminder: eligible status and not yet completed.
    pub fn needs_reminder(&self) -> bool {
        self.status.is_reminder_eligible() && !self.reminder_sent
    }

    /// The professional, when there is one that can be emailed. A blank
    /// address counts as no professional.
    pub fn notifiable_professional(&self) -> Option<&Contact> {
        self.professional_contact.as_ref().filter(|c| c.has_email())
    }
}

/// A single false-to-true transition of the reminder flags. There is no way
/// to express clearing a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderFlagUpdate {
    PatientSent,
    ProfessionalSent,
    /// Sets `reminder_sent`; `reminder_sent_at` keeps its first value.
    Completed { at: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    /// Completed on this run after at least one send.
    Sent,
    /// Both legs were already delivered; only the completion flag was set.
    Reconciled,
    AlreadySent,
    Partial,
    Failed,
    /// Booking left the eligible statuses before it was processed.
    Skipped,
}

/// Result of processing one booking on one dispatcher run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub booking_id: Uuid,
    pub patient_sent: bool,
    pub professional_sent: bool,
    pub success: bool,
    pub status: ReminderStatus,
    pub errors: Vec<String>,
}

impl DispatchOutcome {
    pub fn new(booking_id: Uuid) -> Self {
        Self {
            booking_id,
            patient_sent: false,
            professional_sent: false,
            success: false,
            status: ReminderStatus::Failed,
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResult {
    pub booking_id: Uuid,
    pub status: ReminderStatus,
    pub success: bool,
    pub error: Option<String>,
}

impl From<DispatchOutcome> for BookingResult {
    fn from(outcome: DispatchOutcome) -> Self {
        let error = if outcome.errors.is_empty() {
            None
        } else {
            Some(outcome.errors.join("; "))
        };
        Self {
            booking_id: outcome.booking_id,
            status: outcome.status,
            success: outcome.success,
            error,
        }
    }
}

/// Aggregate report of one dispatch run, returned to the trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// The run itself completed; individual bookings may still have failed.
    pub success: bool,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BookingResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: Vec<DispatchOutcome>) -> Self {
        let total = outcomes.len();
        let successful = outcomes.iter().filter(|o| o.success).count();
        Self {
            success: true,
            total,
            successful,
            failed: total - successful,
            results: outcomes.into_iter().map(BookingResult::from).collect(),
            error: None,
        }
    }

    /// A run that aborted before processing any booking.
    pub fn aborted(error: impl Into<String>) -> Self {
        Self {
            success: false,
            total: 0,
            successful: 0,
            failed: 0,
            results: Vec::new(),
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in [
            BookingStatus::PendingPayment,
            BookingStatus::Confirmed,
            BookingStatus::Paid,
            BookingStatus::Completed,
            BookingStatus::CancelledByPatient,
            BookingStatus::CancelledByProfessional,
        ] {
            assert_eq!(status.as_str().parse::<BookingStatus>(), Ok(status));
        }
        assert!("archived".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn test_summary_counts_and_serializes_camel_case() {
        let ok_id = Uuid::new_v4();
        let bad_id = Uuid::new_v4();
        let mut ok = DispatchOutcome::new(ok_id);
        ok.success = true;
        ok.status = ReminderStatus::Sent;
        let mut bad = DispatchOutcome::new(bad_id);
        bad.errors.push("patient reminder failed: boom".into());
        bad.errors.push("professional reminder failed: boom".into());

        let summary = RunSummary::from_outcomes(vec![ok, bad]);

        assert!(summary.success);
        assert_eq!((summary.total, summary.successful, summary.failed), (2, 1, 1));
        assert_eq!(summary.results[0].error, None);
        assert_eq!(
            summary.results[1].error.as_deref(),
            Some("patient reminder failed: boom; professional reminder failed: boom")
        );

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["results"][0]["bookingId"], ok_id.to_string());
        assert_eq!(json["results"][0]["status"], "sent");
        assert_eq!(json["results"][1]["success"], false);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_aborted_summary() {
        let summary = RunSummary::aborted("Database error: connection refused");

        assert!(!summary.success);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.error.as_deref(), Some("Database error: connection refused"));
    }
}
