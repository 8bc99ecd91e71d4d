//! HTML bodies and subjects for patient and professional notifications.

use chrono::{NaiveDate, NaiveTime};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::error;

use crate::error::NotificationError;
use crate::models::{Booking, Contact};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    PatientReminder,
    ProfessionalReminder,
    PaymentApproved,
    Cancellation,
    Reschedule,
    ThankYou,
}

impl TemplateKind {
    const ALL: [TemplateKind; 6] = [
        TemplateKind::PatientReminder,
        TemplateKind::ProfessionalReminder,
        TemplateKind::PaymentApproved,
        TemplateKind::Cancellation,
        TemplateKind::Reschedule,
        TemplateKind::ThankYou,
    ];

    fn name(&self) -> &'static str {
        match self {
            TemplateKind::PatientReminder => "patient_reminder",
            TemplateKind::ProfessionalReminder => "professional_reminder",
            TemplateKind::PaymentApproved => "payment_approved",
            TemplateKind::Cancellation => "cancellation",
            TemplateKind::Reschedule => "reschedule",
            TemplateKind::ThankYou => "thank_you",
        }
    }

    fn source(&self) -> &'static str {
        match self {
            TemplateKind::PatientReminder => include_str!("../templates/patient_reminder.hbs"),
            TemplateKind::ProfessionalReminder => include_str!("../templates/professional_reminder.hbs"),
            TemplateKind::PaymentApproved => include_str!("../templates/payment_approved.hbs"),
            TemplateKind::Cancellation => include_str!("../templates/cancellation.hbs"),
            TemplateKind::Reschedule => include_str!("../templates/reschedule.hbs"),
            TemplateKind::ThankYou => include_str!("../templates/thank_you.hbs"),
        }
    }

    /// Plain-text subject line; not HTML-escaped.
    pub fn subject(&self, data: &TemplateData) -> String {
        match self {
            TemplateKind::PatientReminder => {
                format!("Reminder: your appointment is today at {}", data.time.format("%H:%M"))
            }
            TemplateKind::ProfessionalReminder => format!(
                "Reminder: appointment with {} today at {}",
                data.patient_name,
                data.time.format("%H:%M")
            ),
            TemplateKind::PaymentApproved => "Payment approved: your appointment is confirmed".to_string(),
            TemplateKind::Cancellation => format!("Appointment cancelled: {}", data.when()),
            TemplateKind::Reschedule => format!("Appointment rescheduled to {}", data.when()),
            TemplateKind::ThankYou => "Thank you for your visit".to_string(),
        }
    }
}

/// Values substituted into a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateData {
    pub recipient_name: String,
    pub patient_name: String,
    pub professional_name: Option<String>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub previous_date: Option<NaiveDate>,
    pub previous_time: Option<NaiveTime>,
    pub reason: Option<String>,
}

impl TemplateData {
    pub fn for_booking(booking: &Booking, recipient: &Contact) -> Self {
        Self {
            recipient_name: recipient.name.clone(),
            patient_name: booking.patient_contact.name.clone(),
            professional_name: booking.professional_contact.as_ref().map(|c| c.name.clone()),
            date: booking.scheduled_date,
            time: booking.scheduled_time,
            previous_date: None,
            previous_time: None,
            reason: None,
        }
    }

    fn when(&self) -> String {
        format_when(self.date, self.time)
    }

    fn previous_when(&self) -> Option<String> {
        Some(format_when(self.previous_date?, self.previous_time?))
    }
}

fn format_when(date: NaiveDate, time: NaiveTime) -> String {
    format!("{} at {}", date.format("%d/%m/%Y"), time.format("%H:%M"))
}

#[derive(Serialize)]
struct RenderContext<'a> {
    #[serde(flatten)]
    data: &'a TemplateData,
    when: String,
    previous_when: Option<String>,
}

/// Registry of the notification bodies. Values are HTML-escaped on render.
pub struct EmailTemplates {
    registry: Handlebars<'static>,
}

impl EmailTemplates {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);

        for kind in TemplateKind::ALL {
            if let Err(e) = registry.register_template_string(kind.name(), kind.source()) {
                error!(template = kind.name(), "Failed to register email template: {}", e);
            }
        }

        Self { registry }
    }

    pub fn render(&self, kind: TemplateKind, data: &TemplateData) -> Result<String, NotificationError> {
        let context = RenderContext {
            data,
            when: data.when(),
            previous_when: data.previous_when(),
        };

        self.registry.render(kind.name(), &context).map_err(|e| {
            NotificationError::Validation(format!("failed to render {} template: {e}", kind.name()))
        })
    }
}

impl Default for EmailTemplates {
    fn default() -> Self {
        Self::new()
    }
}
