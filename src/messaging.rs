use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::NotificationError;
use crate::models::Contact;
use crate::retry::{self, RetryPolicy};
use crate::templates::{EmailTemplates, TemplateData, TemplateKind};
use crate::timeout::with_deadline;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: Option<String>,
    /// The transport is switched off; nothing left the process.
    pub disabled: bool,
}

/// Outbound transport for rendered notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, NotificationError>;
}

#[derive(Serialize)]
struct EmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

#[derive(Deserialize)]
struct EmailResponse {
    id: Option<String>,
}

/// Sends through a transactional email HTTP API (Resend-compatible).
pub struct HttpEmailSink {
    client: HttpClient,
    api_url: String,
    api_key: Option<String>,
    from: String,
    enabled: bool,
}

impl HttpEmailSink {
    pub fn new(
        client: HttpClient,
        api_url: String,
        api_key: Option<String>,
        from: String,
        enabled: bool,
    ) -> Self {
        Self {
            client,
            api_url,
            api_key,
            from,
            enabled,
        }
    }
}

#[async_trait]
impl NotificationSink for HttpEmailSink {
    #[instrument(skip_all, fields(to = %message.to))]
    async fn send(&self, message: &EmailMessage) -> Result<SendReceipt, NotificationError> {
        if !self.enabled {
            debug!(subject = %message.subject, "Email transport disabled, skipping send.");
            return Ok(SendReceipt {
                message_id: None,
                disabled: true,
            });
        }

        let body = EmailRequest {
            from: &self.from,
            to: [message.to.as_str()],
            subject: &message.subject,
            html: &message.html,
            reply_to: message.reply_to.as_deref(),
        };

        let mut request = self.client.post(&self.api_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotificationError::Network(format!("Email request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(NotificationError::Network(format!(
                "Email API returned {status}: {detail}"
            )));
        }

        // A 2xx without a parseable body still counts as delivered.
        let message_id = response
            .json::<EmailResponse>()
            .await
            .ok()
            .and_then(|body| body.id);

        Ok(SendReceipt {
            message_id,
            disabled: false,
        })
    }
}

/// Renders a template for one recipient and delivers it with retries and a
/// per-attempt deadline.
pub struct Mailer {
    sink: Arc<dyn NotificationSink>,
    templates: EmailTemplates,
    retry_policy: RetryPolicy,
    timeout_ms: u64,
    reply_to: Option<String>,
}

impl Mailer {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        retry_policy: RetryPolicy,
        timeout_ms: u64,
        reply_to: Option<String>,
    ) -> Self {
        Self {
            sink,
            templates: EmailTemplates::new(),
            retry_policy,
            timeout_ms,
            reply_to,
        }
    }

    pub async fn deliver(
        &self,
        kind: TemplateKind,
        recipient: &Contact,
        data: &TemplateData,
    ) -> Result<SendReceipt, NotificationError> {
        let to = recipient.email.trim();
        if to.is_empty() {
            return Err(NotificationError::Validation(format!(
                "{} has no email address",
                if recipient.name.is_empty() { "recipient" } else { recipient.name.as_str() }
            )));
        }

        let message = EmailMessage {
            to: to.to_string(),
            subject: kind.subject(data),
            html: self.templates.render(kind, data)?,
            reply_to: self.reply_to.clone(),
        };

        retry::execute(
            || with_deadline(self.sink.send(&message), Some(self.timeout_ms)),
            &self.retry_policy,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSink, booking_at, mailer_with};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message() -> EmailMessage {
        EmailMessage {
            to: "ana@example.com".into(),
            subject: "Reminder".into(),
            html: "<p>hi</p>".into(),
            reply_to: Some("front-desk@example.com".into()),
        }
    }

    fn sink_for(server: &MockServer, enabled: bool) -> HttpEmailSink {
        HttpEmailSink::new(
            HttpClient::new(),
            format!("{}/emails", server.uri()),
            Some("re_test".into()),
            "Clinic <no-reply@example.com>".into(),
            enabled,
        )
    }

    #[tokio::test]
    async fn test_http_sink_posts_message_and_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .and(header("authorization", "Bearer re_test"))
            .and(body_partial_json(json!({
                "to": ["ana@example.com"],
                "subject": "Reminder",
                "reply_to": "front-desk@example.com"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "msg_123" })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = sink_for(&server, true).send(&message()).await.unwrap();

        assert_eq!(receipt.message_id.as_deref(), Some("msg_123"));
        assert!(!receipt.disabled);
    }

    #[tokio::test]
    async fn test_http_sink_classifies_server_errors_as_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let result = sink_for(&server, true).send(&message()).await;

        match result {
            Err(NotificationError::Network(detail)) => assert!(detail.contains("503")),
            other => panic!("expected network error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disabled_sink_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let receipt = sink_for(&server, false).send(&message()).await.unwrap();

        assert!(receipt.disabled);
    }

    #[tokio::test]
    async fn test_mailer_retries_transient_failures() {
        let sink = Arc::new(RecordingSink::new().fail_first(2));
        let mailer = mailer_with(sink.clone(), 2);
        let booking = booking_at(11, 0);

        let result = mailer
            .deliver(
                TemplateKind::PatientReminder,
                &booking.patient_contact,
                &TemplateData::for_booking(&booking, &booking.patient_contact),
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(sink.attempts(), 3);
        assert_eq!(sink.delivered_to(&booking.patient_contact.email), 1);
        let sent = &sink.delivered()[0];
        assert!(sent.html.contains("<p>Hello Ana Souza,</p>"));
        assert_eq!(sent.subject, "Reminder: your appointment is today at 11:00");
    }

    #[tokio::test]
    async fn test_mailer_rejects_blank_address_without_sending() {
        let sink = Arc::new(RecordingSink::new());
        let mailer = mailer_with(sink.clone(), 3);
        let mut booking = booking_at(11, 0);
        booking.patient_contact.email = "  ".into();

        let result = mailer
            .deliver(
                TemplateKind::PatientReminder,
                &booking.patient_contact,
                &TemplateData::for_booking(&booking, &booking.patient_contact),
            )
            .await;

        assert!(matches!(result, Err(NotificationError::Validation(_))));
        assert_eq!(sink.attempts(), 0);
    }
}
