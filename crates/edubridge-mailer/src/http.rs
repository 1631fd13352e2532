//! Mailer backed by a transactional email provider's HTTP API.
//!
//! Messages are posted as JSON to `endpoint` with a bearer API key. The
//! provider answers with the id it will use in tracking webhooks.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::{MailError, Mailer, OutgoingEmail, SendReceipt};

/// Longest provider error body kept in [`MailError::Provider`].
const MAX_ERROR_BODY: usize = 512;

/// Settings for [`HttpMailer`].
#[derive(Debug, Clone)]
pub struct HttpMailerConfig {
    /// Provider send endpoint, e.g. `https://api.provider.test/v1/send`.
    pub endpoint: String,
    /// API key sent as a bearer token.
    pub api_key: String,
    /// Sender address.
    pub from_address: String,
    /// Sender display name.
    pub from_name: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Provider acknowledgement. Providers differ on the field name.
#[derive(Debug, Deserialize)]
struct ProviderAck {
    #[serde(alias = "messageId", alias = "message_id")]
    id: String,
}

/// Sends messages through a provider HTTP API.
#[derive(Debug, Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    config: HttpMailerConfig,
}

impl HttpMailer {
    /// Builds the mailer and its HTTP client.
    pub fn new(config: HttpMailerConfig) -> Result<Self, MailError> {
        if config.endpoint.trim().is_empty() {
            return Err(MailError::NotConfigured("endpoint is empty".to_string()));
        }
        if config.api_key.trim().is_empty() {
            return Err(MailError::NotConfigured("apiKey is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self { client, config })
    }

    /// JSON payload posted for `email`.
    fn request_body(&self, email: &OutgoingEmail) -> Value {
        let mut metadata = serde_json::Map::new();
        if let Some(reference) = &email.reference {
            metadata.insert("reference".to_string(), Value::String(reference.clone()));
        }

        json!({
            "from": { "email": self.config.from_address, "name": self.config.from_name },
            "to": [{ "email": email.to, "name": email.to_name }],
            "subject": email.subject,
            "text": email.text_body,
            "tags": [email.kind.to_string()],
            "metadata": metadata,
            "trackOpens": true,
            "trackClicks": true,
        })
    }
}

fn parse_ack(body: &str) -> Result<SendReceipt, MailError> {
    let ack: ProviderAck = serde_json::from_str(body)
        .map_err(|e| MailError::Transport(format!("unreadable provider response: {e}")))?;
    Ok(SendReceipt::new(ack.id))
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[async_trait]
impl Mailer for HttpMailer {
    #[instrument(skip(self, email), fields(to = %email.to, kind = %email.kind))]
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, MailError> {
        if !email.to.contains('@') {
            return Err(MailError::InvalidRecipient(email.to.clone()));
        }

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(email))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            warn!(status = status.as_u16(), "Provider rejected recipient");
            return Err(MailError::Rejected {
                recipient: email.to.clone(),
                reason: truncate(&body),
            });
        }
        if !status.is_success() {
            warn!(status = status.as_u16(), "Provider send failed");
            return Err(MailError::Provider {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        let receipt = parse_ack(&body)?;
        debug!(message_id = %receipt.message_id, "Provider accepted message");
        Ok(receipt)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
