//! Mail delivery over an HTTP mail API.
//!
//! The digest is posted as JSON to the configured endpoint, authenticated with
//! the sender's app credential as a bearer token:
//!
//! ```json
//! { "from": "...", "to": ["..."], "subject": "...", "text": "..." }
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{info, instrument};

use super::digest::Digest;
use crate::error::MailError;

pub const DEFAULT_MAIL_API_URL: &str = "https://api.resend.com/emails";

/// Delivers a rendered digest to its recipient.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Send one digest.
    ///
    /// # Errors
    ///
    /// [`MailError::Http`] when the request could not be made, or
    /// [`MailError::Rejected`] when the API answered with a non-success status.
    async fn send(&self, digest: &Digest) -> Result<(), MailError>;
}

/// Sender, credential and recipient. All three are needed to send.
#[derive(Clone)]
pub struct MailCredentials {
    pub sender: String,
    pub app_password: String,
    pub recipient: String,
}

impl MailCredentials {
    /// `None` unless every part is present and non-blank.
    pub fn from_parts(
        sender: Option<String>,
        app_password: Option<String>,
        recipient: Option<String>,
    ) -> Option<Self> {
        let present = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Some(Self {
            sender: present(sender)?,
            app_password: present(app_password)?,
            recipient: present(recipient)?,
        })
    }
}

impl fmt::Debug for MailCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailCredentials")
            .field("sender", &self.sender)
            .field("app_password", &"<redacted>")
            .field("recipient", &self.recipient)
            .finish()
    }
}

#[derive(Serialize)]
struct OutboundMessage<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

/// [`MailTransport`] posting to an HTTP mail API.
#[derive(Debug, Clone)]
pub struct HttpMailTransport {
    client: Client,
    api_url: String,
    credentials: MailCredentials,
}

impl HttpMailTransport {
    /// Create a transport posting to `api_url`.
    ///
    /// # Arguments
    ///
    /// * `api_url` - Mail API endpoint, for example [`DEFAULT_MAIL_API_URL`]
    /// * `credentials` - Sender, API key and recipient
    /// * `timeout` - Bound on each request
    pub fn new(
        api_url: impl Into<String>,
        credentials: MailCredentials,
        timeout: Duration,
    ) -> Result<Self, MailError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            credentials,
        })
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    #[instrument(level = "info", skip_all, fields(api_url = %self.api_url, to = %self.credentials.recipient))]
    async fn send(&self, digest: &Digest) -> Result<(), MailError> {
        let message = OutboundMessage {
            from: &self.credentials.sender,
            to: [&self.credentials.recipient],
            subject: &digest.subject,
            text: &digest.body,
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.credentials.app_password)
            .json(&message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(subject = %digest.subject, "Digest delivered");
        Ok(())
    }
}
