use super::email::Email;
use crate::config::MailerConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("email has no recipients")]
    NoRecipients,

    #[error("mail relay request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("mail relay rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Outbound email interface.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a [String],
    raw: String,
}

/// Posts rendered messages to an HTTP mail relay.
pub struct HttpMailer {
    client: reqwest::Client,
    url: Url,
}

impl HttpMailer {
    pub fn new(config: &MailerConfig) -> Result<Self, MailError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(HttpMailer {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        if email.to.is_empty() {
            return Err(MailError::NoRecipients);
        }

        let message = RelayMessage {
            from: &email.from,
            to: &email.to,
            raw: email.to_mime(),
        };

        let response = self
            .client
            .post(self.url.clone())
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

        tracing::debug!(to = ?email.to, subject = %email.subject, "email sent");
        Ok(())
    }
}
