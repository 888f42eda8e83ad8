//! SMTP notifications through the organisation's mail relay.

use crate::config::toml_config::SmtpConfig;
use crate::domain::ports::Mailer;
use crate::utils::error::{OpsError, Result};
use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

const DEFAULT_SMTP_PORT: u16 = 587;

pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// Login name and sender address. A bare user name gets the configured
    /// domain appended.
    pub fn sender(&self) -> String {
        sender_address(&self.config.username, self.config.domain_suffix.as_deref())
    }
}

pub fn sender_address(username: &str, domain_suffix: Option<&str>) -> String {
    match domain_suffix {
        Some(domain) if !username.contains('@') => {
            format!("{}@{}", username, domain.trim_start_matches('@'))
        }
        _ => username.to_string(),
    }
}

fn email_error(e: impl std::fmt::Display) -> OpsError {
    OpsError::Email {
        message: e.to_string(),
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<()> {
        if to.is_empty() {
            tracing::warn!("No recipients for '{}', nothing sent", subject);
            return Ok(());
        }

        let sender = self.sender();
        let mut builder = Message::builder()
            .from(sender.parse().map_err(email_error)?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);
        for address in to {
            builder = builder.to(address.parse().map_err(email_error)?);
        }
        let email = builder.body(body.to_string()).map_err(email_error)?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
            .map_err(email_error)?
            .port(self.config.port.unwrap_or(DEFAULT_SMTP_PORT))
            .credentials(Credentials::new(sender.clone(), self.config.password.clone()))
            .build();

        mailer.send(email).await.map_err(email_error)?;
        tracing::info!(recipients = to.len(), subject, "Notification email sent");
        Ok(())
    }
}
