//! Outbound transactional email.
//!
//! Order emails are best-effort: callers log a [`NotificationError`] and move
//! on, the order state is never rolled back because a mail failed.

pub mod templates;

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::AppConfig;

/// A rendered HTML email ready to hand to a [`Mailer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// Notification service errors
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Failed to build email: {0}")]
    Build(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), NotificationError>;
}

/// SMTP relay mailer.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(
        host: &str,
        port: u16,
        username: String,
        password: String,
        from: String,
    ) -> Result<Self, NotificationError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| NotificationError::Transport(e.to_string()))?
            .port(port)
            .credentials(Credentials::new(username, password))
            .build();

        Ok(Self { transport, from })
    }

    /// Builds an SMTP mailer when a relay host is configured.
    pub fn from_config(config: &AppConfig) -> Result<Option<Self>, NotificationError> {
        let Some(host) = config.smtp_host.as_deref().filter(|h| !h.trim().is_empty()) else {
            return Ok(None);
        };

        Self::new(
            host,
            config.smtp_port,
            config.smtp_username.clone().unwrap_or_default(),
            config.smtp_password.clone().unwrap_or_default(),
            config.mail_from.clone(),
        )
        .map(Some)
    }

    fn build(&self, message: EmailMessage) -> Result<Message, NotificationError> {
        Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e| NotificationError::InvalidAddress(format!("from: {}", e)))?,
            )
            .to(message
                .to
                .parse()
                .map_err(|e| NotificationError::InvalidAddress(format!("to: {}", e)))?)
            .subject(message.subject)
            .header(ContentType::TEXT_HTML)
            .body(message.html_body)
            .map_err(|e| NotificationError::Build(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    #[instrument(skip(self, message), fields(to = %message.to, subject = %message.subject))]
    async fn send(&self, message: EmailMessage) -> Result<(), NotificationError> {
        let email = self.build(message)?;

        self.transport
            .send(email)
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        info!("Email sent");
        Ok(())
    }
}

/// Mailer used when no SMTP relay is configured: records the send in the log.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), NotificationError> {
        info!(
            to = %message.to,
            subject = %message.subject,
            body_len = message.html_body.len(),
            "SMTP not configured; email logged instead of sent"
        );
        Ok(())
    }
}
