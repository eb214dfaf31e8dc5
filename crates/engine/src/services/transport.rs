//! Notification transport.
//!
//! The scheduler talks to [`NotificationTransport`]; production wires in
//! [`SmtpReminderTransport`], which renders Askama templates and delivers
//! over SMTP via lettre. A send only counts once the transport confirms it.

use askama::Template;
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{MultiPart, SinglePart, header::ContentType},
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use thiserror::Error;

use winback_core::{Email, ReminderType};

use crate::config::SmtpConfig;

/// HTML template for a reminder email.
#[derive(Template)]
#[template(path = "email/reminder.html")]
struct ReminderEmailHtml<'a> {
    recovery_url: &'a str,
    item_count: usize,
    total: &'a str,
    final_reminder: bool,
}

/// Plain text template for a reminder email.
#[derive(Template)]
#[template(path = "email/reminder.txt")]
struct ReminderEmailText<'a> {
    recovery_url: &'a str,
    item_count: usize,
    total: &'a str,
    final_reminder: bool,
}

/// Errors that can occur when sending a reminder.
#[derive(Debug, Error)]
pub enum TransportError {
    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build email message.
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),
}

/// Everything a transport needs to deliver one reminder.
#[derive(Debug, Clone)]
pub struct ReminderMessage {
    pub recipient: Email,
    pub reminder_type: ReminderType,
    pub subject: String,
    pub recovery_url: String,
    pub item_count: usize,
    /// Pre-formatted cart total, e.g. `"USD 23.98"`.
    pub total: String,
    pub final_reminder: bool,
}

/// Delivers a reminder to its recipient.
///
/// Returning `Ok(())` means the message was confirmed handed off. Anything
/// short of confirmation must return an error so the send is retried on a
/// later pass rather than silently lost.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, message: &ReminderMessage) -> Result<(), TransportError>;
}

/// SMTP transport for reminder emails.
#[derive(Clone)]
pub struct SmtpReminderTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpReminderTransport {
    /// Create a new SMTP transport from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the SMTP relay cannot be configured.
    pub fn new(config: &SmtpConfig) -> Result<Self, SmtpError> {
        let credentials = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.expose_secret().to_string(),
        );

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self {
            mailer,
            from_address: config.from_address.clone(),
        })
    }
}

#[async_trait]
impl NotificationTransport for SmtpReminderTransport {
    async fn send(&self, message: &ReminderMessage) -> Result<(), TransportError> {
        let html = ReminderEmailHtml {
            recovery_url: &message.recovery_url,
            item_count: message.item_count,
            total: &message.total,
            final_reminder: message.final_reminder,
        }
        .render()?;
        let text = ReminderEmailText {
            recovery_url: &message.recovery_url,
            item_count: message.item_count,
            total: &message.total,
            final_reminder: message.final_reminder,
        }
        .render()?;

        let email = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| TransportError::InvalidAddress(self.from_address.clone()))?,
            )
            .to(message
                .recipient
                .as_str()
                .parse()
                .map_err(|_| TransportError::InvalidAddress(message.recipient.to_string()))?)
            .subject(&message.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html),
                    ),
            )?;

        self.mailer.send(email).await?;

        tracing::info!(
            to = %message.recipient,
            reminder_type = %message.reminder_type,
            "Reminder email sent"
        );
        Ok(())
    }
}
