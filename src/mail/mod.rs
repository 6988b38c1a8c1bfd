//! Outbound mail.
//!
//! Controllers hand a [`EmailMessage`] to the [`Mailer`], which returns as soon
//! as the message is queued; delivery runs on the blocking pool and failures
//! are only logged. The actual transport sits behind [`EmailSender`]:
//! `LogEmailSender` writes messages to the log (development), and
//! `RecordingEmailSender` keeps them in memory for tests.

use anyhow::Result;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

#[derive(Clone, Debug, PartialEq)]
pub struct EmailMessage {
    pub to_email: String,
    pub subject: String,
    pub template: String,
    pub data: Value,
}

impl EmailMessage {
    #[must_use]
    pub fn new(to_email: &str, subject: &str, template: &str, data: Value) -> Self {
        Self {
            to_email: to_email.to_string(),
            subject: subject.to_string(),
            template: template.to_string(),
            data,
        }
    }
}

/// Email delivery abstraction.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error describing why it failed.
    fn send(&self, from: &str, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, from: &str, message: &EmailMessage) -> Result<()> {
        info!(
            from,
            to_email = %message.to_email,
            subject = %message.subject,
            template = %message.template,
            data = %message.data,
            "email send stub"
        );
        Ok(())
    }
}

/// Keeps every delivered message in memory.
#[derive(Debug, Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingEmailSender {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl EmailSender for RecordingEmailSender {
    fn send(&self, _from: &str, message: &EmailMessage) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("recording sender lock poisoned"))?
            .push(message.clone());
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("this site is not configured to send email")]
    Disabled,
    #[error("invalid recipient address: {0:?}")]
    InvalidRecipient(String),
}

#[derive(Clone)]
pub struct Mailer {
    sender: Arc<dyn EmailSender>,
    from: String,
    enabled: bool,
}

impl Mailer {
    #[must_use]
    pub fn new(sender: Arc<dyn EmailSender>, from: &str) -> Self {
        Self {
            sender,
            from: from.to_string(),
            enabled: true,
        }
    }

    /// A mailer that refuses every message.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            sender: Arc::new(LogEmailSender),
            from: String::new(),
            enabled: false,
        }
    }

    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Queue a message for delivery.
    ///
    /// # Errors
    /// Returns an error when mail is disabled or the recipient is empty; delivery
    /// failures happen later and are logged.
    pub fn send(&self, message: EmailMessage) -> Result<(), MailError> {
        if !self.enabled {
            return Err(MailError::Disabled);
        }
        if message.to_email.trim().is_empty() {
            return Err(MailError::InvalidRecipient(message.to_email));
        }

        let sender = Arc::clone(&self.sender);
        let from = self.from.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(err) = sender.send(&from, &message) {
                error!(
                    to_email = %message.to_email,
                    template = %message.template,
                    "Failed to deliver email: {err}"
                );
            }
        });
        Ok(())
    }
}
