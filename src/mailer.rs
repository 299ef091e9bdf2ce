use std::sync::Mutex;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::config::AppConfig;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl EmailMessage {
    /// Subject and recipients for log lines. Bodies carry OTPs and passwords.
    pub fn envelope(&self) -> String {
        format!("'{}' to {:?}", self.subject, self.to)
    }
}

// Every way this service can hand off an email
pub enum Mailer {
    Relay(RelayMailer),
    Dummy(DummyMailer),
    Outbox(OutboxMailer),
}

impl Mailer {
    pub async fn send(&self, message: &EmailMessage) -> Result<(), String> {
        match self {
            Mailer::Relay(mailer) => mailer.send(message).await,
            Mailer::Dummy(mailer) => mailer.send(message),
            Mailer::Outbox(mailer) => mailer.send(message),
        }
    }

    pub fn outbox(&self) -> Option<&OutboxMailer> {
        match self {
            Mailer::Outbox(outbox) => Some(outbox),
            _ => None,
        }
    }
}

/// Posts messages as JSON to an HTTP mail relay.
pub struct RelayMailer {
    client: reqwest::Client,
    url: String,
}

impl RelayMailer {
    pub fn new(url: &str) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| format!("Failed to build mail relay client: {}", e))?;
        Ok(Self { client, url: url.to_string() })
    }

    pub async fn send(&self, message: &EmailMessage) -> Result<(), String> {
        debug!("Relaying {}", message.envelope());
        let response = self
            .client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .map_err(|e| {
                error!("Mail relay request failed: {}", e);
                e.to_string()
            })?;

        let status = response.status();
        if status.is_success() {
            info!("Email '{}' accepted by relay for {:?}", message.subject, message.to);
            Ok(())
        } else {
            error!("Mail relay rejected '{}' with {}", message.subject, status);
            Err(format!("mail relay responded with {}", status))
        }
    }
}

// Dummy mailer for when no relay is configured
pub struct DummyMailer {}

impl DummyMailer {
    pub fn new() -> Self {
        Self {}
    }

    pub fn send(&self, message: &EmailMessage) -> Result<(), String> {
        info!("[DUMMY] Would send email {}", message.envelope());
        Ok(())
    }
}

impl Default for DummyMailer {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps every message in memory; can be told to fail deliveries.
#[derive(Default)]
pub struct OutboxMailer {
    sent: Mutex<Vec<EmailMessage>>,
    failure: Mutex<Option<String>>,
}

impl OutboxMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&self, message: &EmailMessage) -> Result<(), String> {
        if let Some(reason) = self.failure.lock().map_err(|e| e.to_string())?.clone() {
            warn!("Outbox refusing '{}': {}", message.subject, reason);
            return Err(reason);
        }
        self.sent.lock().map_err(|e| e.to_string())?.push(message.clone());
        Ok(())
    }

    /// Makes later sends fail with `reason`, or succeed again with `None`.
    pub fn fail_with(&self, reason: Option<&str>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = reason.map(str::to_string);
        }
    }

    pub fn messages(&self) -> Vec<EmailMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn last_to(&self, recipient: &str) -> Option<EmailMessage> {
        self.messages().into_iter().rev().find(|m| m.to.iter().any(|to| to == recipient))
    }
}

/// A relay mailer when `MAIL_RELAY_URL` is set, otherwise the logging dummy.
pub fn create_mailer(config: &AppConfig) -> Mailer {
    match &config.mail_relay_url {
        Some(url) => match RelayMailer::new(url) {
            Ok(relay) => {
                info!("Sending email through relay at {}", url);
                Mailer::Relay(relay)
            }
            Err(e) => {
                error!("{}. Using dummy mailer.", e);
                Mailer::Dummy(DummyMailer::new())
            }
        },
        None => {
            warn!("MAIL_RELAY_URL not set, emails will only be logged");
            Mailer::Dummy(DummyMailer::new())
        }
    }
}
