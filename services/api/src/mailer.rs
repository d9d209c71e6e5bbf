//! Notification gateway
//!
//! Outgoing email goes through a transactional mail HTTP API. Without an API
//! URL configured, messages are written to the log instead, which is enough
//! for local development.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::config::MailSettings;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("Mail transport error: {0}")]
    Transport(String),

    #[error("Mail API rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

pub type MailResult<T> = Result<T, MailError>;

/// One outgoing message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Email {
    pub subject: String,
    #[serde(rename = "from")]
    pub sender: String,
    #[serde(rename = "to")]
    pub recipients: Vec<String>,
    pub html: String,
    pub text: String,
}

impl Email {
    pub fn confirmation(sender: &str, recipient: &str, link: &str) -> Self {
        Self {
            subject: "Please confirm your email".to_string(),
            sender: sender.to_string(),
            recipients: vec![recipient.to_string()],
            html: format!(
                "<p>Welcome! Thanks for signing up. Please follow this link to activate your account:</p>\
                 <p><a href=\"{link}\">{link}</a></p>"
            ),
            text: format!(
                "Welcome! Thanks for signing up. Please follow this link to activate your account:\n{link}\n"
            ),
        }
    }

    pub fn password_reset(sender: &str, recipient: &str, link: &str, ttl: Duration) -> Self {
        let minutes = (ttl.as_secs() / 60).max(1);
        Self {
            subject: "Password reset requested".to_string(),
            sender: sender.to_string(),
            recipients: vec![recipient.to_string()],
            html: format!(
                "<p>Follow this link to choose a new password. It is valid for {minutes} minutes.</p>\
                 <p><a href=\"{link}\">{link}</a></p>\
                 <p>If you did not ask for a reset, ignore this email.</p>"
            ),
            text: format!(
                "Follow this link to choose a new password. It is valid for {minutes} minutes.\n{link}\n\
                 If you did not ask for a reset, ignore this email.\n"
            ),
        }
    }

    pub fn share(sender: &str, recipient: &str, owner: &str, filename: &str, link: &str) -> Self {
        Self {
            subject: format!("{owner} shared {filename} with you"),
            sender: sender.to_string(),
            recipients: vec![recipient.to_string()],
            html: format!(
                "<p>{owner} shared <strong>{filename}</strong> with you.</p>\
                 <p><a href=\"{link}\">Download {filename}</a></p>"
            ),
            text: format!("{owner} shared {filename} with you.\nDownload it here: {link}\n"),
        }
    }
}

/// Sends email
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> MailResult<()>;
}

/// Mailer posting JSON to a transactional mail API
#[derive(Clone)]
pub struct HttpMailer {
    client: Client,
    api_url: String,
    api_key: Option<String>,
}

impl HttpMailer {
    pub fn new(api_url: String, api_key: Option<String>, timeout: Duration) -> MailResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MailError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url,
            api_key,
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &Email) -> MailResult<()> {
        let mut request = self.client.post(&self.api_url).json(email);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            error!("Failed to reach mail API: {}", e);
            MailError::Transport(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Mail API returned {}: {}", status, body);
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!("Sent \"{}\" to {:?}", email.subject, email.recipients);
        Ok(())
    }
}

/// Mailer that only logs
#[derive(Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> MailResult<()> {
        info!(
            "Email to {:?} from {}: {}\n{}",
            email.recipients, email.sender, email.subject, email.text
        );
        Ok(())
    }
}

/// Pick the mailer matching the configuration
pub fn from_settings(settings: &MailSettings) -> MailResult<std::sync::Arc<dyn Mailer>> {
    match &settings.api_url {
        Some(url) if !url.is_empty() => Ok(std::sync::Arc::new(HttpMailer::new(
            url.clone(),
            settings.api_key.clone(),
            Duration::from_secs(settings.timeout_secs),
        )?)),
        _ => {
            info!("No mail API configured, emails will be logged");
            Ok(std::sync::Arc::new(LogMailer))
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use tokio::sync::Mutex;

    use super::*;

    /// Mailer that keeps every message and can be told to fail or stall
    #[derive(Clone, Default)]
    pub struct RecordingMailer {
        sent: Arc<Mutex<Vec<Email>>>,
        failing: Arc<AtomicBool>,
        latency_ms: Arc<AtomicU64>,
    }

    impl RecordingMailer {
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn set_latency(&self, latency: Duration) {
            self.latency_ms
                .store(latency.as_millis() as u64, Ordering::SeqCst);
        }

        pub async fn sent(&self) -> Vec<Email> {
            self.sent.lock().await.clone()
        }

        /// The first URL-looking word in the last message sent to `recipient`
        pub async fn last_link_to(&self, recipient: &str) -> Option<String> {
            let sent = self.sent.lock().await;
            let email = sent
                .iter()
                .rev()
                .find(|e| e.recipients.iter().any(|r| r == recipient))?;
            email
                .text
                .split_whitespace()
                .find(|word| word.contains("://"))
                .map(str::to_string)
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &Email) -> MailResult<()> {
            let latency = self.latency_ms.load(Ordering::SeqCst);
            if latency > 0 {
                tokio::time::sleep(Duration::from_millis(latency)).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(MailError::Transport("mail server down".to_string()));
            }
            self.sent.lock().await.push(email.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_in_mail_api_shape() {
        let email = Email::confirmation("vault <no-reply@x.com>", "a@x.com", "http://h/c/t");
        let json = serde_json::to_value(&email).unwrap();

        assert_eq!(json["from"], "vault <no-reply@x.com>");
        assert_eq!(json["to"][0], "a@x.com");
        assert!(json["html"].as_str().unwrap().contains("http://h/c/t"));
        assert!(json["text"].as_str().unwrap().contains("http://h/c/t"));
    }

    #[test]
    fn reset_email_states_validity() {
        let email = Email::password_reset("s", "a@x.com", "http://h/r/t", Duration::from_secs(600));
        assert!(email.text.contains("10 minutes"));
    }

    #[test]
    fn missing_api_url_falls_back_to_logging() {
        let settings = MailSettings {
            api_url: None,
            api_key: None,
            sender: "s".to_string(),
            timeout_secs: 5,
        };
        assert!(from_settings(&settings).is_ok());
    }
}
