//! Outbound notification seam for freshly minted signing links

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A message for the recipient of a public signing link
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkNotification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl LinkNotification {
    pub fn new(recipient: &str, file_name: &str, url: &str, expires_at: Option<DateTime<Utc>>) -> Self {
        let expiry = expires_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        Self {
            recipient: recipient.to_string(),
            subject: format!("Please sign document: {}", file_name),
            body: format!(
                "You can sign the document using the following link: {}\nThis link will expire at {}",
                url, expiry
            ),
        }
    }
}

/// Delivery is owned by the caller; failures are reported, never retried here
pub trait LinkNotifier: Send + Sync {
    fn notify(&self, notification: &LinkNotification) -> Result<(), String>;
}

/// Drops every notification
#[derive(Debug, Default)]
pub struct NoopNotifier;

impl LinkNotifier for NoopNotifier {
    fn notify(&self, _notification: &LinkNotification) -> Result<(), String> {
        Ok(())
    }
}

/// Keeps notifications in memory for inspection
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<LinkNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<LinkNotification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl LinkNotifier for RecordingNotifier {
    fn notify(&self, notification: &LinkNotification) -> Result<(), String> {
        self.sent
            .lock()
            .map_err(|_| "notification log poisoned".to_string())?
            .push(notification.clone());
        Ok(())
    }
}
