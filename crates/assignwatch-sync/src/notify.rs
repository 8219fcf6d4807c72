//! Change notifications. Delivery is pluggable; the pipeline only composes
//! messages and hands them to a [`Notifier`].

use std::path::PathBuf;

use anyhow::{Context, Result};
use assignwatch_core::{fields, NormalizedRecord};
use assignwatch_storage::write_atomically;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub recipient: Option<String>,
}

/// Builds the update message for newly added assignments followed by the
/// full change log. `now` is local wall-clock time.
pub fn compose_notification(
    newly_added: &[NormalizedRecord],
    change_log: &[String],
    now: NaiveDateTime,
) -> Notification {
    let subject = format!("Bridge Assignments Update - {}", now.format("%Y-%m-%d %H:%M"));

    let mut body = format!("Found {} new assignments.\n\nSummary:\n", newly_added.len());
    for (index, record) in newly_added.iter().enumerate() {
        body.push_str(&format!(
            "\nAssignment #{}:\nCustomer: {}\nDate/Time: {}\nLanguage: {}\nService Type: {}\nLocation: {}\nInfo: {}\nComments: {}\n",
            index + 1,
            record.display_value(fields::CUSTOMER),
            record.display_value(fields::DATE_TIME),
            record.display_value(fields::LANGUAGE),
            record.display_value(fields::SERVICE_TYPE),
            record.display_value(fields::LOCATION),
            record.display_value(fields::INFO),
            record.display_value(fields::COMMENTS),
        ));
    }
    if !change_log.is_empty() {
        body.push_str("\nChanges:\n");
        for line in change_log {
            body.push_str(line);
            body.push('\n');
        }
    }

    Notification {
        subject,
        body,
        recipient: None,
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Writes each message as a text file for a separate mailer to pick up.
#[derive(Debug, Clone)]
pub struct OutboxNotifier {
    dir: PathBuf,
    sender: Option<String>,
}

impl OutboxNotifier {
    pub fn new(dir: impl Into<PathBuf>, sender: Option<String>) -> Self {
        Self {
            dir: dir.into(),
            sender,
        }
    }

    pub fn render(&self, notification: &Notification) -> String {
        let mut out = String::new();
        if let Some(sender) = &self.sender {
            out.push_str(&format!("From: {sender}\n"));
        }
        if let Some(to) = notification.recipient.as_ref().or(self.sender.as_ref()) {
            out.push_str(&format!("To: {to}\n"));
        }
        out.push_str(&format!("Subject: {}\n\n{}", notification.subject, notification.body));
        out
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    fn name(&self) -> &str {
        "outbox"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let file_name = format!(
            "{}-{}.txt",
            chrono::Utc::now().format("%Y%m%dT%H%M%S"),
            Uuid::new_v4().simple()
        );
        let path = self.dir.join(file_name);
        write_atomically(&path, self.render(notification).as_bytes())
            .await
            .with_context(|| format!("writing notification {}", path.display()))?;
        info!(path = %path.display(), subject = %notification.subject, "notification queued");
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(subject = %notification.subject, "{}", notification.body);
        Ok(())
    }
}
