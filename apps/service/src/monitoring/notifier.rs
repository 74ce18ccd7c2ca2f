use chrono::{DateTime, Local};
use reqwest::Client;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::types::Status;
use crate::targets::Target;

/// Per request limit of the HTTP notifiers
pub const SEND_TIMEOUT: Duration = Duration::from_secs(8);
const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notifier is not configured")]
    NotConfigured,
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Delivers a short text alert to an external channel
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), NotifyError>;
}

/// Background delivery of alerts that can be drained before shutdown.
///
/// Sends are never retried and failures are only logged. Clones share the
/// same set of pending sends.
#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    pending: Arc<Mutex<JoinSet<bool>>>,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier, pending: Arc::new(Mutex::new(JoinSet::new())) }
    }

    /// Send `text` on a spawned task. Must be called within a tokio runtime.
    pub fn dispatch(&self, text: String) {
        let notifier = self.notifier.clone();
        let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        // reap what already finished so the set stays small
        while pending.try_join_next().is_some() {}

        pending.spawn(async move {
            match notifier.send(&text).await {
                Ok(()) => {
                    debug!("Notification delivered");
                    true
                }
                Err(NotifyError::NotConfigured) => {
                    debug!("Notification skipped, no notifier configured");
                    false
                }
                Err(e) => {
                    warn!(error = %e, "Notification delivery failed");
                    false
                }
            }
        });
    }

    /// Wait up to `limit` for pending sends, returns how many were delivered.
    ///
    /// Sends still running after `limit` are aborted.
    pub async fn flush(&self, limit: Duration) -> usize {
        let mut pending = {
            let mut guard = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };

        let mut delivered = 0;
        let drained = tokio::time::timeout(limit, async {
            while let Some(joined) = pending.join_next().await {
                if matches!(joined, Ok(true)) {
                    delivered += 1;
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(pending = pending.len(), ?limit, "Dropping notifications still in flight");
            pending.abort_all();
        }
        delivered
    }
}

/// Alert text for a reachability flip
pub fn transition_message(target: &Target, status: Status, at: DateTime<Local>) -> String {
    let marker = if status.is_online() { "🟢" } else { "🔴" };
    let mut text = format!("{marker} {} changed status:\n", target.address);
    if !target.group.is_empty() {
        text.push_str(&format!("Group: {}\n", target.group));
    }
    if !target.note.is_empty() {
        text.push_str(&format!("Note: {}\n", target.note));
    }
    text.push_str(&format!("Status: {status}\nTime: {}", at.format("%Y-%m-%d %H:%M:%S")));
    text
}

/// Announcement for a target that was just added
pub fn added_message(target: &Target) -> String {
    let or_dash = |value: &str| if value.is_empty() { "-".to_string() } else { value.to_string() };
    format!(
        "▶️ Added to monitoring:\nGroup: {}\nAddress: {}\nNote: {}",
        or_dash(&target.group),
        target.address,
        or_dash(&target.note)
    )
}

/// Stand-in used when no channel is configured
pub struct DisabledNotifier;

#[async_trait::async_trait]
impl Notifier for DisabledNotifier {
    async fn send(&self, _text: &str) -> Result<(), NotifyError> {
        Err(NotifyError::NotConfigured)
    }
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

/// Telegram Bot API `sendMessage`
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_base: TELEGRAM_API.to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
        })
    }

    /// Point at another Bot API host
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base.trim_end_matches('/'), self.token)
    }
}

/// Escapes text for Telegram's HTML parse mode
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        if self.token.is_empty() || self.chat_id.is_empty() {
            return Err(NotifyError::NotConfigured);
        }

        let escaped = escape_html(text);
        let payload = TelegramMessage {
            chat_id: &self.chat_id,
            text: &escaped,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let response = self.client.post(self.endpoint()).json(&payload).send().await?;
        let status = response.status();
        debug!(%status, "Telegram send status");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::SendFailed(format!(
                "Telegram API returned {status}: {body}"
            )));
        }

        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    text: &'a str,
}

/// POSTs `{"text": ...}` as JSON to an arbitrary endpoint
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        if self.url.is_empty() {
            return Err(NotifyError::NotConfigured);
        }

        let response = self.client.post(&self.url).json(&WebhookMessage { text }).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::SendFailed(format!("Webhook returned {status}")));
        }

        Ok(())
    }
}
