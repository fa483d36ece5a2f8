//! Progress notifications.
//!
//! Delivery is best-effort: callers log a [`NotifyError`] and carry on. Nothing in
//! the pipeline retries a message.

use crate::config::{NotificationConfig, TelegramConfig};
use crate::error::{NotifyError, Result};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Sends a human-readable status message somewhere a person will see it
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `message`
    async fn notify(&self, message: &str) -> std::result::Result<(), NotifyError>;
}

/// Build the notifier described by the configuration
///
/// Telegram is wrapped in a [`RateLimitedNotifier`]; with nothing configured the
/// result is a [`NoOpNotifier`].
pub fn from_config(config: &NotificationConfig) -> Result<Arc<dyn Notifier>> {
    match &config.telegram {
        Some(telegram) => {
            let min_interval = telegram.min_interval;
            let inner = TelegramNotifier::new(telegram.clone())?;
            Ok(Arc::new(RateLimitedNotifier::new(inner, min_interval)))
        }
        None => Ok(Arc::new(NoOpNotifier)),
    }
}

/// Discards every message
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpNotifier;

#[async_trait::async_trait]
impl Notifier for NoOpNotifier {
    async fn notify(&self, message: &str) -> std::result::Result<(), NotifyError> {
        tracing::trace!(message, "notification discarded (no notifier configured)");
        Ok(())
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Telegram Bot API `sendMessage` client
#[derive(Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
    timeout: Duration,
}

impl std::fmt::Debug for TelegramNotifier {
    // The endpoint embeds the bot token, keep it out of logs
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("chat_id", &self.chat_id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TelegramNotifier {
    /// Create a notifier posting to `{api_base}/bot{token}/sendMessage`
    pub fn new(config: TelegramConfig) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        let endpoint = format!(
            "{}/bot{}/sendMessage",
            config.api_base.trim_end_matches('/'),
            config.bot_token
        );
        Ok(Self {
            client,
            endpoint,
            chat_id: config.chat_id,
            timeout: config.timeout,
        })
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) -> std::result::Result<(), NotifyError> {
        let request = self.client.post(&self.endpoint).json(&SendMessage {
            chat_id: &self.chat_id,
            text: message,
        });

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| NotifyError::Timeout(self.timeout))??;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        tracing::debug!(chat_id = %self.chat_id, "notification sent");
        Ok(())
    }
}

/// Spaces messages at least `min_interval` apart
///
/// The chat-bot API throttles bursts. A message that arrives too early waits for
/// the next free slot instead of being dropped, so the final lifecycle message of a
/// short run still goes out. Slots are handed out in call order.
#[derive(Debug)]
pub struct RateLimitedNotifier<N> {
    inner: N,
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl<N: Notifier> RateLimitedNotifier<N> {
    /// Wrap `inner`
    pub fn new(inner: N, min_interval: Duration) -> Self {
        Self {
            inner,
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// The wrapped notifier
    pub fn inner(&self) -> &N {
        &self.inner
    }

    /// Reserve the earliest free send time and push the next one back
    fn claim_slot(&self) -> Instant {
        let now = Instant::now();
        let mut next_slot = match self.next_slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let slot = match *next_slot {
            Some(free_at) if free_at > now => free_at,
            _ => now,
        };
        *next_slot = Some(slot + self.min_interval);
        slot
    }
}

#[async_trait::async_trait]
impl<N: Notifier> Notifier for RateLimitedNotifier<N> {
    async fn notify(&self, message: &str) -> std::result::Result<(), NotifyError> {
        let slot = self.claim_slot();
        let wait = slot.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "notification held back by rate limit");
            tokio::time::sleep_until(slot).await;
        }
        self.inner.notify(message).await
    }
}
