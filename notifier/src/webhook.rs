use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use streamwatch_common::config::NotifyConfig;
use streamwatch_common::frame::TriggerEvent;
use tracing::{debug, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
}

/// Human-readable notification line for a trigger.
pub fn format_message(event: &TriggerEvent) -> String {
    let at: DateTime<Utc> = Utc
        .timestamp_millis_opt(event.captured_at_ms)
        .single()
        .unwrap_or_else(Utc::now);
    format!(
        "Change detected on {channel}: {metric} score {score:.2} exceeded threshold {threshold} at {at} ({url})",
        channel = event.channel,
        metric = event.metric.as_str(),
        score = event.score,
        threshold = event.threshold,
        at = at.format("%Y-%m-%d %H:%M:%S UTC"),
        url = event.source_url,
    )
}

/// Waits between delivery attempts: 2s doubling up to 30s.
pub fn backoff_schedule(max_attempts: u32) -> Vec<Duration> {
    let mut delays = Vec::new();
    let mut backoff = INITIAL_BACKOFF;
    for _ in 1..max_attempts {
        delays.push(backoff);
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
    delays
}

pub struct WebhookClient {
    client: reqwest::Client,
    url: String,
    max_attempts: u32,
}

impl WebhookClient {
    pub fn new(config: &NotifyConfig) -> Result<Self, NotifyError> {
        if config.webhook_url.is_empty() {
            return Err(NotifyError::Config("notify.webhook_url is not set".into()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| NotifyError::Config(e.to_string()))?;
        Ok(Self {
            client,
            url: config.webhook_url.clone(),
            max_attempts: config.max_attempts.max(1),
        })
    }

    /// Post `text`, retrying with backoff until `max_attempts` is used up.
    pub async fn deliver(&self, text: &str) -> Result<(), NotifyError> {
        let mut delays = backoff_schedule(self.max_attempts).into_iter();
        let mut attempt = 1;
        loop {
            match self.post(text).await {
                Ok(()) => {
                    debug!(attempt, "notification delivered");
                    return Ok(());
                }
                Err(e) => match delays.next() {
                    Some(delay) => {
                        warn!(error = %e, attempt, "notification failed, retrying in {:?}", delay);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        return Err(NotifyError::Exhausted {
                            attempts: attempt,
                            last: e.to_string(),
                        });
                    }
                },
            }
        }
    }

    async fn post(&self, text: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { text })
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notifier misconfigured: {0}")]
    Config(String),
    #[error("webhook request failed: {0}")]
    Http(String),
    #[error("webhook returned HTTP {0}")]
    Status(u16),
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}
