//! Webhook dispatch: fire-and-forget JSON posts to operator endpoints.

use std::time::Duration;

use async_trait::async_trait;
use automation_core::{AutomationError, AutomationResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

#[async_trait]
pub trait WebhookDispatcher: Send + Sync {
    async fn post(&self, url: &str, payload: serde_json::Value) -> AutomationResult<()>;
}

/// Posts payloads over HTTP. Any non-2xx response counts as a rejection.
pub struct HttpWebhookDispatcher {
    client: reqwest::Client,
    timeout_ms: u64,
}

impl HttpWebhookDispatcher {
    pub fn new(timeout: Duration) -> AutomationResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("automation-worker")
            .build()
            .map_err(|e| AutomationError::MissingConfiguration(format!("webhook client: {e}")))?;
        Ok(Self {
            client,
            timeout_ms: timeout.as_millis() as u64,
        })
    }
}

#[async_trait]
impl WebhookDispatcher for HttpWebhookDispatcher {
    async fn post(&self, url: &str, payload: serde_json::Value) -> AutomationResult<()> {
        let target = Url::parse(url).map_err(|e| {
            AutomationError::MissingConfiguration(format!("invalid webhook url {url}: {e}"))
        })?;

        let response = self
            .client
            .post(target)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AutomationError::ChannelTimeout {
                        channel: "webhook",
                        timeout_ms: self.timeout_ms,
                    }
                } else {
                    AutomationError::ChannelRejected {
                        channel: "webhook",
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "Webhook endpoint refused payload");
            return Err(AutomationError::ChannelRejected {
                channel: "webhook",
                reason: format!("endpoint answered {status}"),
            });
        }

        metrics::counter!("automation.webhooks_dispatched").increment(1);
        debug!(url = %url, status = status.as_u16(), "Webhook delivered");
        Ok(())
    }
}

/// A payload recorded by the in-memory dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookCall {
    pub url: String,
    pub payload: serde_json::Value,
    pub posted_at: DateTime<Utc>,
}

/// In-memory dispatcher that records every post.
#[derive(Default)]
pub struct WebhookOutbox {
    calls: Mutex<Vec<WebhookCall>>,
}

impl WebhookOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<WebhookCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl WebhookDispatcher for WebhookOutbox {
    async fn post(&self, url: &str, payload: serde_json::Value) -> AutomationResult<()> {
        metrics::counter!("automation.webhooks_dispatched").increment(1);
        self.calls.lock().push(WebhookCall {
            url: url.to_string(),
            payload,
            posted_at: Utc::now(),
        });
        Ok(())
    }
}
