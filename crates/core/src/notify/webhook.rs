//! Webhook delivery of run events.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use super::{Notifier, RunEvent};

#[derive(Serialize)]
struct WebhookPayload<'a> {
    /// Chat-style webhooks (Discord, Slack-compatible) render this field.
    content: String,
    event: &'a RunEvent,
}

/// POSTs every event as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    /// Notifier posting to `url`.
    pub fn new(url: impl Into<String>) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &RunEvent) {
        let payload = WebhookPayload {
            content: event.summary(),
            event,
        };
        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("webhook accepted event for run {}", event.run());
            }
            Ok(response) => {
                warn!(
                    "webhook rejected event for run {}: {}",
                    event.run(),
                    response.status()
                );
            }
            Err(err) => {
                warn!("webhook delivery failed for run {}: {err}", event.run());
            }
        }
    }
}
