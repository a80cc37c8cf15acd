//! Usage meter backed by the Schematic events API.

use super::{UsageEvent, UsageMeter};
use crate::error::ReceiptError;
use crate::pipeline::input::http_client;
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

const DEFAULT_EVENTS_URL: &str = "https://api.schematichq.com/events";
const TIMEOUT_SECS: u64 = 15;

pub struct SchematicMeter {
    http: reqwest::Client,
    api_key: String,
    events_url: String,
}

impl SchematicMeter {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ReceiptError> {
        Ok(Self {
            http: http_client(TIMEOUT_SECS)?,
            api_key: api_key.into(),
            events_url: DEFAULT_EVENTS_URL.to_string(),
        })
    }

    pub fn with_events_url(mut self, url: impl Into<String>) -> Self {
        self.events_url = url.into();
        self
    }

    /// `SCHEMATIC_API_KEY` (required) and `SCHEMATIC_EVENTS_URL` (optional).
    /// `Ok(None)` when no key is configured.
    pub fn from_env() -> Result<Option<Self>, ReceiptError> {
        let Some(key) = std::env::var("SCHEMATIC_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
        else {
            return Ok(None);
        };
        let meter = Self::new(key)?;
        Ok(Some(match std::env::var("SCHEMATIC_EVENTS_URL") {
            Ok(url) if !url.is_empty() => meter.with_events_url(url),
            _ => meter,
        }))
    }
}

#[async_trait]
impl UsageMeter for SchematicMeter {
    async fn track(&self, event: &UsageEvent) -> Result<(), ReceiptError> {
        let fail = |reason: String| ReceiptError::MeteringFailed {
            event: event.event.clone(),
            reason,
        };
        let body = json!({
            "event_type": "track",
            "body": {
                "event": event.event,
                "company": { "id": event.company_id },
                "user": { "id": event.user_id },
            },
        });

        let response = self
            .http
            .post(&self.events_url)
            .header("X-Schematic-Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(fail(format!("HTTP {}: {}", status.as_u16(), text.trim())));
        }
        debug!("Tracked '{}' for {}", event.event, event.company_id);
        Ok(())
    }
}
