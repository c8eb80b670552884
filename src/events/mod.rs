//! Warning events for reconcile and self-renewal failures
//!
//! Every warning is logged. When a webhook is configured, warnings are also
//! posted as JSON, rate-limited to prevent floods when a provider is down
//! for a while.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::EventsConfig;

/// Reason of a failed self-renewal check or rotation
pub const REASON_RENEWAL_FAILED: &str = "ServiceCredentialRenewalFailed";

/// Reason of a failed provider reconcile
pub const REASON_RECONCILE_FAILED: &str = "ProviderReconcileFailed";

/// Recorder of warning events
pub trait EventRecorder: Send + Sync {
    fn warning(&self, reason: &str, message: &str);
}

/// Recorder that only logs
pub struct LogRecorder;

impl EventRecorder for LogRecorder {
    fn warning(&self, reason: &str, message: &str) {
        tracing::warn!(reason = %reason, "{message}");
    }
}

#[derive(Debug, Serialize)]
struct WebhookEvent {
    source: String,
    severity: &'static str,
    reason: String,
    message: String,
}

/// Recorder posting warnings to a webhook.
///
/// Rate-limits to at most one delivery per `min_interval`.
pub struct WebhookRecorder {
    url: String,
    source: String,
    min_interval: Duration,
    last_delivery: Mutex<Option<Instant>>,
    client: reqwest::Client,
}

impl WebhookRecorder {
    pub fn new(url: impl Into<String>, source: impl Into<String>, min_interval: Duration) -> Self {
        Self {
            url: url.into(),
            source: source.into(),
            min_interval,
            last_delivery: Mutex::new(None),
            client: reqwest::Client::new(),
        }
    }

    fn is_rate_limited(&self) -> bool {
        let mut last = self
            .last_delivery
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(t) = *last {
            if t.elapsed() < self.min_interval {
                return true;
            }
        }
        *last = Some(Instant::now());
        false
    }

    async fn deliver(
        client: reqwest::Client,
        url: String,
        event: WebhookEvent,
    ) -> Result<(), reqwest::Error> {
        client
            .post(&url)
            .json(&event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

impl EventRecorder for WebhookRecorder {
    fn warning(&self, reason: &str, message: &str) {
        tracing::warn!(reason = %reason, "{message}");

        if self.is_rate_limited() {
            tracing::debug!("event rate-limited, skipping webhook");
            return;
        }

        let event = WebhookEvent {
            source: self.source.clone(),
            severity: "warning",
            reason: reason.to_string(),
            message: message.to_string(),
        };
        let client = self.client.clone();
        let url = self.url.clone();

        // Fire-and-forget: don't block the caller
        tokio::spawn(async move {
            if let Err(e) = Self::deliver(client, url, event).await {
                tracing::error!(error = %e, "failed to deliver event webhook");
            }
        });
    }
}

/// Build the recorder selected by configuration.
pub fn from_config(config: &EventsConfig, source: &str) -> Arc<dyn EventRecorder> {
    match (&config.webhook_url, config.enabled) {
        (Some(url), true) => Arc::new(WebhookRecorder::new(
            url.clone(),
            source,
            Duration::from_secs(config.min_interval_secs),
        )),
        _ => Arc::new(LogRecorder),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_rate_limit() {
        let recorder = WebhookRecorder::new("http://127.0.0.1:9", "test", Duration::from_secs(60));
        assert!(!recorder.is_rate_limited());
        assert!(recorder.is_rate_limited());

        let unlimited = WebhookRecorder::new("http://127.0.0.1:9", "test", Duration::ZERO);
        assert!(!unlimited.is_rate_limited());
        assert!(!unlimited.is_rate_limited());
    }

    #[tokio::test]
    async fn test_webhook_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/events"))
            .and(body_partial_json(serde_json::json!({
                "source": "connector-engine",
                "reason": REASON_RENEWAL_FAILED,
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let event = WebhookEvent {
            source: "connector-engine".into(),
            severity: "warning",
            reason: REASON_RENEWAL_FAILED.into(),
            message: "ad: request failed".into(),
        };
        WebhookRecorder::deliver(
            reqwest::Client::new(),
            format!("{}/hooks/events", server.uri()),
            event,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let event = WebhookEvent {
            source: "connector-engine".into(),
            severity: "warning",
            reason: REASON_RECONCILE_FAILED.into(),
            message: "github: request failed".into(),
        };
        let result = WebhookRecorder::deliver(reqwest::Client::new(), server.uri(), event).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_from_config_defaults_to_logging() {
        // no webhook delivery, so no runtime is needed
        let recorder = from_config(&EventsConfig::default(), "test");
        recorder.warning(REASON_RECONCILE_FAILED, "nothing to see");
    }
}
