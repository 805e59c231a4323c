//! Generic webhook notification sink.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header::HeaderMap};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::{classify_failure, classify_send_error};
use crate::notification::{NotificationRecord, NotificationSink};
use crate::retry::{RetryAction, RetryPolicy, retry_with_backoff};
use crate::utils::http_client::build_request_client;
use crate::{Error, Result};

/// Webhook sink configuration.
#[derive(Clone)]
pub struct WebhookConfig {
    /// Webhook URL.
    pub url: Url,
    /// Optional bearer token.
    pub bearer_token: Option<String>,
    /// Custom headers.
    pub headers: Vec<(String, String)>,
    /// Request timeout.
    pub timeout: Duration,
    /// Delivery retry policy.
    pub retry: RetryPolicy,
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("host", &self.url.host_str())
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field(
                "headers",
                &self.headers.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            )
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl WebhookConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            bearer_token: None,
            headers: Vec::new(),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::delivery(),
        }
    }
}

/// Generic webhook notification sink.
pub struct WebhookSink {
    config: WebhookConfig,
    client: Client,
    headers: HeaderMap,
    retry_token: CancellationToken,
}

impl WebhookSink {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        if !matches!(config.url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "Webhook URL must be http(s), got '{}'",
                config.url
            )));
        }
        let client = build_request_client(config.timeout)?;
        let headers = Self::build_headers(&config);
        Ok(Self {
            config,
            client,
            headers,
            retry_token: CancellationToken::new(),
        })
    }

    /// Build the request headers.
    fn build_headers(config: &WebhookConfig) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for (name, value) in &config.headers {
            match (
                name.parse::<reqwest::header::HeaderName>(),
                value.parse::<reqwest::header::HeaderValue>(),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = %name, "Ignoring invalid webhook header"),
            }
        }

        if let Some(token) = &config.bearer_token
            && let Ok(value) = format!("Bearer {}", token).parse()
        {
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        headers
    }

    /// Build the JSON payload.
    fn build_payload(record: &NotificationRecord) -> serde_json::Value {
        json!({
            "channel": record.destination_channel,
            "severity": record.severity.to_string(),
            "title": record.title,
            "body": record.body,
            "link": record.deep_link,
            "dedupe_key": record.dedupe_key,
            "topic": record.topic.as_str(),
            "event_type": record.event_type,
            "entity_id": record.entity_id,
            "namespace": record.namespace,
            "index": record.index,
            "timestamp": record.timestamp.to_rfc3339(),
        })
    }

    async fn post(&self, payload: &serde_json::Value) -> RetryAction<()> {
        let response = match self
            .client
            .post(self.config.url.clone())
            .headers(self.headers.clone())
            .json(payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return classify_send_error("webhook", e),
        };

        if response.status().is_success() {
            RetryAction::Success(())
        } else {
            classify_failure("webhook", response).await
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn sink_type(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, record: &NotificationRecord) -> Result<()> {
        let payload = Self::build_payload(record);
        retry_with_backoff(&self.config.retry, &self.retry_token, |_| {
            self.post(&payload)
        })
        .await?;

        debug!(dedupe_key = %record.dedupe_key, "Webhook notification sent");
        Ok(())
    }
}
