//! Notification destinations:
//! - Slack Web API (`chat.postMessage`)
//! - Generic webhooks (HTTP POST of the record as JSON)

mod slack;
mod webhook;

pub use slack::{DEFAULT_SLACK_API_URL, SlackConfig, SlackSink};
pub use webhook::{WebhookConfig, WebhookSink};

use std::time::Duration;

use tracing::warn;

use crate::retry::RetryAction;
use crate::utils::http_client::parse_retry_after;
use crate::{Error, Result};

/// Sink configuration wrapper.
#[derive(Debug, Clone)]
pub enum SinkConfig {
    Slack(SlackConfig),
    Webhook(WebhookConfig),
}

impl SinkConfig {
    pub fn sink_type(&self) -> &'static str {
        match self {
            Self::Slack(_) => "slack",
            Self::Webhook(_) => "webhook",
        }
    }

    /// Channel name stamped on every record.
    pub fn destination(&self) -> &str {
        match self {
            Self::Slack(c) => &c.channel,
            Self::Webhook(c) => c.url.host_str().unwrap_or("webhook"),
        }
    }
}

/// Classify a non-success HTTP response for the retry loop.
///
/// 429 carries its `Retry-After` hint as the minimum wait; 5xx is transient;
/// every other status is permanent.
async fn classify_failure<T>(sink: &str, response: reqwest::Response) -> RetryAction<T> {
    let status = response.status();
    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();

    if status.as_u16() == 429 {
        warn!(
            sink = %sink,
            retry_after = ?retry_after,
            "Rate limited by destination"
        );
        return RetryAction::Retry {
            error: Error::RateLimited { retry_after },
            not_before: retry_after.or(Some(Duration::from_secs(1))),
        };
    }

    let error = Error::delivery(sink, format!("{status} - {}", body.trim()));
    if status.is_server_error() {
        RetryAction::retry(error)
    } else {
        RetryAction::Fail(error)
    }
}

/// Classify a request that never produced a response.
fn classify_send_error<T>(sink: &str, error: reqwest::Error) -> RetryAction<T> {
    let error: Error = error.into();
    if error.is_retryable() {
        RetryAction::retry(error)
    } else {
        RetryAction::Fail(Error::delivery(sink, error.to_string()))
    }
}

fn require(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::config(format!("{what} must not be empty")));
    }
    Ok(())
}
