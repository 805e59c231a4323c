//! Slack Web API notification sink.
//!
//! Posts through `chat.postMessage` with a bot token. Slack reports API
//! errors as `200 {"ok": false, "error": ...}`; only `ratelimited` is worth
//! retrying. HTTP 429 responses carry a `Retry-After` header that is honored
//! as the minimum wait before the next attempt.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::{classify_failure, classify_send_error, require};
use crate::notification::{NotificationRecord, NotificationSink, Severity};
use crate::retry::{RetryAction, RetryPolicy, retry_with_backoff};
use crate::utils::http_client::{build_request_client, parse_retry_after};
use crate::{Error, Result};

/// Slack API errors that mean the token itself is unusable.
const AUTH_ERRORS: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "token_expired",
];

/// Default Web API base.
pub const DEFAULT_SLACK_API_URL: &str = "https://slack.com/api/";

/// Slack attachment text limit.
const SLACK_TEXT_LIMIT: usize = 3000;

/// Slack sink configuration.
#[derive(Clone)]
pub struct SlackConfig {
    /// Bot token (`xoxb-...`).
    pub token: String,
    /// Target channel name or ID.
    pub channel: String,
    /// API base; [`DEFAULT_SLACK_API_URL`] when unset.
    pub api_url: Option<Url>,
    /// Optional username override.
    pub username: Option<String>,
    /// Optional icon emoji, e.g. `:nomad:`.
    pub icon_emoji: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Delivery retry policy.
    pub retry: RetryPolicy,
    /// Call `auth.test` when the sink is opened.
    pub verify_on_open: bool,
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("token", &"<redacted>")
            .field("channel", &self.channel)
            .field("api_url", &self.api_url.as_ref().map(Url::as_str))
            .field("username", &self.username)
            .field("icon_emoji", &self.icon_emoji)
            .field("timeout", &self.timeout)
            .field("verify_on_open", &self.verify_on_open)
            .finish()
    }
}

impl SlackConfig {
    pub fn new(token: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            channel: channel.into(),
            api_url: None,
            username: None,
            icon_emoji: None,
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::delivery(),
            verify_on_open: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    team: Option<String>,
    #[serde(default)]
    user: Option<String>,
}

/// Slack notification sink.
pub struct SlackSink {
    config: SlackConfig,
    client: Client,
    /// Never cancelled; in-flight deliveries are aborted by dropping them.
    retry_token: CancellationToken,
}

impl SlackSink {
    pub fn new(config: SlackConfig) -> Result<Self> {
        require(&config.token, "Slack token")?;
        require(&config.channel, "Slack channel")?;
        let client = build_request_client(config.timeout)?;
        Ok(Self {
            config,
            client,
            retry_token: CancellationToken::new(),
        })
    }

    fn endpoint(&self, method: &str) -> Result<Url> {
        let base = match &self.config.api_url {
            Some(url) => url.clone(),
            None => Url::parse(DEFAULT_SLACK_API_URL)
                .map_err(|e| Error::config(format!("Invalid Slack API URL: {e}")))?,
        };
        base.join(method)
            .map_err(|e| Error::config(format!("Invalid Slack API URL: {e}")))
    }

    /// Attachment color by severity.
    fn get_color(severity: Severity) -> &'static str {
        match severity {
            Severity::Info => "#2eb886",     // Green
            Severity::Warning => "#daa038",  // Amber
            Severity::Critical => "#a30200", // Red
        }
    }

    /// Build the `chat.postMessage` payload for a record.
    fn build_payload(&self, record: &NotificationRecord) -> serde_json::Value {
        let channel = if record.destination_channel.is_empty() {
            &self.config.channel
        } else {
            &record.destination_channel
        };

        let mut footer = format!("{} · {}", record.topic, record.event_type);
        if !record.namespace.is_empty() {
            footer.push_str(&format!(" · {}", record.namespace));
        }
        footer.push_str(&format!(" · index {}", record.index));

        let mut attachment = json!({
            "fallback": truncate(&record.summary(), SLACK_TEXT_LIMIT),
            "color": Self::get_color(record.severity),
            "title": record.title,
            "text": truncate(&record.body, SLACK_TEXT_LIMIT),
            "footer": footer,
            "ts": record.timestamp.timestamp(),
        });
        if let Some(link) = &record.deep_link {
            attachment["title_link"] = json!(link);
        }

        let mut payload = json!({
            "channel": channel,
            "text": record.title,
            "attachments": [attachment],
            "unfurl_links": false,
        });
        if let Some(username) = &self.config.username {
            payload["username"] = json!(username);
        }
        if let Some(icon) = &self.config.icon_emoji {
            payload["icon_emoji"] = json!(icon);
        }
        payload
    }

    async fn post(&self, url: &Url, payload: &serde_json::Value) -> RetryAction<()> {
        let response = match self
            .client
            .post(url.clone())
            .bearer_auth(&self.config.token)
            .json(payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return classify_send_error("slack", e),
        };

        if !response.status().is_success() {
            return classify_failure("slack", response).await;
        }

        let retry_after = parse_retry_after(response.headers());
        let body: SlackResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => return RetryAction::retry(Error::delivery("slack", e.to_string())),
        };

        match (body.ok, body.error.as_deref()) {
            (true, _) => RetryAction::Success(()),
            (false, Some("ratelimited")) => RetryAction::Retry {
                error: Error::RateLimited { retry_after },
                not_before: retry_after,
            },
            (false, Some(error)) if AUTH_ERRORS.contains(&error) => {
                RetryAction::Fail(Error::auth("slack", error))
            }
            (false, error) => RetryAction::Fail(Error::delivery(
                "slack",
                error.unwrap_or("unknown error").to_string(),
            )),
        }
    }
}

#[async_trait]
impl NotificationSink for SlackSink {
    fn sink_type(&self) -> &'static str {
        "slack"
    }

    async fn open(&self) -> Result<()> {
        if !self.config.verify_on_open {
            return Ok(());
        }

        let url = self.endpoint("auth.test")?;
        let response = match self
            .client
            .post(url)
            .bearer_auth(&self.config.token)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Could not verify Slack token, continuing");
                return Ok(());
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "Slack auth.test failed, continuing");
            return Ok(());
        }

        let body: SlackResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Unreadable Slack auth.test response, continuing");
                return Ok(());
            }
        };
        match (body.ok, body.error) {
            (true, _) => {
                info!(
                    team = body.team.as_deref().unwrap_or("unknown"),
                    user = body.user.as_deref().unwrap_or("unknown"),
                    channel = %self.config.channel,
                    "Slack token verified"
                );
                Ok(())
            }
            (false, Some(error)) if AUTH_ERRORS.contains(&error.as_str()) => {
                Err(Error::auth("slack", error))
            }
            (false, error) => {
                warn!(error = ?error, "Slack auth.test returned an error, continuing");
                Ok(())
            }
        }
    }

    async fn deliver(&self, record: &NotificationRecord) -> Result<()> {
        let url = self.endpoint("chat.postMessage")?;
        let payload = self.build_payload(record);

        retry_with_backoff(&self.config.retry, &self.retry_token, |_| {
            self.post(&url, &payload)
        })
        .await?;

        debug!(dedupe_key = %record.dedupe_key, "Slack notification sent");
        Ok(())
    }
}

/// Truncate to the Slack text limit on a char boundary.
fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let suffix = "\n[truncated]";
    let budget = limit - suffix.len();
    let truncated: String = text.chars().take(budget).collect();
    format!("{truncated}{suffix}")
}
