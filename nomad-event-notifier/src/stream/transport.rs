//! HTTP transport for the Nomad event stream endpoint.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::debug;
use url::Url;

use crate::{Error, Result};

/// Stream of body chunks from one connection.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// One `topic=<Topic>:<Filter>` subscription entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    pub topic: String,
    pub filter: String,
}

impl TopicFilter {
    /// Every topic, every key.
    pub fn all() -> Self {
        Self {
            topic: "*".to_string(),
            filter: "*".to_string(),
        }
    }

    pub fn query_value(&self) -> String {
        format!("{}:{}", self.topic, self.filter)
    }
}

impl FromStr for TopicFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (topic, filter) = s.split_once(':').unwrap_or((s, "*"));
        let (topic, filter) = (topic.trim(), filter.trim());
        if topic.is_empty() || filter.is_empty() {
            return Err(Error::config(format!("Invalid topic subscription '{s}'")));
        }
        Ok(Self {
            topic: topic.to_string(),
            filter: filter.to_string(),
        })
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.filter)
    }
}

/// Parameters of one subscription attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub topics: Vec<TopicFilter>,
    pub namespace: Option<String>,
    /// Stream position to start from; 0 means "now".
    pub index: u64,
}

/// Opens one streaming connection. Reconnect policy lives in the caller.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn connect(&self, request: &SubscribeRequest) -> Result<ByteStream>;
}

/// `GET /v1/event/stream` over reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    address: Url,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, address: Url, token: Option<String>) -> Self {
        Self {
            client,
            address,
            token,
        }
    }

    /// Build the subscription URL.
    pub fn stream_url(&self, request: &SubscribeRequest) -> Result<Url> {
        let mut url = self
            .address
            .join("v1/event/stream")
            .map_err(|e| Error::config(format!("Invalid Nomad address: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            for topic in &request.topics {
                query.append_pair("topic", &topic.query_value());
            }
            if let Some(namespace) = &request.namespace {
                query.append_pair("namespace", namespace);
            }
            if request.index > 0 {
                query.append_pair("index", &request.index.to_string());
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl EventTransport for HttpTransport {
    async fn connect(&self, request: &SubscribeRequest) -> Result<ByteStream> {
        let url = self.stream_url(request)?;
        debug!(url = %url, "Opening event stream");

        let mut builder = self.client.get(url);
        if let Some(token) = &self.token {
            builder = builder.header("X-Nomad-Token", token);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response
                .bytes_stream()
                .map(|chunk| chunk.map_err(Error::from))
                .boxed());
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, body))
    }
}

/// Map a non-success subscription status to an error.
///
/// 408, 429 and 5xx are transient; 401/403 reject the token; any other
/// status means the subscription itself is wrong.
fn status_error(status: reqwest::StatusCode, body: String) -> Error {
    match status.as_u16() {
        401 | 403 => Error::auth("nomad", format!("{status}: {}", body.trim())),
        408 | 429 | 500..=599 => Error::UpstreamStatus {
            status: status.as_u16(),
            body,
        },
        _ => Error::config(format!(
            "Nomad rejected the subscription ({status}): {}",
            body.trim()
        )),
    }
}
