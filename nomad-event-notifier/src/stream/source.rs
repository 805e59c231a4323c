//! Event source with reconnect and resume.
//!
//! The connection is a small state machine owned by the source:
//! disconnected (optionally waiting out a backoff) or connected with a
//! partially decoded body. Transport failures never leave this module;
//! only configuration and authentication errors do.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::codec::LineDecoder;
use super::event::{RawEvent, decode_frame};
use super::transport::{ByteStream, EventTransport, HttpTransport, SubscribeRequest, TopicFilter};
use crate::retry::RetryPolicy;
use crate::utils::http_client::build_streaming_client;
use crate::{Error, Result};

/// Item produced by [`EventSource::next`].
#[derive(Debug, Clone, PartialEq)]
pub enum SourceItem {
    Event(RawEvent),
    /// Cancelled, closed, or the server ended the stream.
    End,
}

/// A lazy, effectively infinite sequence of raw events.
#[async_trait]
pub trait EventSource: Send {
    /// Suspend until an event is available, the stream ends or `cancel` fires.
    async fn next(&mut self, cancel: &CancellationToken) -> Result<SourceItem>;

    /// Record the last resolved stream position, used as the resume point.
    fn acknowledge(&mut self, index: u64);

    /// Drop the live connection.
    async fn close(&mut self);
}

/// Subscription settings for the event stream.
#[derive(Clone)]
pub struct StreamConfig {
    pub address: Url,
    pub token: Option<String>,
    pub namespace: Option<String>,
    pub topics: Vec<TopicFilter>,
    pub start_index: u64,
    pub reconnect: RetryPolicy,
    pub connect_timeout: Duration,
    /// Nomad heartbeats every 10s; silence longer than this means a stalled connection.
    pub idle_timeout: Duration,
    /// Report a server-side close as end of stream instead of reconnecting.
    pub exit_on_stream_end: bool,
}

impl std::fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConfig")
            .field("address", &self.address.as_str())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("namespace", &self.namespace)
            .field("topics", &self.topics)
            .field("start_index", &self.start_index)
            .field("reconnect", &self.reconnect)
            .field("idle_timeout", &self.idle_timeout)
            .field("exit_on_stream_end", &self.exit_on_stream_end)
            .finish()
    }
}

impl StreamConfig {
    pub fn new(address: Url) -> Self {
        Self {
            address,
            token: None,
            namespace: None,
            topics: vec![TopicFilter::all()],
            start_index: 0,
            reconnect: RetryPolicy::reconnect(),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(45),
            exit_on_stream_end: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.address.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "Nomad address must be http(s), got '{}'",
                self.address
            )));
        }
        if self.topics.is_empty() {
            return Err(Error::config("At least one topic subscription is required"));
        }
        if self.idle_timeout.is_zero() {
            return Err(Error::config("Stream idle timeout must be positive"));
        }
        Ok(())
    }
}

struct Connection {
    body: ByteStream,
    decoder: LineDecoder,
    /// Set once the first chunk arrives; only then is the backoff reset.
    healthy: bool,
}

/// Outcome of waiting for a connection.
enum Connect {
    Connected,
    Cancelled,
}

/// Nomad event stream source.
pub struct NomadEventSource<T: EventTransport = HttpTransport> {
    transport: T,
    config: StreamConfig,
    connection: Option<Connection>,
    pending: VecDeque<RawEvent>,
    resume_index: u64,
    epoch: u64,
    /// Consecutive failed or unproductive connections.
    failures: u32,
    /// Wait out a backoff before the next connect attempt.
    backoff_pending: bool,
}

impl NomadEventSource<HttpTransport> {
    /// Validate the configuration and prepare the HTTP transport.
    ///
    /// The connection itself is established by the first [`EventSource::next`].
    pub fn open(config: StreamConfig) -> Result<Self> {
        config.validate()?;
        let client = build_streaming_client(config.connect_timeout)?;
        let transport = HttpTransport::new(client, config.address.clone(), config.token.clone());
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: EventTransport> NomadEventSource<T> {
    pub fn with_transport(config: StreamConfig, transport: T) -> Self {
        let resume_index = config.start_index;
        Self {
            transport,
            config,
            connection: None,
            pending: VecDeque::new(),
            resume_index,
            epoch: 0,
            failures: 0,
            backoff_pending: false,
        }
    }

    fn request(&self) -> SubscribeRequest {
        SubscribeRequest {
            topics: self.config.topics.clone(),
            namespace: self.config.namespace.clone(),
            index: self.resume_index,
        }
    }

    /// Wait for the pending backoff, if any. Returns false when cancelled.
    async fn wait_backoff(&mut self, cancel: &CancellationToken) -> bool {
        if !self.backoff_pending {
            return true;
        }
        let delay = self.config.reconnect.delay_for_attempt(self.failures);
        self.failures = self.failures.saturating_add(1);
        debug!(
            delay_ms = delay.as_millis() as u64,
            attempt = self.failures,
            "Waiting before reconnecting"
        );
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => {
                self.backoff_pending = false;
                true
            }
        }
    }

    async fn connect(&mut self, cancel: &CancellationToken) -> Result<Connect> {
        loop {
            if !self.wait_backoff(cancel).await {
                return Ok(Connect::Cancelled);
            }

            let request = self.request();
            let result = tokio::select! {
                _ = cancel.cancelled() => return Ok(Connect::Cancelled),
                result = self.transport.connect(&request) => result,
            };

            match result {
                Ok(body) => {
                    self.epoch += 1;
                    info!(
                        epoch = self.epoch,
                        index = request.index,
                        topics = ?request.topics.iter().map(ToString::to_string).collect::<Vec<_>>(),
                        "Subscribed to event stream"
                    );
                    self.connection = Some(Connection {
                        body,
                        decoder: LineDecoder::new(),
                        healthy: false,
                    });
                    return Ok(Connect::Connected);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        error = %e,
                        attempt = self.failures + 1,
                        "Event stream connection failed"
                    );
                    self.backoff_pending = true;
                }
                Err(e) => {
                    warn!(error = %e, "Event stream subscription rejected");
                    return Err(e);
                }
            }
        }
    }

    /// Drop the connection and schedule a reconnect.
    fn interrupt(&mut self, reason: &str) {
        warn!(
            reason = %reason,
            epoch = self.epoch,
            resume_index = self.resume_index,
            "Event stream interrupted, reconnecting"
        );
        self.connection = None;
        self.backoff_pending = true;
    }

    /// Decode every complete frame buffered on the current connection.
    fn drain_frames(&mut self) -> std::result::Result<(), String> {
        let epoch = self.epoch;
        let Some(conn) = self.connection.as_mut() else {
            return Ok(());
        };

        loop {
            let line = match conn.decoder.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(()),
                Err(len) => return Err(format!("frame exceeds {len} bytes")),
            };
            match decode_frame(&line, epoch, Utc::now()) {
                Ok(events) => self.pending.extend(events),
                Err(e) => {
                    let preview = String::from_utf8_lossy(&line[..line.len().min(128)]);
                    warn!(error = %e, preview = %preview, "Skipping undecodable stream frame");
                }
            }
        }
    }

    fn end(&mut self) -> SourceItem {
        self.connection = None;
        SourceItem::End
    }
}

#[async_trait]
impl<T: EventTransport> EventSource for NomadEventSource<T> {
    async fn next(&mut self, cancel: &CancellationToken) -> Result<SourceItem> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(SourceItem::Event(event));
            }
            if cancel.is_cancelled() {
                return Ok(self.end());
            }

            if self.connection.is_none() {
                match self.connect(cancel).await? {
                    Connect::Connected => {}
                    Connect::Cancelled => return Ok(self.end()),
                }
            }

            let idle_timeout = self.config.idle_timeout;
            let Some(conn) = self.connection.as_mut() else {
                continue;
            };

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                read = tokio::time::timeout(idle_timeout, conn.body.next()) => Some(read),
            };
            let Some(read) = read else {
                return Ok(self.end());
            };

            match read {
                Err(_) => self.interrupt("no data or heartbeat within idle timeout"),
                Ok(None) if self.config.exit_on_stream_end => {
                    info!(epoch = self.epoch, "Event stream closed by server");
                    return Ok(self.end());
                }
                Ok(None) => self.interrupt("stream closed by server"),
                Ok(Some(Err(e))) => self.interrupt(&e.to_string()),
                Ok(Some(Ok(chunk))) => {
                    if !conn.healthy {
                        conn.healthy = true;
                        self.failures = 0;
                    }
                    conn.decoder.push(&chunk);
                    if let Err(reason) = self.drain_frames() {
                        self.interrupt(&reason);
                    }
                }
            }
        }
    }

    fn acknowledge(&mut self, index: u64) {
        self.resume_index = index;
    }

    async fn close(&mut self) {
        if self.connection.take().is_some() {
            debug!(epoch = self.epoch, "Event stream closed");
        }
    }
}
