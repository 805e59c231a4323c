//! Notification delivery.
//!
//! A [`NotificationSink`] turns a [`NotificationRecord`] into the destination's
//! native message shape and delivers it, retrying transient failures a
//! bounded number of times.

pub mod channels;
mod record;

pub use channels::{SinkConfig, SlackConfig, SlackSink, WebhookConfig, WebhookSink};
pub use record::{NotificationRecord, Severity};

use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;

/// Capability that delivers notifications to one destination.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Get the sink type name.
    fn sink_type(&self) -> &'static str;

    /// Verify the destination before the pipeline starts.
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    /// Deliver one record. Retries are exhausted before an error is returned.
    async fn deliver(&self, record: &NotificationRecord) -> Result<()>;
}

/// Build the configured sink.
pub fn build_sink(config: &SinkConfig) -> Result<Arc<dyn NotificationSink>> {
    Ok(match config {
        SinkConfig::Slack(c) => Arc::new(SlackSink::new(c.clone())?),
        SinkConfig::Webhook(c) => Arc::new(WebhookSink::new(c.clone())?),
    })
}
