//! Pipeline driver.
//!
//! The [`Dispatcher`] owns one source, one mapper and one sink and moves
//! through `Starting → Running → Draining → Stopped`:
//!
//! - `Starting` verifies the sink; a failure stops the pipeline.
//! - `Running` pulls, maps, deduplicates and delivers events one at a time,
//!   advancing the cursor after every resolved attempt.
//! - `Draining` lets an in-flight delivery finish within the grace period,
//!   then closes the source.
//! - `Stopped` is terminal and yields a [`DispatchReport`].

mod cursor;
mod dedupe;

pub use cursor::SubscriptionCursor;
pub use dedupe::DedupeWindow;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use strum::Display;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::mapper::{EventMapper, Mapped};
use crate::notification::{NotificationRecord, NotificationSink};
use crate::stream::{EventSource, RawEvent, SourceItem};

/// Lifecycle state of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DispatcherState {
    Starting,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How long an in-flight delivery may run after cancellation.
    pub grace_period: Duration,
    /// Number of resolved dedupe keys remembered.
    pub dedupe_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            dedupe_capacity: 4096,
        }
    }
}

/// Pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub received: u64,
    /// Events the mapper had no notification for.
    pub skipped: u64,
    pub duplicates: u64,
    pub delivered: u64,
    pub failed: u64,
    /// Deliveries cut off at the end of the grace period.
    pub aborted: u64,
}

/// Final outcome of [`Dispatcher::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub state: DispatcherState,
    pub cursor: SubscriptionCursor,
    pub stats: DispatchStats,
}

pub struct Dispatcher<S: EventSource> {
    source: S,
    mapper: EventMapper,
    sink: Arc<dyn NotificationSink>,
    config: DispatcherConfig,
    state: DispatcherState,
    cursor: SubscriptionCursor,
    dedupe: DedupeWindow,
    stats: DispatchStats,
}

impl<S: EventSource> Dispatcher<S> {
    pub fn new(
        source: S,
        mapper: EventMapper,
        sink: Arc<dyn NotificationSink>,
        config: DispatcherConfig,
    ) -> Self {
        let dedupe = DedupeWindow::new(config.dedupe_capacity);
        Self {
            source,
            mapper,
            sink,
            config,
            state: DispatcherState::Starting,
            cursor: SubscriptionCursor::default(),
            dedupe,
            stats: DispatchStats::default(),
        }
    }

    /// Run the pipeline until `cancel` fires, the stream ends or a fatal
    /// error occurs.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<DispatchReport> {
        info!(sink = self.sink.sink_type(), "Dispatcher starting");

        if let Err(e) = self.sink.open().await {
            error!(sink = self.sink.sink_type(), error = %e, "Failed to open notification sink");
            self.source.close().await;
            self.transition(DispatcherState::Stopped);
            return Err(e);
        }

        self.transition(DispatcherState::Running);
        let outcome = self.run_loop(&cancel).await;

        self.transition(DispatcherState::Draining);
        self.source.close().await;
        self.transition(DispatcherState::Stopped);

        let report = self.report();
        match outcome {
            Ok(()) => {
                info!(
                    cursor = report.cursor.index,
                    received = report.stats.received,
                    delivered = report.stats.delivered,
                    failed = report.stats.failed,
                    skipped = report.stats.skipped,
                    duplicates = report.stats.duplicates,
                    aborted = report.stats.aborted,
                    "Dispatcher stopped"
                );
                Ok(report)
            }
            Err(e) => {
                error!(cursor = report.cursor.index, error = %e, "Dispatcher stopped on fatal error");
                Err(e)
            }
        }
    }

    async fn run_loop(&mut self, cancel: &CancellationToken) -> Result<()> {
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => SourceItem::End,
                item = self.source.next(cancel) => item?,
            };

            let event = match item {
                SourceItem::Event(event) => event,
                SourceItem::End => {
                    if !cancel.is_cancelled() {
                        info!("Event stream ended");
                    }
                    return Ok(());
                }
            };
            self.stats.received += 1;

            let record = match self.mapper.map(&event) {
                Mapped::Notify(record) => record,
                Mapped::Skip => {
                    debug!(topic = %event.topic, event_type = %event.event_type, index = event.index, "Skipping event");
                    self.stats.skipped += 1;
                    self.resolve(&event);
                    continue;
                }
            };

            if self.dedupe.contains(&record.dedupe_key) {
                debug!(dedupe_key = %record.dedupe_key, "Suppressing duplicate notification");
                self.stats.duplicates += 1;
                self.resolve(&event);
                continue;
            }

            if !self.deliver(&event, &record, cancel).await {
                return Ok(());
            }
        }
    }

    /// Deliver one record. Returns `false` once cancellation has been
    /// observed and the pipeline must drain.
    async fn deliver(
        &mut self,
        event: &RawEvent,
        record: &NotificationRecord,
        cancel: &CancellationToken,
    ) -> bool {
        let sink = Arc::clone(&self.sink);
        let delivery = sink.deliver(record);
        tokio::pin!(delivery);

        let result = tokio::select! {
            result = &mut delivery => Some(result),
            _ = cancel.cancelled() => None,
        };

        if let Some(result) = result {
            self.complete(event, record, result);
            return true;
        }

        self.transition(DispatcherState::Draining);
        info!(
            dedupe_key = %record.dedupe_key,
            grace_period = ?self.config.grace_period,
            "Waiting for in-flight notification"
        );
        match tokio::time::timeout(self.config.grace_period, &mut delivery).await {
            Ok(result) => self.complete(event, record, result),
            Err(_) => {
                warn!(dedupe_key = %record.dedupe_key, index = event.index, "In-flight notification aborted");
                self.stats.aborted += 1;
            }
        }
        false
    }

    /// Account for a resolved delivery attempt.
    fn complete(
        &mut self,
        event: &RawEvent,
        record: &NotificationRecord,
        result: Result<()>,
    ) {
        match result {
            Ok(()) => {
                info!(
                    severity = %record.severity,
                    dedupe_key = %record.dedupe_key,
                    "Notification delivered: {}",
                    record.summary()
                );
                self.stats.delivered += 1;
            }
            Err(e) => {
                error!(dedupe_key = %record.dedupe_key, error = %e, "Notification delivery failed");
                self.stats.failed += 1;
            }
        }
        self.dedupe.insert(&record.dedupe_key);
        self.resolve(event);
    }

    fn resolve(&mut self, event: &RawEvent) {
        if self.cursor.advance(event.index, event.epoch) {
            self.source.acknowledge(event.index);
        } else {
            debug!(
                index = event.index,
                epoch = event.epoch,
                cursor = self.cursor.index,
                "Out-of-order event, cursor unchanged"
            );
        }
    }

    fn transition(&mut self, next: DispatcherState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Dispatcher state change");
            self.state = next;
        }
    }

    fn report(&self) -> DispatchReport {
        DispatchReport {
            state: self.state,
            cursor: self.cursor,
            stats: self.stats,
        }
    }
}
