//! Raw event to notification record mapping.
//!
//! [`EventMapper::map`] is pure and total: it never performs I/O and never
//! fails. Events outside the allow-list are skipped; everything else becomes
//! exactly one [`NotificationRecord`], degrading to a generic rendering when
//! the payload is not shaped as expected.

mod filter;
mod severity;
pub mod templates;

pub use filter::{AllowList, AllowRule};
pub use severity::{SeverityRule, SeverityTable};

use url::Url;

use crate::notification::NotificationRecord;
use crate::stream::RawEvent;

/// Outcome of mapping one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Mapped {
    Notify(NotificationRecord),
    /// The event has no notification value.
    Skip,
}

/// Builds links back to the orchestrator web UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkBuilder {
    base: Url,
}

impl LinkBuilder {
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    /// Append percent-encoded path segments to the base.
    pub fn link(&self, segments: &[String]) -> Option<String> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(segments.iter().map(String::as_str));
        Some(url.into())
    }
}

#[derive(Debug, Clone)]
pub struct EventMapper {
    allow: AllowList,
    severity: SeverityTable,
    links: LinkBuilder,
    destination_channel: String,
}

impl EventMapper {
    pub fn new(
        allow: AllowList,
        severity: SeverityTable,
        links: LinkBuilder,
        destination_channel: impl Into<String>,
    ) -> Self {
        Self {
            allow,
            severity,
            links,
            destination_channel: destination_channel.into(),
        }
    }

    pub fn map(&self, event: &RawEvent) -> Mapped {
        if !self.allow.allows(&event.topic, &event.event_type) {
            return Mapped::Skip;
        }

        let rendered = templates::render(event);
        let severity = self
            .severity
            .classify(&event.event_type, rendered.status.as_deref());
        let deep_link = rendered
            .link_path
            .as_deref()
            .and_then(|segments| self.links.link(segments));
        let dedupe_key = format!(
            "{}:{}:{}:{}",
            event.topic, event.event_type, rendered.entity_id, event.index
        );

        Mapped::Notify(NotificationRecord {
            destination_channel: self.destination_channel.clone(),
            title: rendered.title,
            body: rendered.body,
            severity,
            deep_link,
            dedupe_key,
            topic: event.topic.clone(),
            event_type: event.event_type.clone(),
            entity_id: rendered.entity_id,
            namespace: event.namespace.clone(),
            index: event.index,
            timestamp: event.timestamp,
        })
    }
}
