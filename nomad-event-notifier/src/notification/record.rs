//! Normalized, presentation-ready notification records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::stream::Topic;

/// Notification urgency, driving color/styling at the destination.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Severity {
    /// Routine lifecycle changes.
    Info,
    /// Anything not explicitly classified.
    #[default]
    Warning,
    /// Failures that need attention.
    Critical,
}

/// One notification, traced to exactly one raw event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationRecord {
    pub destination_channel: String,
    pub title: String,
    pub body: String,
    pub severity: Severity,
    pub deep_link: Option<String>,
    /// `topic:event_type:entity_id:index`, stable across replays.
    pub dedupe_key: String,
    pub topic: Topic,
    pub event_type: String,
    pub entity_id: String,
    pub namespace: String,
    pub index: u64,
    pub timestamp: DateTime<Utc>,
}

impl NotificationRecord {
    /// Plain-text rendering used as message fallback text.
    pub fn summary(&self) -> String {
        match &self.deep_link {
            Some(link) => format!("{}\n{}\n{}", self.title, self.body, link),
            None => format!("{}\n{}", self.title, self.body),
        }
    }
}
