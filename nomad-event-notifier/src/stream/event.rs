//! Raw events as received from the Nomad event stream.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Category of cluster entity an event concerns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Topic {
    Job,
    Allocation,
    Deployment,
    Node,
    Evaluation,
    /// Any topic this crate has no dedicated handling for (ACLToken, Service, ...).
    Other(String),
}

impl Topic {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Job => "Job",
            Self::Allocation => "Allocation",
            Self::Deployment => "Deployment",
            Self::Node => "Node",
            Self::Evaluation => "Evaluation",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for Topic {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "job" => Self::Job,
            "allocation" | "alloc" => Self::Allocation,
            "deployment" => Self::Deployment,
            "node" => Self::Node,
            "evaluation" | "eval" => Self::Evaluation,
            _ => Self::Other(value),
        }
    }
}

impl From<Topic> for String {
    fn from(value: Topic) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for Topic {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.trim().to_string()))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event from the upstream feed. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawEvent {
    pub topic: Topic,
    /// Topic-specific verb, e.g. `AllocationUpdated`.
    pub event_type: String,
    /// Nomad's entity key (alloc id, job id, node id...).
    pub key: String,
    pub namespace: String,
    /// Raft index of the change; the stream position used for resume.
    pub index: u64,
    /// Receipt time. Nomad frames carry no wall clock of their own.
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    /// Connection epoch the event was received in.
    pub epoch: u64,
}

/// One newline-delimited frame. Heartbeats are `{}`.
///
/// Events stay untyped so one malformed envelope cannot take its siblings
/// down with it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireFrame {
    #[serde(default)]
    index: Option<u64>,
    #[serde(default)]
    events: Option<Vec<Value>>,
}

/// Envelope string field; numbers are accepted and rendered as text.
fn envelope_str(event: &Value, field: &str) -> String {
    match event.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn envelope_index(event: &Value) -> Option<u64> {
    match event.get("Index")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Decode one frame line into raw events, in frame order.
///
/// Heartbeats decode to an empty list. Events without their own index
/// inherit the frame index. Entries that are not JSON objects are skipped
/// with a warning; mistyped envelope fields degrade to empty values.
pub fn decode_frame(
    line: &[u8],
    epoch: u64,
    received_at: DateTime<Utc>,
) -> serde_json::Result<Vec<RawEvent>> {
    let frame: WireFrame = serde_json::from_slice(line)?;
    let frame_index = frame.index.unwrap_or_default();

    Ok(frame
        .events
        .unwrap_or_default()
        .into_iter()
        .filter_map(|mut event| {
            if !event.is_object() {
                warn!(index = frame_index, "Skipping malformed event entry");
                return None;
            }
            let payload = event
                .get_mut("Payload")
                .map(Value::take)
                .unwrap_or(Value::Null);
            Some(RawEvent {
                topic: Topic::from(envelope_str(&event, "Topic")),
                event_type: envelope_str(&event, "Type"),
                key: envelope_str(&event, "Key"),
                namespace: envelope_str(&event, "Namespace"),
                index: envelope_index(&event).unwrap_or(frame_index),
                timestamp: received_at,
                payload,
                epoch,
            })
        })
        .collect())
}
