//! Topic/event-type allow-list.

use std::fmt;
use std::str::FromStr;

use crate::stream::Topic;
use crate::{Error, Result};

const DEFAULT_ALLOWED: &[(&str, &[&str])] = &[
    (
        "Job",
        &["JobRegistered", "JobDeregistered", "JobBatchDeregistered"],
    ),
    (
        "Allocation",
        &["AllocationUpdated", "AllocationUpdateDesiredStatus"],
    ),
    (
        "Deployment",
        &[
            "DeploymentStatusUpdate",
            "DeploymentPromotion",
            "DeploymentAllocHealth",
        ],
    ),
    (
        "Node",
        &[
            "NodeRegistration",
            "NodeDeregistration",
            "NodeEligibility",
            "NodeDrain",
            "NodeEvent",
        ],
    ),
];

/// One `Topic:EventType` entry; `*` on either side matches anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowRule {
    topic: Option<Topic>,
    event_type: Option<String>,
}

impl AllowRule {
    pub fn new(topic: Option<Topic>, event_type: Option<String>) -> Self {
        Self { topic, event_type }
    }

    pub fn matches(&self, topic: &Topic, event_type: &str) -> bool {
        self.topic.as_ref().is_none_or(|t| t == topic)
            && self
                .event_type
                .as_deref()
                .is_none_or(|t| t.eq_ignore_ascii_case(event_type))
    }
}

impl FromStr for AllowRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (topic, event_type) = s.split_once(':').unwrap_or((s, "*"));
        let (topic, event_type) = (topic.trim(), event_type.trim());
        if topic.is_empty() || event_type.is_empty() {
            return Err(Error::config(format!("Invalid allow-list entry '{s}'")));
        }
        let wildcard = |v: &str| (v != "*").then(|| v.to_string());
        Ok(Self {
            topic: wildcard(topic).map(Topic::from),
            event_type: wildcard(event_type),
        })
    }
}

impl fmt::Display for AllowRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topic = self.topic.as_ref().map_or("*", Topic::as_str);
        let event_type = self.event_type.as_deref().unwrap_or("*");
        write!(f, "{topic}:{event_type}")
    }
}

/// Decides which events carry notification value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    rules: Vec<AllowRule>,
}

impl AllowList {
    pub fn new(rules: Vec<AllowRule>) -> Self {
        Self { rules }
    }

    /// Parse a comma separated list such as `Job:*,Allocation:AllocationUpdated`.
    pub fn parse(list: &str) -> Result<Self> {
        let rules = list
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<AllowRule>>>()?;
        if rules.is_empty() {
            return Err(Error::config("Allow-list must not be empty"));
        }
        Ok(Self { rules })
    }

    pub fn allows(&self, topic: &Topic, event_type: &str) -> bool {
        self.rules.iter().any(|rule| rule.matches(topic, event_type))
    }

    pub fn rules(&self) -> &[AllowRule] {
        &self.rules
    }
}

impl Default for AllowList {
    fn default() -> Self {
        let rules = DEFAULT_ALLOWED
            .iter()
            .flat_map(|(topic, types)| {
                types.iter().map(move |event_type| {
                    AllowRule::new(
                        Some(Topic::from(topic.to_string())),
                        Some(event_type.to_string()),
                    )
                })
            })
            .collect();
        Self { rules }
    }
}
