//! Severity classification table.

use std::str::FromStr;

use crate::notification::Severity;
use crate::{Error, Result};

const DEFAULT_STATUS_RULES: &[(&str, Severity)] = &[
    ("failed", Severity::Critical),
    ("lost", Severity::Critical),
    ("down", Severity::Critical),
    ("running", Severity::Info),
    ("complete", Severity::Info),
    ("successful", Severity::Info),
    ("ready", Severity::Info),
];

const DEFAULT_EVENT_RULES: &[(&str, Severity)] = &[
    ("Failed", Severity::Critical),
    ("Errored", Severity::Critical),
    ("Registered", Severity::Info),
    ("Started", Severity::Info),
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Matcher {
    /// Exact, case-insensitive match on the entity status.
    Status(String),
    /// Case-insensitive substring of the event type.
    EventType(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeverityRule {
    matcher: Matcher,
    severity: Severity,
}

impl SeverityRule {
    pub fn status(status: &str, severity: Severity) -> Self {
        Self {
            matcher: Matcher::Status(status.to_ascii_lowercase()),
            severity,
        }
    }

    pub fn event_type(pattern: &str, severity: Severity) -> Self {
        Self {
            matcher: Matcher::EventType(pattern.to_ascii_lowercase()),
            severity,
        }
    }
}

impl FromStr for SeverityRule {
    type Err = Error;

    /// `Failed=critical` matches event types, `status:lost=critical` matches statuses.
    fn from_str(s: &str) -> Result<Self> {
        let (pattern, severity) = s
            .split_once('=')
            .ok_or_else(|| Error::config(format!("Invalid severity rule '{s}'")))?;
        let severity = severity
            .trim()
            .parse::<Severity>()
            .map_err(|_| Error::config(format!("Unknown severity in rule '{s}'")))?;
        let pattern = pattern.trim();
        let rule = match pattern.strip_prefix("status:") {
            Some(status) if !status.trim().is_empty() => Self::status(status.trim(), severity),
            None if !pattern.is_empty() => Self::event_type(pattern, severity),
            _ => return Err(Error::config(format!("Empty pattern in rule '{s}'"))),
        };
        Ok(rule)
    }
}

/// Ordered rules; status rules win over event-type rules, first match wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeverityTable {
    rules: Vec<SeverityRule>,
    fallback: Severity,
}

impl SeverityTable {
    pub fn new(rules: Vec<SeverityRule>, fallback: Severity) -> Self {
        Self { rules, fallback }
    }

    /// Parse `pattern=severity` entries and put them ahead of the defaults.
    pub fn with_overrides(list: &str) -> Result<Self> {
        let mut rules = list
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<SeverityRule>>>()?;
        rules.extend(Self::default().rules);
        Ok(Self::new(rules, Severity::Warning))
    }

    pub fn classify(&self, event_type: &str, status: Option<&str>) -> Severity {
        let event_type = event_type.to_ascii_lowercase();
        let status = status.map(str::to_ascii_lowercase);

        let by_status = status.as_deref().and_then(|status| {
            self.rules.iter().find_map(|rule| match &rule.matcher {
                Matcher::Status(s) if s == status => Some(rule.severity),
                _ => None,
            })
        });

        by_status
            .or_else(|| {
                self.rules.iter().find_map(|rule| match &rule.matcher {
                    Matcher::EventType(p) if event_type.contains(p.as_str()) => {
                        Some(rule.severity)
                    }
                    _ => None,
                })
            })
            .unwrap_or(self.fallback)
    }
}

impl Default for SeverityTable {
    fn default() -> Self {
        let rules = DEFAULT_STATUS_RULES
            .iter()
            .map(|(s, sev)| SeverityRule::status(s, *sev))
            .chain(
                DEFAULT_EVENT_RULES
                    .iter()
                    .map(|(p, sev)| SeverityRule::event_type(p, *sev)),
            )
            .collect();
        Self::new(rules, Severity::Warning)
    }
}
