//! Process configuration.
//!
//! Everything is read once at startup from environment variables (after
//! `.env` has been loaded by `main`) into an immutable [`AppConfig`] that is
//! passed to the component constructors.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::dispatcher::DispatcherConfig;
use crate::logging::{LogFormat, LoggingOptions};
use crate::mapper::{AllowList, SeverityTable};
use crate::notification::{SinkConfig, SlackConfig, WebhookConfig};
use crate::stream::{StreamConfig, TopicFilter};
use crate::{Error, Result};

/// Orchestrator address used when `NOMAD_ADDR` is unset.
pub const DEFAULT_NOMAD_ADDR: &str = "http://127.0.0.1:4646";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub sink: SinkConfig,
    pub allow: AllowList,
    pub severity: SeverityTable,
    /// Base for deep links into the web UI.
    pub ui_base: Url,
    /// `ui_base` was derived from the orchestrator address.
    pub ui_base_is_fallback: bool,
    pub dispatcher: DispatcherConfig,
    pub logging: LoggingOptions,
}

impl AppConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env(&lookup);

        let address = base_url(
            "NOMAD_ADDR",
            &env.get("NOMAD_ADDR")
                .unwrap_or_else(|| DEFAULT_NOMAD_ADDR.to_string()),
        )?;

        let mut stream = StreamConfig::new(address.clone());
        stream.token = env.get("NOMAD_TOKEN");
        stream.namespace = env.get("NOMAD_NAMESPACE");
        if let Some(topics) = env.get("NOMAD_EVENT_TOPICS") {
            stream.topics = parse_list::<TopicFilter>(&topics)?;
        }
        stream.start_index = env.parse("NOMAD_EVENT_START_INDEX", 0)?;
        stream.exit_on_stream_end = env.flag("NOTIFIER_EXIT_ON_STREAM_END", false)?;
        stream.validate()?;

        let (ui_base, ui_base_is_fallback) = match env.get("NOMAD_SERVER_EXTERNAL_URL") {
            Some(raw) => (parse_url("NOMAD_SERVER_EXTERNAL_URL", &raw)?, false),
            None => (
                address
                    .join("ui")
                    .map_err(|e| Error::config(format!("Invalid NOMAD_ADDR: {e}")))?,
                true,
            ),
        };

        let sink = Self::sink_config(&env)?;

        let allow = match env.get("NOTIFIER_ALLOW") {
            Some(list) => AllowList::parse(&list)?,
            None => AllowList::default(),
        };
        let severity = match env.get("NOTIFIER_SEVERITY_RULES") {
            Some(list) => SeverityTable::with_overrides(&list)?,
            None => SeverityTable::default(),
        };

        let dispatcher = DispatcherConfig {
            grace_period: Duration::from_secs(env.parse("NOTIFIER_SHUTDOWN_GRACE_SECS", 5)?),
            dedupe_capacity: env.parse("NOTIFIER_DEDUPE_CAPACITY", 4096)?,
        };

        let logging = LoggingOptions {
            format: env.parse("LOG_FORMAT", LogFormat::Text)?,
            directory: env.get("LOG_DIR").map(PathBuf::from),
        };

        Ok(Self {
            stream,
            sink,
            allow,
            severity,
            ui_base,
            ui_base_is_fallback,
            dispatcher,
            logging,
        })
    }

    fn sink_config(env: &Env<'_>) -> Result<SinkConfig> {
        let kind = env.get("NOTIFIER_SINK").unwrap_or_else(|| "slack".to_string());
        match kind.to_ascii_lowercase().as_str() {
            "slack" => {
                let mut config = SlackConfig::new(
                    env.require("SLACK_TOKEN")?,
                    env.require("SLACK_CHANNEL")?,
                );
                if let Some(raw) = env.get("SLACK_API_URL") {
                    config.api_url = Some(base_url("SLACK_API_URL", &raw)?);
                }
                config.username = env.get("SLACK_USERNAME");
                config.icon_emoji = env.get("SLACK_ICON_EMOJI");
                Ok(SinkConfig::Slack(config))
            }
            "webhook" => {
                let url = parse_url("WEBHOOK_URL", &env.require("WEBHOOK_URL")?)?;
                let mut config = WebhookConfig::new(url);
                config.bearer_token = env.get("WEBHOOK_TOKEN");
                Ok(SinkConfig::Webhook(config))
            }
            other => Err(Error::config(format!(
                "Unknown NOTIFIER_SINK '{other}', expected 'slack' or 'webhook'"
            ))),
        }
    }
}

/// Trimmed, non-empty view over a key lookup.
struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, key: &str) -> Result<String> {
        self.get(key)
            .ok_or_else(|| Error::config(format!("{key} must be set")))
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .map_err(|e| Error::config(format!("Invalid {key} '{raw}': {e}"))),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
            None => Ok(default),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some("0" | "false" | "no" | "off") => Ok(false),
            Some(other) => Err(Error::config(format!("Invalid {key} '{other}'"))),
        }
    }
}

fn parse_url(key: &str, raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::config(format!("Invalid {key} '{raw}': {e}")))
}

/// Parse a URL that relative paths are joined onto.
fn base_url(key: &str, raw: &str) -> Result<Url> {
    if raw.ends_with('/') {
        parse_url(key, raw)
    } else {
        parse_url(key, &format!("{raw}/"))
    }
}

fn parse_list<T: FromStr<Err = Error>>(list: &str) -> Result<Vec<T>> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::Severity;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    const SLACK: [(&str, &str); 2] = [("SLACK_TOKEN", "xoxb-1"), ("SLACK_CHANNEL", "#ops")];

    #[test]
    fn test_defaults() {
        let config = load(&SLACK).unwrap();

        assert_eq!(config.stream.address.as_str(), "http://127.0.0.1:4646/");
        assert_eq!(config.stream.topics, vec![TopicFilter::all()]);
        assert_eq!(config.stream.start_index, 0);
        assert!(!config.stream.exit_on_stream_end);
        assert_eq!(config.ui_base.as_str(), "http://127.0.0.1:4646/ui");
        assert!(config.ui_base_is_fallback);
        assert_eq!(config.dispatcher.grace_period, Duration::from_secs(5));
        assert_eq!(config.dispatcher.dedupe_capacity, 4096);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.sink.sink_type(), "slack");
        assert_eq!(config.sink.destination(), "#ops");
    }

    #[test]
    fn test_full_environment() {
        let mut vars = SLACK.to_vec();
        vars.extend([
            ("NOMAD_ADDR", "https://nomad.internal:4646"),
            ("NOMAD_TOKEN", "secret-token"),
            ("NOMAD_NAMESPACE", "prod"),
            ("NOMAD_EVENT_TOPICS", "Job:web, Allocation"),
            ("NOMAD_EVENT_START_INDEX", "42"),
            ("NOMAD_SERVER_EXTERNAL_URL", "https://nomad.example.com/ui"),
            ("SLACK_API_URL", "http://127.0.0.1:9000/api"),
            ("NOTIFIER_SEVERITY_RULES", "status:pending=critical"),
            ("NOTIFIER_SHUTDOWN_GRACE_SECS", "2"),
            ("NOTIFIER_EXIT_ON_STREAM_END", "true"),
            ("LOG_FORMAT", "json"),
            ("LOG_DIR", "/var/log/notifier"),
        ]);
        let config = load(&vars).unwrap();

        assert_eq!(config.stream.token.as_deref(), Some("secret-token"));
        assert_eq!(config.stream.namespace.as_deref(), Some("prod"));
        assert_eq!(
            config
                .stream
                .topics
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
            vec!["Job:web", "Allocation:*"]
        );
        assert_eq!(config.stream.start_index, 42);
        assert!(config.stream.exit_on_stream_end);
        assert_eq!(config.ui_base.as_str(), "https://nomad.example.com/ui");
        assert!(!config.ui_base_is_fallback);
        assert_eq!(
            config.severity.classify("JobRegistered", Some("pending")),
            Severity::Critical
        );
        assert_eq!(config.dispatcher.grace_period, Duration::from_secs(2));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(
            config.logging.directory,
            Some(PathBuf::from("/var/log/notifier"))
        );
        match &config.sink {
            SinkConfig::Slack(slack) => assert_eq!(
                slack.api_url.as_ref().map(Url::as_str),
                Some("http://127.0.0.1:9000/api/")
            ),
            other => panic!("unexpected sink {other:?}"),
        }
        assert!(!format!("{config:?}").contains("secret-token"));
    }

    #[test]
    fn test_webhook_sink() {
        let config = load(&[
            ("NOTIFIER_SINK", "webhook"),
            ("WEBHOOK_URL", "https://hooks.example.com/nomad"),
            ("WEBHOOK_TOKEN", "abc"),
        ])
        .unwrap();
        match config.sink {
            SinkConfig::Webhook(webhook) => {
                assert_eq!(webhook.url.as_str(), "https://hooks.example.com/nomad");
                assert_eq!(webhook.bearer_token.as_deref(), Some("abc"));
            }
            other => panic!("unexpected sink {other:?}"),
        }
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let mut vars = SLACK.to_vec();
        vars.push(("NOMAD_EVENT_START_INDEX", "  "));
        let config = load(&vars).unwrap();
        assert_eq!(config.stream.start_index, 0);
    }

    #[test]
    fn test_invalid_values_are_configuration_errors() {
        let cases: Vec<Vec<(&str, &str)>> = vec![
            vec![],
            vec![("SLACK_TOKEN", "xoxb-1")],
            vec![("NOTIFIER_SINK", "pager")],
            vec![("NOTIFIER_SINK", "webhook")],
            [SLACK.as_slice(), &[("NOMAD_ADDR", "not a url")]].concat(),
            [SLACK.as_slice(), &[("NOMAD_EVENT_START_INDEX", "-1")]].concat(),
            [SLACK.as_slice(), &[("NOTIFIER_SEVERITY_RULES", "Failed=urgent")]].concat(),
            [SLACK.as_slice(), &[("NOTIFIER_EXIT_ON_STREAM_END", "maybe")]].concat(),
            [SLACK.as_slice(), &[("NOTIFIER_ALLOW", ",")]].concat(),
            [SLACK.as_slice(), &[("LOG_FORMAT", "xml")]].concat(),
        ];

        for vars in cases {
            let err = load(&vars).unwrap_err();
            assert!(
                matches!(err, Error::Configuration(_)),
                "{vars:?} produced {err:?}"
            );
        }
    }
}
