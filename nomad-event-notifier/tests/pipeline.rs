//! End-to-end pipeline tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::Utc;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use url::Url;

use nomad_event_notifier::config::AppConfig;
use nomad_event_notifier::dispatcher::{Dispatcher, DispatcherConfig, DispatcherState};
use nomad_event_notifier::mapper::{AllowList, EventMapper, LinkBuilder, SeverityTable};
use nomad_event_notifier::notification::{NotificationRecord, NotificationSink, Severity};
use nomad_event_notifier::stream::{EventSource, RawEvent, SourceItem, Topic};
use nomad_event_notifier::{Result, app};

struct VecSource {
    events: VecDeque<RawEvent>,
    acknowledged: Arc<Mutex<Vec<u64>>>,
}

#[async_trait]
impl EventSource for VecSource {
    async fn next(&mut self, _cancel: &CancellationToken) -> Result<SourceItem> {
        Ok(self
            .events
            .pop_front()
            .map_or(SourceItem::End, SourceItem::Event))
    }

    fn acknowledge(&mut self, index: u64) {
        self.acknowledged.lock().unwrap().push(index);
    }

    async fn close(&mut self) {}
}

#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<NotificationRecord>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn sink_type(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, record: &NotificationRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

fn raw_event(topic: &str, event_type: &str, index: u64, payload: Value) -> RawEvent {
    RawEvent {
        topic: Topic::from(topic.to_string()),
        event_type: event_type.to_string(),
        key: "abc123".to_string(),
        namespace: "default".to_string(),
        index,
        timestamp: Utc::now(),
        payload,
        epoch: 1,
    }
}

fn failed_allocation() -> Value {
    json!({"Allocation": {
        "ID": "abc123",
        "JobID": "web",
        "ClientStatus": "failed",
        "TaskStates": {"api": {"State": "dead", "Failed": true}}
    }})
}

#[tokio::test]
async fn test_dispatcher_with_scripted_source() {
    let acknowledged = Arc::new(Mutex::new(Vec::new()));
    let source = VecSource {
        events: VecDeque::from(vec![
            raw_event("PlanResult", "PlanResult", 10, json!({})),
            raw_event("Allocation", "AllocationUpdated", 11, failed_allocation()),
        ]),
        acknowledged: acknowledged.clone(),
    };
    let sink = Arc::new(RecordingSink::default());
    let mapper = EventMapper::new(
        AllowList::default(),
        SeverityTable::default(),
        LinkBuilder::new(Url::parse("https://nomad.example.com/ui").unwrap()),
        "#ops",
    );

    let report = Dispatcher::new(source, mapper, sink.clone(), DispatcherConfig::default())
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, DispatcherState::Stopped);
    assert_eq!(report.cursor.index, 11);
    assert_eq!(report.stats.received, 2);
    assert_eq!(report.stats.skipped, 1);
    assert_eq!(*acknowledged.lock().unwrap(), vec![10, 11]);

    let records = sink.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].severity, Severity::Critical);
    assert_eq!(records[0].title, "Allocation failed");
    assert_eq!(
        records[0].deep_link.as_deref(),
        Some("https://nomad.example.com/ui/allocations/abc123")
    );
}

/// Fake Nomad agent plus webhook receiver on one listener.
#[derive(Clone, Default)]
struct FakeCluster {
    stream_body: Arc<String>,
    stream_status: Option<StatusCode>,
    tokens: Arc<Mutex<Vec<Option<String>>>>,
    hooks: Arc<Mutex<Vec<Value>>>,
}

async fn event_stream(State(fake): State<FakeCluster>, headers: HeaderMap) -> Response {
    let token = headers
        .get("X-Nomad-Token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    fake.tokens.lock().unwrap().push(token);
    match fake.stream_status {
        Some(status) => (status, "Permission denied").into_response(),
        None => fake.stream_body.as_str().to_owned().into_response(),
    }
}

async fn webhook(State(fake): State<FakeCluster>, axum::Json(body): axum::Json<Value>) -> StatusCode {
    fake.hooks.lock().unwrap().push(body);
    StatusCode::NO_CONTENT
}

async fn serve(fake: FakeCluster) -> String {
    let app = Router::new()
        .route("/v1/event/stream", get(event_stream))
        .route("/hook", post(webhook))
        .with_state(fake);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn frame(index: u64, events: Value) -> String {
    json!({"Index": index, "Events": events}).to_string()
}

fn config(base: &str) -> AppConfig {
    let vars: HashMap<&str, String> = HashMap::from([
        ("NOMAD_ADDR", base.to_string()),
        ("NOMAD_TOKEN", "nomad-secret".to_string()),
        ("NOMAD_SERVER_EXTERNAL_URL", "https://nomad.example.com/ui".to_string()),
        ("NOTIFIER_SINK", "webhook".to_string()),
        ("WEBHOOK_URL", format!("{base}/hook")),
        ("NOTIFIER_EXIT_ON_STREAM_END", "true".to_string()),
    ]);
    AppConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

#[tokio::test]
async fn test_stream_to_webhook() {
    let body = [
        "{}".to_string(),
        frame(
            20,
            json!([{"Topic": "PlanResult", "Type": "PlanResult", "Key": "p1", "Index": 20, "Payload": {}}]),
        ),
        frame(
            21,
            json!([
                {"Topic": "Allocation", "Type": "AllocationUpdated", "Key": "abc123",
                 "Namespace": "default", "Index": 21, "Payload": failed_allocation()},
                {"Topic": "Evaluation", "Type": "EvaluationUpdated", "Key": "e1",
                 "Namespace": "default", "Index": 21, "Payload": {"Evaluation": {"ID": "e1"}}}
            ]),
        ),
        "{}".to_string(),
    ]
    .join("\n")
        + "\n";
    let fake = FakeCluster {
        stream_body: Arc::new(body),
        ..Default::default()
    };
    let base = serve(fake.clone()).await;

    let report = app::run(config(&base), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.state, DispatcherState::Stopped);
    assert_eq!(report.cursor.index, 21);
    assert_eq!(report.stats.received, 3);
    assert_eq!(report.stats.skipped, 2);
    assert_eq!(report.stats.delivered, 1);
    assert_eq!(
        *fake.tokens.lock().unwrap(),
        vec![Some("nomad-secret".to_string())]
    );

    let hooks = fake.hooks.lock().unwrap();
    assert_eq!(hooks.len(), 1);
    assert_eq!(hooks[0]["severity"], "critical");
    assert_eq!(hooks[0]["title"], "Allocation failed");
    assert_eq!(
        hooks[0]["link"],
        "https://nomad.example.com/ui/allocations/abc123"
    );
    let text = hooks[0]["body"].as_str().unwrap();
    for needle in ["web", "api", "abc123"] {
        assert!(text.contains(needle), "body misses {needle}");
    }
}

#[tokio::test]
async fn test_rejected_token_is_fatal() {
    let fake = FakeCluster {
        stream_status: Some(StatusCode::FORBIDDEN),
        ..Default::default()
    };
    let base = serve(fake.clone()).await;

    let err = app::run(config(&base), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(fake.hooks.lock().unwrap().is_empty());
}
