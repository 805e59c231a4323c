//! Topic-specific rendering of event payloads.
//!
//! Every accessor tolerates missing or mistyped fields; a payload that does
//! not have the expected shape falls back to [`generic`].

use serde_json::Value;

use crate::stream::{RawEvent, Topic};

/// Rendered content of one event, before severity and linking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub title: String,
    pub body: String,
    pub entity_id: String,
    /// Entity status used for severity classification.
    pub status: Option<String>,
    /// UI path segments below the deep-link base.
    pub link_path: Option<Vec<String>>,
}

/// Non-empty string at `path`.
fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |v, key| v.get(key))?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn push_line(body: &mut String, label: &str, value: Option<&str>) {
    if let Some(value) = value {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(label);
        body.push_str(": ");
        body.push_str(value);
    }
}

fn fallback_id(event: &RawEvent) -> Option<&str> {
    Some(event.key.trim()).filter(|k| !k.is_empty())
}

fn display_topic(event: &RawEvent) -> &str {
    match event.topic.as_str() {
        "" => "Cluster",
        topic => topic,
    }
}

/// Render an event that has no dedicated template or whose payload is unusable.
pub fn generic(event: &RawEvent) -> Rendered {
    let topic = display_topic(event);
    let event_type = match event.event_type.trim() {
        "" => "event",
        t => t,
    };
    let key = fallback_id(event).unwrap_or("unknown");
    Rendered {
        title: format!("{topic} {event_type}"),
        body: format!(
            "{topic} event {event_type} (key {key}, index {})",
            event.index
        ),
        entity_id: key.to_string(),
        status: None,
        link_path: None,
    }
}

pub fn render(event: &RawEvent) -> Rendered {
    let rendered = match &event.topic {
        Topic::Allocation => allocation(event),
        Topic::Job => job(event),
        Topic::Deployment => deployment(event),
        Topic::Node => node(event),
        Topic::Evaluation => evaluation(event),
        Topic::Other(_) => None,
    };
    rendered.unwrap_or_else(|| generic(event))
}

fn allocation(event: &RawEvent) -> Option<Rendered> {
    let alloc = event.payload.get("Allocation")?;
    let id = str_at(alloc, &["ID"]).or_else(|| fallback_id(event))?;
    let status = str_at(alloc, &["ClientStatus"]);

    let title = match status {
        Some(status) => format!("Allocation {status}"),
        None => format!("Allocation {}", event.event_type),
    };

    let tasks = alloc.get("TaskStates").and_then(Value::as_object);
    let failed: Vec<(&String, &Value)> = tasks
        .into_iter()
        .flatten()
        .filter(|(_, state)| state.get("Failed").and_then(Value::as_bool) == Some(true))
        .collect();
    let shown: Vec<(&String, &Value)> = if failed.is_empty() {
        tasks.into_iter().flatten().collect()
    } else {
        failed.clone()
    };
    let task_list = shown
        .iter()
        .map(|(name, state)| match str_at(state, &["State"]) {
            Some(s) => format!("{name} ({s})"),
            None => name.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ");

    // Latest task event with a human readable message explains the failure.
    let reason = failed
        .iter()
        .chain(shown.iter())
        .filter_map(|(_, state)| state.get("Events")?.as_array())
        .flat_map(|events| events.iter().rev())
        .find_map(|e| str_at(e, &["DisplayMessage"]).or_else(|| str_at(e, &["Message"])));

    let mut body = String::new();
    push_line(&mut body, "Job", str_at(alloc, &["JobID"]));
    push_line(&mut body, "Task group", str_at(alloc, &["TaskGroup"]));
    push_line(
        &mut body,
        "Tasks",
        Some(task_list.as_str()).filter(|s| !s.is_empty()),
    );
    push_line(&mut body, "Allocation", Some(id));
    push_line(
        &mut body,
        "Node",
        str_at(alloc, &["NodeName"]).or_else(|| str_at(alloc, &["NodeID"])),
    );
    push_line(&mut body, "Desired", str_at(alloc, &["DesiredStatus"]));
    push_line(&mut body, "Reason", reason);

    Some(Rendered {
        title,
        body,
        entity_id: id.to_string(),
        status: status.map(str::to_string),
        link_path: Some(vec!["allocations".to_string(), id.to_string()]),
    })
}

fn job(event: &RawEvent) -> Option<Rendered> {
    let job = event.payload.get("Job")?;
    let id = str_at(job, &["ID"]).or_else(|| fallback_id(event))?;
    let status = str_at(job, &["Status"]);

    let title = match event.event_type.as_str() {
        "JobRegistered" => format!("Job {id} registered"),
        "JobDeregistered" => format!("Job {id} deregistered"),
        _ => match status {
            Some(status) => format!("Job {id} {status}"),
            None => format!("Job {id} {}", event.event_type),
        },
    };

    let version = job
        .get("Version")
        .and_then(Value::as_u64)
        .map(|v| v.to_string());

    let mut body = String::new();
    push_line(&mut body, "Job", str_at(job, &["Name"]).or(Some(id)));
    push_line(&mut body, "Type", str_at(job, &["Type"]));
    push_line(&mut body, "Status", status);
    push_line(&mut body, "Version", version.as_deref());
    push_line(
        &mut body,
        "Namespace",
        str_at(job, &["Namespace"]).or(Some(event.namespace.as_str()).filter(|s| !s.is_empty())),
    );

    Some(Rendered {
        title,
        body,
        entity_id: id.to_string(),
        status: status.map(str::to_string),
        link_path: Some(vec!["jobs".to_string(), id.to_string()]),
    })
}

fn deployment(event: &RawEvent) -> Option<Rendered> {
    let deployment = event.payload.get("Deployment")?;
    let id = str_at(deployment, &["ID"]).or_else(|| fallback_id(event))?;
    let status = str_at(deployment, &["Status"]);
    let job_id = str_at(deployment, &["JobID"]);

    let title = match status {
        Some(status) => format!("Deployment {status}"),
        None => format!("Deployment {}", event.event_type),
    };

    let mut body = String::new();
    push_line(&mut body, "Job", job_id);
    push_line(&mut body, "Deployment", Some(id));
    push_line(&mut body, "Status", status);
    push_line(
        &mut body,
        "Description",
        str_at(deployment, &["StatusDescription"]),
    );

    Some(Rendered {
        title,
        body,
        entity_id: id.to_string(),
        status: status.map(str::to_string),
        link_path: job_id.map(|job| {
            vec![
                "jobs".to_string(),
                job.to_string(),
                "deployments".to_string(),
            ]
        }),
    })
}

fn node(event: &RawEvent) -> Option<Rendered> {
    let node = event.payload.get("Node")?;
    let id = str_at(node, &["ID"]).or_else(|| fallback_id(event))?;
    let name = str_at(node, &["Name"]).unwrap_or(id);
    let status = str_at(node, &["Status"]);

    let title = match status {
        Some(status) => format!("Node {name} {status}"),
        None => format!("Node {name} {}", event.event_type),
    };

    let draining = node
        .get("Drain")
        .and_then(Value::as_bool)
        .or_else(|| node.get("DrainStrategy").map(|d| !d.is_null()))
        .map(|d| if d { "yes" } else { "no" });

    let mut body = String::new();
    push_line(&mut body, "Node", Some(name));
    push_line(&mut body, "Datacenter", str_at(node, &["Datacenter"]));
    push_line(&mut body, "Status", status);
    push_line(
        &mut body,
        "Eligibility",
        str_at(node, &["SchedulingEligibility"]),
    );
    push_line(&mut body, "Draining", draining);

    Some(Rendered {
        title,
        body,
        entity_id: id.to_string(),
        status: status.map(str::to_string),
        link_path: Some(vec!["clients".to_string(), id.to_string()]),
    })
}

fn evaluation(event: &RawEvent) -> Option<Rendered> {
    let eval = event.payload.get("Evaluation")?;
    let id = str_at(eval, &["ID"]).or_else(|| fallback_id(event))?;
    let status = str_at(eval, &["Status"]);

    let title = match status {
        Some(status) => format!("Evaluation {status}"),
        None => format!("Evaluation {}", event.event_type),
    };

    let mut body = String::new();
    push_line(&mut body, "Job", str_at(eval, &["JobID"]));
    push_line(&mut body, "Evaluation", Some(id));
    push_line(&mut body, "Triggered by", str_at(eval, &["TriggeredBy"]));
    push_line(&mut body, "Description", str_at(eval, &["StatusDescription"]));

    Some(Rendered {
        title,
        body,
        entity_id: id.to_string(),
        status: status.map(str::to_string),
        link_path: Some(vec!["evaluations".to_string(), id.to_string()]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn event(topic: Topic, event_type: &str, payload: Value) -> RawEvent {
        RawEvent {
            topic,
            event_type: event_type.to_string(),
            key: "key-1".to_string(),
            namespace: "default".to_string(),
            index: 7,
            timestamp: Utc::now(),
            payload,
            epoch: 1,
        }
    }

    #[test]
    fn test_allocation_failure_reason() {
        let rendered = render(&event(
            Topic::Allocation,
            "AllocationUpdated",
            json!({"Allocation": {
                "ID": "abc123",
                "JobID": "web",
                "TaskGroup": "frontend",
                "ClientStatus": "failed",
                "NodeName": "worker-3",
                "TaskStates": {
                    "api": {"State": "dead", "Failed": true, "Events": [
                        {"Type": "Started", "DisplayMessage": "Task started by client"},
                        {"Type": "Terminated", "DisplayMessage": "Exit Code: 137, Exit Message: \"OOM Killed\""}
                    ]},
                    "sidecar": {"State": "running", "Failed": false}
                }
            }}),
        ));
        assert_eq!(rendered.title, "Allocation failed");
        assert!(rendered.body.contains("Tasks: api (dead)"));
        assert!(!rendered.body.contains("sidecar"));
        assert!(rendered.body.contains("OOM Killed"));
        assert!(rendered.body.contains("Node: worker-3"));
        assert_eq!(rendered.status.as_deref(), Some("failed"));
    }

    #[test]
    fn test_allocation_lists_all_tasks_when_none_failed() {
        let rendered = render(&event(
            Topic::Allocation,
            "AllocationUpdated",
            json!({"Allocation": {"ID": "a", "ClientStatus": "running",
                "TaskStates": {"api": {"State": "running"}, "log": {"State": "running"}}}}),
        ));
        assert!(rendered.body.contains("Tasks: api (running), log (running)"));
    }

    #[test]
    fn test_deployment_links_to_job() {
        let rendered = render(&event(
            Topic::Deployment,
            "DeploymentStatusUpdate",
            json!({"Deployment": {"ID": "d1", "JobID": "web", "Status": "failed",
                "StatusDescription": "Failed due to progress deadline"}}),
        ));
        assert_eq!(rendered.title, "Deployment failed");
        assert_eq!(
            rendered.link_path,
            Some(vec![
                "jobs".to_string(),
                "web".to_string(),
                "deployments".to_string()
            ])
        );
        assert_eq!(rendered.entity_id, "d1");
    }

    #[test]
    fn test_node_drain_strategy() {
        let rendered = render(&event(
            Topic::Node,
            "NodeDrain",
            json!({"Node": {"ID": "n1", "Name": "worker-1", "Status": "ready",
                "DrainStrategy": {"Deadline": 3600}}}),
        ));
        assert_eq!(rendered.title, "Node worker-1 ready");
        assert!(rendered.body.contains("Draining: yes"));
    }

    #[test]
    fn test_job_registered() {
        let rendered = render(&event(
            Topic::Job,
            "JobRegistered",
            json!({"Job": {"ID": "web", "Type": "service", "Status": "pending", "Version": 3}}),
        ));
        assert_eq!(rendered.title, "Job web registered");
        assert!(rendered.body.contains("Version: 3"));
        assert!(rendered.body.contains("Namespace: default"));
    }

    #[test]
    fn test_wrong_shape_falls_back_to_generic() {
        let rendered = render(&event(
            Topic::Allocation,
            "AllocationUpdated",
            json!({"Allocation": "not an object"}),
        ));
        // A string has no ID field, so the event key is used.
        assert_eq!(rendered.entity_id, "key-1");
        assert!(!rendered.body.is_empty());

        let rendered = render(&event(Topic::Job, "JobRegistered", Value::Null));
        assert_eq!(rendered.title, "Job JobRegistered");
        assert!(rendered.body.contains("index 7"));
    }

    #[test]
    fn test_generic_never_empty() {
        let mut raw = event(Topic::Other(String::new()), "", Value::Null);
        raw.key.clear();
        let rendered = generic(&raw);
        assert_eq!(rendered.title, "Cluster event");
        assert!(rendered.body.contains("key unknown"));
    }
}
