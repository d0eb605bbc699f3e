//! Provider payload normalization.

use chrono::Utc;
use serde_json::Value;

use foreman_models::{IssueRef, TriggerEvent, TriggerEventKind};

/// Normalizes a GitHub webhook delivery.
///
/// Understood deliveries: `issues` events with action
/// `labeled|assigned|opened|reopened`, and `issue_comment` with action
/// `created`. Everything else returns `None`.
pub fn github_event(event_type: &str, delivery_id: &str, payload: &Value) -> Option<TriggerEvent> {
    let action = payload["action"].as_str()?;
    let kind = match (event_type, action) {
        ("issues", "labeled") => TriggerEventKind::IssueLabeled,
        ("issues", "assigned") => TriggerEventKind::IssueAssigned,
        ("issues", "opened") => TriggerEventKind::IssueOpened,
        ("issues", "reopened") => TriggerEventKind::IssueReopened,
        ("issue_comment", "created") => TriggerEventKind::IssueComment,
        _ => return None,
    };

    let issue = &payload["issue"];
    let issue_ref = IssueRef {
        id: issue["id"]
            .as_u64()
            .map(|n| n.to_string())
            .unwrap_or_default(),
        number: issue["number"].as_u64()?,
        title: issue["title"].as_str().unwrap_or_default().to_string(),
        state: issue["state"].as_str().unwrap_or_default().to_string(),
        labels: string_list(&issue["labels"], "name"),
        assignees: string_list(&issue["assignees"], "login"),
        url: issue["html_url"].as_str().unwrap_or_default().to_string(),
    };

    Some(TriggerEvent {
        provider: "github".to_string(),
        delivery_id: delivery_id.to_string(),
        event: kind,
        action: action.to_string(),
        issue: issue_ref,
        repo: payload["repository"]["full_name"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        label: payload["label"]["name"].as_str().map(String::from),
        assignee: payload["assignee"]["login"].as_str().map(String::from),
        sender: payload["sender"]["login"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        timestamp: Utc::now(),
        comment_body: payload["comment"]["body"].as_str().map(String::from),
        raw: payload.clone(),
    })
}

/// Normalizes a Plane webhook delivery.
///
/// Plane sends `issue` events with `created|updated` actions; labels,
/// assignees, and reopens are inferred from the `updates` sub-object.
pub fn plane_event(delivery_id: &str, payload: &Value) -> Option<TriggerEvent> {
    if payload["event"].as_str() != Some("issue") {
        return None;
    }
    let action = payload["action"].as_str()?;
    let data = &payload["data"];
    let updates = &payload["updates"];

    let (kind, label, assignee) = match action {
        "created" => (TriggerEventKind::IssueOpened, None, None),
        "updated" => {
            if let Some(label) = updates["labels"]["added"][0].as_str() {
                (
                    TriggerEventKind::IssueLabeled,
                    Some(label.to_string()),
                    None,
                )
            } else if let Some(assignee) = updates["assignees"]["added"][0].as_str() {
                (
                    TriggerEventKind::IssueAssigned,
                    None,
                    Some(assignee.to_string()),
                )
            } else if updates["state"]["old"].as_str() == Some("closed")
                && updates["state"]["new"].as_str().is_some()
            {
                (TriggerEventKind::IssueReopened, None, None)
            } else {
                return None;
            }
        }
        "comment_created" => (TriggerEventKind::IssueComment, None, None),
        _ => return None,
    };

    let workspace = data["workspace_id"].as_str().unwrap_or_default();
    let project = data["project_id"].as_str().unwrap_or_default();

    Some(TriggerEvent {
        provider: "plane".to_string(),
        delivery_id: delivery_id.to_string(),
        event: kind,
        action: action.to_string(),
        issue: IssueRef {
            id: data["id"].as_str().unwrap_or_default().to_string(),
            number: data["sequence_id"].as_u64()?,
            title: data["name"].as_str().unwrap_or_default().to_string(),
            state: data["state"].as_str().unwrap_or_default().to_string(),
            labels: Vec::new(),
            assignees: Vec::new(),
            url: data["url"].as_str().unwrap_or_default().to_string(),
        },
        repo: format!("{workspace}/{project}"),
        label,
        assignee,
        sender: payload["activity"]["actor"].as_str().unwrap_or_default().to_string(),
        timestamp: Utc::now(),
        comment_body: data["comment"].as_str().map(String::from),
        raw: payload.clone(),
    })
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item[key].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}
