//! Normalized tracker events, as produced by webhook ingest.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The tracker-side event classes the trigger engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerEventKind {
    #[serde(rename = "issue.opened")]
    IssueOpened,
    #[serde(rename = "issue.labeled")]
    IssueLabeled,
    #[serde(rename = "issue.assigned")]
    IssueAssigned,
    #[serde(rename = "issue.reopened")]
    IssueReopened,
    #[serde(rename = "issue.comment")]
    IssueComment,
}

impl TriggerEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerEventKind::IssueOpened => "issue.opened",
            TriggerEventKind::IssueLabeled => "issue.labeled",
            TriggerEventKind::IssueAssigned => "issue.assigned",
            TriggerEventKind::IssueReopened => "issue.reopened",
            TriggerEventKind::IssueComment => "issue.comment",
        }
    }
}

impl fmt::Display for TriggerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issue.opened" => Ok(TriggerEventKind::IssueOpened),
            "issue.labeled" => Ok(TriggerEventKind::IssueLabeled),
            "issue.assigned" => Ok(TriggerEventKind::IssueAssigned),
            "issue.reopened" => Ok(TriggerEventKind::IssueReopened),
            "issue.comment" => Ok(TriggerEventKind::IssueComment),
            other => Err(format!("unknown trigger event '{other}'")),
        }
    }
}

/// Issue fields carried on every normalized event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueRef {
    /// Provider-native identifier (may differ from the number).
    pub id: String,
    pub number: u64,
    pub title: String,
    pub state: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub assignees: Vec<String>,
    pub url: String,
}

/// A provider event normalized to the shape the trigger engine evaluates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// `github` or `plane`.
    pub provider: String,
    /// Provider delivery id, the dedup key.
    pub delivery_id: String,
    pub event: TriggerEventKind,
    /// Provider-native action string (`labeled`, `created`, ...).
    pub action: String,
    pub issue: IssueRef,
    /// Repository (`org/app`) for GitHub; workspace/project path for Plane.
    pub repo: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_body: Option<String>,
    /// Original provider payload, kept for diagnostics.
    pub raw: serde_json::Value,
}
