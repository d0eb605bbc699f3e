//! Human-facing notification events and their priority bands.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::EventKind;

/// Priority band routed through `notificationRouting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    Action,
    Warning,
    Info,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Urgent => "urgent",
            Priority::Action => "action",
            Priority::Warning => "warning",
            Priority::Info => "info",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "urgent" => Ok(Priority::Urgent),
            "action" => Ok(Priority::Action),
            "warning" => Ok(Priority::Warning),
            "info" => Ok(Priority::Info),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// An event handed to notifier plugins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyEvent {
    pub kind: EventKind,
    pub priority: Priority,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NotifyEvent {
    pub fn new(kind: EventKind, priority: Priority, message: impl Into<String>) -> Self {
        Self {
            kind,
            priority,
            message: message.into(),
            session_id: None,
            project_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn for_session(mut self, session_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self.project_id = Some(project_id.into());
        self
    }
}
