//! The session entity and its flat-metadata mapping.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::{PrpPhase, SessionStatus};

/// Canonical metadata keys. Unknown keys are carried opaquely.
pub mod keys {
    pub const PROJECT: &str = "project";
    pub const STATUS: &str = "status";
    pub const BRANCH: &str = "branch";
    pub const WORKTREE: &str = "worktree";
    pub const TMUX_NAME: &str = "tmuxName";
    pub const AGENT: &str = "agent";
    pub const ISSUE: &str = "issue";
    pub const PR: &str = "pr";
    pub const PRP_PHASE: &str = "prpPhase";
    pub const CREATED_AT: &str = "createdAt";
    pub const LAST_ACTIVITY_AT: &str = "lastActivityAt";
}

/// One long-lived attempt by one agent on one issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Immutable id, shape `{prefix}-{n}`; doubles as the metadata file name.
    pub id: String,

    /// Configured project key.
    pub project_id: String,

    /// Current status as last derived by the poll loop.
    pub status: SessionStatus,

    /// Branch the agent works on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Isolated checkout the agent runs in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<PathBuf>,

    /// Opaque handle from the runtime plugin (typically a tmux session name).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_handle: Option<String>,

    /// Name of the agent plugin driving this session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    /// Raw tracker issue identifier or full URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,

    /// Pull request URL, once opened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,

    /// Methodology phase, when the project runs with PRP enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prp_phase: Option<PrpPhase>,

    /// Full metadata map as persisted, unknown keys included.
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Builds a session view from a persisted metadata map.
    ///
    /// Absent or unparseable `status` is treated as `spawning` (the value
    /// written at reservation time is the first thing that can be lost in
    /// a crash between reserve and persist).
    pub fn from_metadata(id: impl Into<String>, metadata: HashMap<String, String>) -> Self {
        let status = metadata
            .get(keys::STATUS)
            .and_then(|s| s.parse().ok())
            .unwrap_or(SessionStatus::Spawning);
        let prp_phase = metadata.get(keys::PRP_PHASE).and_then(|s| s.parse().ok());
        let parse_ts = |key: &str| {
            metadata
                .get(key)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc))
        };

        Self {
            id: id.into(),
            project_id: metadata.get(keys::PROJECT).cloned().unwrap_or_default(),
            status,
            branch: metadata.get(keys::BRANCH).cloned(),
            workspace_path: metadata.get(keys::WORKTREE).map(PathBuf::from),
            runtime_handle: metadata.get(keys::TMUX_NAME).cloned(),
            agent: metadata.get(keys::AGENT).cloned(),
            issue_id: metadata.get(keys::ISSUE).cloned(),
            pr_url: metadata.get(keys::PR).cloned(),
            prp_phase,
            created_at: parse_ts(keys::CREATED_AT),
            last_activity_at: parse_ts(keys::LAST_ACTIVITY_AT),
            metadata,
        }
    }

    /// Serializes the session back into its metadata map.
    ///
    /// Starts from the carried map so keys written by other writers (the
    /// in-workspace hook) survive the round trip.
    pub fn to_metadata(&self) -> HashMap<String, String> {
        let mut map = self.metadata.clone();
        map.insert(keys::PROJECT.into(), self.project_id.clone());
        map.insert(keys::STATUS.into(), self.status.to_string());
        if let Some(branch) = &self.branch {
            map.insert(keys::BRANCH.into(), branch.clone());
        }
        if let Some(path) = &self.workspace_path {
            map.insert(keys::WORKTREE.into(), path.display().to_string());
        }
        if let Some(handle) = &self.runtime_handle {
            map.insert(keys::TMUX_NAME.into(), handle.clone());
        }
        if let Some(agent) = &self.agent {
            map.insert(keys::AGENT.into(), agent.clone());
        }
        if let Some(issue) = &self.issue_id {
            map.insert(keys::ISSUE.into(), issue.clone());
        }
        if let Some(pr) = &self.pr_url {
            map.insert(keys::PR.into(), pr.clone());
        }
        if let Some(phase) = &self.prp_phase {
            map.insert(keys::PRP_PHASE.into(), phase.to_string());
        }
        if let Some(t) = &self.created_at {
            map.insert(keys::CREATED_AT.into(), t.to_rfc3339());
        }
        if let Some(t) = &self.last_activity_at {
            map.insert(keys::LAST_ACTIVITY_AT.into(), t.to_rfc3339());
        }
        map
    }

    /// True when the session's issue refers to the given issue number.
    ///
    /// `issue` may be a bare identifier or a full URL, so containment of
    /// the number as a path-ish token is the match rule.
    pub fn references_issue(&self, number: u64) -> bool {
        match &self.issue_id {
            Some(issue) => {
                let needle = number.to_string();
                issue == &needle
                    || issue.ends_with(&format!("/{needle}"))
                    || issue.ends_with(&format!("-{needle}"))
            }
            None => false,
        }
    }
}

/// Session ids are file names; only this shape is ever accepted.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Sort key yielding natural ordering for `{prefix}-{n}` ids
/// (`app-2` before `app-10`).
pub fn id_sort_key(id: &str) -> (String, u64) {
    match id.rsplit_once('-') {
        Some((prefix, n)) => match n.parse::<u64>() {
            Ok(n) => (prefix.to_string(), n),
            Err(_) => (id.to_string(), 0),
        },
        None => (id.to_string(), 0),
    }
}
