//! Rule evaluation for normalized tracker events.

use tracing::{debug, trace};

use foreman_config::{Config, ProjectConfig, TriggerAction, TriggerRule};
use foreman_models::{Session, TriggerEvent, TriggerEventKind};

use crate::dedup::DeliveryDedup;

/// A positive evaluation: act on this issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnDecision {
    pub project_id: String,
    /// Issue reference handed to the session manager (URL when known).
    pub issue_id: String,
    pub event: TriggerEventKind,
    /// Index of the matched rule in the project's trigger list.
    pub rule_index: usize,
    /// What the matched rule asks for: a fresh session or a resume.
    pub action: TriggerAction,
    /// Session to revive when the action is resume-session.
    pub resume_session: Option<String>,
    /// Optional message configured on the matched rule.
    pub message: Option<String>,
}

/// Evaluates events against project trigger rules.
pub struct TriggerEngine {
    dedup: DeliveryDedup,
}

impl TriggerEngine {
    pub fn new() -> Self {
        Self {
            dedup: DeliveryDedup::default(),
        }
    }

    pub fn with_dedup(dedup: DeliveryDedup) -> Self {
        Self { dedup }
    }

    /// Evaluates one event. Returns a decision or nothing; never errors.
    ///
    /// Order: delivery dedup, project match, rule match (declared order,
    /// first wins), duplicate-session guard over `sessions`.
    pub fn evaluate(
        &self,
        event: &TriggerEvent,
        config: &Config,
        sessions: &[Session],
    ) -> Option<SpawnDecision> {
        if !self.dedup.check_and_insert(&event.delivery_id) {
            debug!(delivery = %event.delivery_id, "duplicate delivery, skipping");
            return None;
        }

        let (project_id, project) = match_project(event, config)?;

        let (rule_index, rule) = match_rule(event, project)?;

        let resume_session = match rule.action {
            TriggerAction::Spawn => {
                if let Some(existing) = duplicate_session(event, project_id, sessions) {
                    debug!(
                        project = %project_id,
                        issue = event.issue.number,
                        session = %existing,
                        "active session already exists for issue, skipping spawn"
                    );
                    return None;
                }
                None
            }
            TriggerAction::ResumeSession => {
                // A resume needs a dead session to revive; a live one is
                // left alone.
                let mut matching: Vec<&Session> = sessions
                    .iter()
                    .filter(|s| {
                        s.project_id == project_id && s.references_issue(event.issue.number)
                    })
                    .collect();
                if matching.iter().any(|s| !s.status.is_terminal()) {
                    debug!(
                        project = %project_id,
                        issue = event.issue.number,
                        "session for issue is still active, nothing to resume"
                    );
                    return None;
                }
                let Some(target) = matching.pop() else {
                    debug!(
                        project = %project_id,
                        issue = event.issue.number,
                        "no prior session for issue, nothing to resume"
                    );
                    return None;
                };
                Some(target.id.clone())
            }
        };

        let issue_id = if event.issue.url.is_empty() {
            event.issue.number.to_string()
        } else {
            event.issue.url.clone()
        };

        debug!(
            project = %project_id,
            issue = event.issue.number,
            rule = rule_index,
            event = %event.event,
            "trigger matched"
        );
        Some(SpawnDecision {
            project_id: project_id.to_string(),
            issue_id,
            event: event.event,
            rule_index,
            action: rule.action,
            resume_session,
            message: rule.message.clone(),
        })
    }
}

impl Default for TriggerEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// First project matching the event's origin wins.
fn match_project<'a>(
    event: &TriggerEvent,
    config: &'a Config,
) -> Option<(&'a str, &'a ProjectConfig)> {
    for (id, project) in &config.projects {
        let matched = match event.provider.as_str() {
            "github" => project.repo.as_deref() == Some(event.repo.as_str()),
            "plane" => project
                .webhooks
                .plane
                .as_ref()
                .map(|p| event.repo.contains(&p.workspace_id))
                .unwrap_or(false),
            _ => false,
        };
        if matched {
            return Some((id.as_str(), project));
        }
        trace!(project = %id, provider = %event.provider, "project did not match");
    }
    None
}

/// First rule matching the event kind and filters wins.
fn match_rule<'a>(
    event: &TriggerEvent,
    project: &'a ProjectConfig,
) -> Option<(usize, &'a TriggerRule)> {
    project.triggers.iter().enumerate().find(|(_, rule)| {
        if rule.on != event.event {
            return false;
        }
        if let Some(label) = &rule.label {
            if event.label.as_deref() != Some(label.as_str()) {
                return false;
            }
        }
        if let Some(assignee) = &rule.assignee {
            if event.assignee.as_deref() != Some(assignee.as_str()) {
                return false;
            }
        }
        if let Some(pattern) = &rule.comment_pattern {
            let body = event.comment_body.as_deref().unwrap_or("");
            match regex::Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(body) {
                        return false;
                    }
                }
                // A bad pattern never matches; it must not sink the event.
                Err(_) => return false,
            }
        }
        true
    })
}

/// Id of an existing non-terminal session for the event's issue, if any.
fn duplicate_session<'a>(
    event: &TriggerEvent,
    project_id: &str,
    sessions: &'a [Session],
) -> Option<&'a str> {
    sessions
        .iter()
        .find(|s| {
            s.project_id == project_id
                && !s.status.is_terminal()
                && s.references_issue(event.issue.number)
        })
        .map(|s| s.id.as_str())
}
