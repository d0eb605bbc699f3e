//! The plan-gate resume path.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, warn};

use foreman_models::{session::keys, PrpPhase, TriggerEvent};
use foreman_plugins::IssueUpdate;

use crate::state::AppState;

/// Message typed into the agent when its plan is approved.
pub const RESUME_MESSAGE: &str =
    "Your plan was approved. Proceed with implementation: continue with /prp-implement.";

/// Words in an issue comment that approve a gated plan.
fn approval_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(approved?|lgtm|proceed|go ahead)\b").expect("valid approval regex")
    })
}

/// Returns true when the comment body approves a plan.
pub fn is_approval(body: &str) -> bool {
    approval_re().is_match(body)
}

/// Handles an issue comment: if a session is gated on this issue's plan
/// and the comment approves it, resume the session.
///
/// Idempotent: a second approval finds no gated session and does nothing.
pub async fn gate_resume(state: &AppState, event: &TriggerEvent) {
    let body = match &event.comment_body {
        Some(body) if is_approval(body) => body.clone(),
        Some(_) => {
            debug!(issue = event.issue.number, "comment is not an approval, ignoring");
            return;
        }
        None => return,
    };

    let manager = state.manager.clone();
    let sessions = match tokio::task::spawn_blocking(move || manager.list(None)).await {
        Ok(Ok(sessions)) => sessions,
        other => {
            warn!(?other, "session list failed during gate resume");
            return;
        }
    };

    let Some(session) = sessions.into_iter().find(|s| {
        s.references_issue(event.issue.number) && s.prp_phase == Some(PrpPhase::PlanGate)
    }) else {
        debug!(issue = event.issue.number, "no gated session for issue, ignoring approval");
        return;
    };

    info!(session = %session.id, issue = event.issue.number, "plan approved, resuming");

    if let Err(e) = state.manager.send(&session.id, RESUME_MESSAGE) {
        warn!(session = %session.id, error = %e, "resume send failed");
        return;
    }

    let patch = std::collections::HashMap::from([(
        keys::PRP_PHASE.to_string(),
        PrpPhase::Implementing.to_string(),
    )]);
    if let Err(e) = state.manager.store().update_merge(&session.id, &patch) {
        warn!(session = %session.id, error = %e, "failed to persist implementing phase");
    }

    // Confirmation comment, fire-and-forget.
    let project = state.config.projects.get(&session.project_id);
    let tracker = project
        .and_then(|p| p.tracker.as_ref())
        .and_then(|t| state.registry.tracker(&t.plugin));
    if let (Some(tracker), Some(issue)) = (tracker, session.issue_id.clone()) {
        let session_id = session.id.clone();
        tokio::spawn(async move {
            let comment = format!(
                "▶️ plan approved ({}), session `{session_id}` is implementing",
                body.trim()
            );
            if let Err(e) = tracker.update_issue(&issue, IssueUpdate::comment(comment)).await {
                warn!(session = %session_id, error = %e, "resume confirmation comment failed");
            }
        });
    }
}
