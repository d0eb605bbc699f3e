//! Tracker writeback comments for status transitions.

use foreman_models::{Session, SessionStatus};

/// The comment posted for a transition into `status`, if the transition
/// has one. Posted at most once per transition.
pub fn writeback_comment(status: SessionStatus, session: &Session) -> Option<String> {
    let pr = session.pr_url.as_deref().unwrap_or("(no PR)");
    let id = &session.id;
    match status {
        SessionStatus::PrOpen => Some(format!("Pull Request: {pr}")),
        SessionStatus::CiFailed => Some(format!("❗ CI failing on {pr}")),
        SessionStatus::ReviewPending => Some(format!("👀 {pr} is awaiting review")),
        SessionStatus::ChangesRequested => Some(format!("👀 Review requested changes on {pr}")),
        SessionStatus::Approved => Some(format!("✅ {pr} approved")),
        SessionStatus::Mergeable => Some(format!("🚀 {pr} approved and green, ready to merge")),
        SessionStatus::Merged => Some(format!("🎉 {pr} merged, session `{id}` complete")),
        SessionStatus::NeedsInput => Some(format!(
            "❗ session {id} needs attention, status: needs_input"
        )),
        SessionStatus::Stuck => Some(format!("❗ session {id} needs attention, status: stuck")),
        SessionStatus::Errored => Some(format!("❗ session {id} needs attention, status: errored")),
        SessionStatus::Killed => Some(format!("💀 session {id} runtime exited")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn session_with_pr() -> Session {
        let mut s = Session::from_metadata("app-1", HashMap::new());
        s.pr_url = Some("https://github.com/org/app/pull/7".to_string());
        s
    }

    #[test]
    fn pr_transitions_reference_the_pr() {
        let s = session_with_pr();
        let comment = writeback_comment(SessionStatus::PrOpen, &s).unwrap();
        assert_eq!(comment, "Pull Request: https://github.com/org/app/pull/7");

        assert!(writeback_comment(SessionStatus::Mergeable, &s)
            .unwrap()
            .contains("ready to merge"));
    }

    #[test]
    fn attention_statuses_name_the_status() {
        let s = session_with_pr();
        for (status, word) in [
            (SessionStatus::Stuck, "stuck"),
            (SessionStatus::Errored, "errored"),
            (SessionStatus::NeedsInput, "needs_input"),
        ] {
            let comment = writeback_comment(status, &s).unwrap();
            assert!(comment.contains("needs attention"));
            assert!(comment.contains(word));
        }
    }

    #[test]
    fn quiet_statuses_have_no_writeback() {
        let s = session_with_pr();
        for status in [
            SessionStatus::Spawning,
            SessionStatus::Working,
            SessionStatus::Terminated,
            SessionStatus::Done,
        ] {
            assert!(writeback_comment(status, &s).is_none());
        }
    }
}
