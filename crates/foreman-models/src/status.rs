//! Session status state machine and transition classification.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::notify::Priority;

/// Status of a session.
///
/// Statuses advance monotonically through the DAG
/// `spawning → working → pr_open → {ci_failed | review_pending |
/// changes_requested | approved} → mergeable → merged`; back-transitions to
/// `working` are allowed from `needs_input` and `stuck` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Resources are being created; the agent has not produced output yet.
    Spawning,
    /// The agent is actively working.
    Working,
    /// The agent is waiting for human input.
    NeedsInput,
    /// The agent has stopped making progress without asking for input.
    Stuck,
    /// A pull request exists and is open.
    PrOpen,
    /// CI on the pull request is failing.
    CiFailed,
    /// The pull request is awaiting review.
    ReviewPending,
    /// A reviewer requested changes.
    ChangesRequested,
    /// The pull request is approved.
    Approved,
    /// Approved, green, and mergeable.
    Mergeable,
    /// The pull request was merged.
    Merged,
    /// The session failed irrecoverably.
    Errored,
    /// The runtime died or was killed.
    Killed,
    /// The session was ended without a merge (e.g. PR closed).
    Terminated,
    /// The session finished its work.
    Done,
}

impl SessionStatus {
    /// Returns true for statuses no poll will ever move away from.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Merged
                | SessionStatus::Killed
                | SessionStatus::Terminated
                | SessionStatus::Errored
                | SessionStatus::Done
        )
    }

    /// Position of this status along the lifecycle DAG.
    ///
    /// Used to pick the "greater" of two observed statuses; side states
    /// (`needs_input`, `stuck`) sit just above `working` so that a
    /// persisted side state wins over an in-memory `working`.
    pub fn progress_rank(&self) -> u8 {
        match self {
            SessionStatus::Spawning => 0,
            SessionStatus::Working => 1,
            SessionStatus::NeedsInput | SessionStatus::Stuck => 2,
            SessionStatus::PrOpen => 3,
            SessionStatus::CiFailed
            | SessionStatus::ReviewPending
            | SessionStatus::ChangesRequested => 4,
            SessionStatus::Approved => 5,
            SessionStatus::Mergeable => 6,
            SessionStatus::Merged
            | SessionStatus::Errored
            | SessionStatus::Killed
            | SessionStatus::Terminated
            | SessionStatus::Done => 7,
        }
    }

    /// Picks the status further along the DAG; ties go to `a`.
    pub fn max_progress(a: SessionStatus, b: SessionStatus) -> SessionStatus {
        if b.progress_rank() > a.progress_rank() {
            b
        } else {
            a
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Spawning => "spawning",
            SessionStatus::Working => "working",
            SessionStatus::NeedsInput => "needs_input",
            SessionStatus::Stuck => "stuck",
            SessionStatus::PrOpen => "pr_open",
            SessionStatus::CiFailed => "ci_failed",
            SessionStatus::ReviewPending => "review_pending",
            SessionStatus::ChangesRequested => "changes_requested",
            SessionStatus::Approved => "approved",
            SessionStatus::Mergeable => "mergeable",
            SessionStatus::Merged => "merged",
            SessionStatus::Errored => "errored",
            SessionStatus::Killed => "killed",
            SessionStatus::Terminated => "terminated",
            SessionStatus::Done => "done",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spawning" => Ok(SessionStatus::Spawning),
            "working" => Ok(SessionStatus::Working),
            "needs_input" => Ok(SessionStatus::NeedsInput),
            "stuck" => Ok(SessionStatus::Stuck),
            "pr_open" => Ok(SessionStatus::PrOpen),
            "ci_failed" => Ok(SessionStatus::CiFailed),
            "review_pending" => Ok(SessionStatus::ReviewPending),
            "changes_requested" => Ok(SessionStatus::ChangesRequested),
            "approved" => Ok(SessionStatus::Approved),
            "mergeable" => Ok(SessionStatus::Mergeable),
            "merged" => Ok(SessionStatus::Merged),
            "errored" => Ok(SessionStatus::Errored),
            "killed" => Ok(SessionStatus::Killed),
            "terminated" => Ok(SessionStatus::Terminated),
            "done" => Ok(SessionStatus::Done),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Unknown status or phase string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown status '{0}'")]
pub struct ParseStatusError(pub String);

/// Phase of the structured methodology for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrpPhase {
    Investigating,
    Planning,
    PlanningComplete,
    PlanGate,
    Implementing,
}

impl PrpPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrpPhase::Investigating => "investigating",
            PrpPhase::Planning => "planning",
            PrpPhase::PlanningComplete => "planning_complete",
            PrpPhase::PlanGate => "plan_gate",
            PrpPhase::Implementing => "implementing",
        }
    }
}

impl fmt::Display for PrpPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrpPhase {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "investigating" => Ok(PrpPhase::Investigating),
            "planning" => Ok(PrpPhase::Planning),
            "planning_complete" => Ok(PrpPhase::PlanningComplete),
            "plan_gate" => Ok(PrpPhase::PlanGate),
            "implementing" => Ok(PrpPhase::Implementing),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Classification of a status transition (or reaction outcome) into a
/// dotted event name routed to writebacks, reactions, and notifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PrCreated,
    CiFailing,
    ReviewPending,
    ReviewChangesRequested,
    ReviewApproved,
    MergeReady,
    MergeCompleted,
    SessionNeedsInput,
    SessionStuck,
    SessionErrored,
    SessionKilled,
    ReactionTriggered,
    ReactionEscalated,
    PrpPlanGate,
    AllComplete,
}

impl EventKind {
    /// Classifies a transition by the status it lands on.
    ///
    /// Transitions into `spawning`, `working`, `terminated`, and `done`
    /// carry no event.
    pub fn for_transition(to: SessionStatus) -> Option<EventKind> {
        match to {
            SessionStatus::PrOpen => Some(EventKind::PrCreated),
            SessionStatus::CiFailed => Some(EventKind::CiFailing),
            SessionStatus::ReviewPending => Some(EventKind::ReviewPending),
            SessionStatus::ChangesRequested => Some(EventKind::ReviewChangesRequested),
            SessionStatus::Approved => Some(EventKind::ReviewApproved),
            SessionStatus::Mergeable => Some(EventKind::MergeReady),
            SessionStatus::Merged => Some(EventKind::MergeCompleted),
            SessionStatus::NeedsInput => Some(EventKind::SessionNeedsInput),
            SessionStatus::Stuck => Some(EventKind::SessionStuck),
            SessionStatus::Errored => Some(EventKind::SessionErrored),
            SessionStatus::Killed => Some(EventKind::SessionKilled),
            _ => None,
        }
    }

    /// The configured reaction key this event is routed to, if any.
    pub fn reaction_key(&self) -> Option<&'static str> {
        match self {
            EventKind::CiFailing => Some("ci-failed"),
            EventKind::ReviewChangesRequested => Some("changes-requested"),
            EventKind::MergeReady => Some("approved-and-green"),
            EventKind::SessionNeedsInput => Some("agent-needs-input"),
            EventKind::SessionStuck => Some("agent-stuck"),
            EventKind::SessionKilled => Some("agent-exited"),
            _ => None,
        }
    }

    /// Priority used when no reaction overrides it.
    pub fn default_priority(&self) -> Priority {
        match self {
            EventKind::SessionErrored => Priority::Urgent,
            EventKind::SessionNeedsInput
            | EventKind::MergeReady
            | EventKind::ReviewChangesRequested
            | EventKind::PrpPlanGate => Priority::Action,
            EventKind::CiFailing | EventKind::SessionStuck | EventKind::SessionKilled => {
                Priority::Warning
            }
            _ => Priority::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PrCreated => "pr.created",
            EventKind::CiFailing => "ci.failing",
            EventKind::ReviewPending => "review.pending",
            EventKind::ReviewChangesRequested => "review.changes_requested",
            EventKind::ReviewApproved => "review.approved",
            EventKind::MergeReady => "merge.ready",
            EventKind::MergeCompleted => "merge.completed",
            EventKind::SessionNeedsInput => "session.needs_input",
            EventKind::SessionStuck => "session.stuck",
            EventKind::SessionErrored => "session.errored",
            EventKind::SessionKilled => "session.killed",
            EventKind::ReactionTriggered => "reaction.triggered",
            EventKind::ReactionEscalated => "reaction.escalated",
            EventKind::PrpPlanGate => "prp.plan_gate",
            EventKind::AllComplete => "all.complete",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
