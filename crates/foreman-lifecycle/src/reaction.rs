//! The reaction engine.
//!
//! A reaction is an automated response to a recognized event with retry
//! and escalation semantics. State is one counter per `(session,
//! reaction)` pair, owned by the lifecycle manager and passed in by
//! reference; the engine itself is stateless. Reactions never error out
//! of the poll loop: every failure is either a retriable attempt or an
//! escalation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use foreman_config::{EscalateAfter, ReactionAction, ReactionConfig};
use foreman_models::{EventKind, NotifyEvent, Priority, Session};
use foreman_session::SessionManager;

/// Attempts before escalation when a reaction sets no `retries`.
pub const DEFAULT_RETRIES: u32 = 3;

/// Per-(session, reaction) bookkeeping.
#[derive(Debug, Clone)]
pub struct ReactionTracker {
    pub attempts: u32,
    pub first_triggered: Instant,
    /// Set once escalation fired; later ticks are no-ops until the
    /// tracker is cleared by a status transition.
    pub escalated: bool,
}

impl ReactionTracker {
    fn new() -> Self {
        Self {
            attempts: 0,
            first_triggered: Instant::now(),
            escalated: false,
        }
    }
}

/// Key into the tracker map.
pub type ReactionKey = (String, String);

/// What one reaction invocation did.
#[derive(Debug)]
pub enum ReactionOutcome {
    /// Message delivered to the agent; no human notification needed.
    Sent,
    /// Delivery failed; the attempt counter advanced, next tick retries.
    SendFailed,
    /// The caller should dispatch this notification.
    Notify(NotifyEvent),
    /// Escalated to a human; the caller should dispatch this notification.
    Escalated(NotifyEvent),
    /// Already escalated earlier; nothing to do.
    AlreadyEscalated,
}

/// Executes reactions against the session manager.
pub struct ReactionEngine {
    manager: Arc<SessionManager>,
}

impl ReactionEngine {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Runs one reaction invocation.
    ///
    /// `default_priority` is the transition's own priority band, used when
    /// the reaction config does not set one. Escalation fires iff
    /// `attempts > retries`, or elapsed time exceeds a duration
    /// `escalateAfter`, or attempts exceed a numeric `escalateAfter`.
    pub fn run(
        &self,
        session: &Session,
        key: &str,
        cfg: &ReactionConfig,
        default_priority: Priority,
        trackers: &mut HashMap<ReactionKey, ReactionTracker>,
    ) -> ReactionOutcome {
        let entry = trackers
            .entry((session.id.clone(), key.to_string()))
            .or_insert_with(ReactionTracker::new);

        if entry.escalated {
            return ReactionOutcome::AlreadyEscalated;
        }
        entry.attempts += 1;

        let retries = cfg.retries.unwrap_or(DEFAULT_RETRIES);
        let mut escalate = entry.attempts > retries;
        match cfg.escalate_after {
            Some(EscalateAfter::Count(n)) => escalate = escalate || entry.attempts > n,
            Some(EscalateAfter::After(window)) => {
                escalate = escalate || entry.first_triggered.elapsed() >= window
            }
            None => {}
        }

        if escalate {
            entry.escalated = true;
            let event = NotifyEvent::new(
                EventKind::ReactionEscalated,
                cfg.priority.unwrap_or(Priority::Urgent),
                format!(
                    "❗ session {} needs attention: reaction '{}' escalated after {} attempts",
                    session.id, key, entry.attempts
                ),
            )
            .for_session(&session.id, &session.project_id);
            warn!(session = %session.id, reaction = %key, attempts = entry.attempts, "reaction escalated");
            return ReactionOutcome::Escalated(event);
        }

        match cfg.action {
            ReactionAction::SendToAgent if cfg.auto => {
                let message = cfg
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("orchestrator: {key}"));
                match self.manager.send(&session.id, &message) {
                    Ok(()) => {
                        debug!(session = %session.id, reaction = %key, attempt = entry.attempts, "sent reaction message to agent");
                        ReactionOutcome::Sent
                    }
                    Err(e) => {
                        // Not an escalation: the counter stays advanced
                        // and the next tick retries.
                        warn!(session = %session.id, reaction = %key, error = %e, "reaction send failed");
                        ReactionOutcome::SendFailed
                    }
                }
            }
            // auto: false suppresses the agent action but still notifies.
            ReactionAction::SendToAgent | ReactionAction::Notify => {
                ReactionOutcome::Notify(self.triggered_event(session, key, cfg, default_priority))
            }
            ReactionAction::AutoMerge => {
                // Actual merging is delegated to the SCM as a future
                // extension; today the reaction surfaces readiness.
                let mut event = self.triggered_event(session, key, cfg, Priority::Action);
                event.priority = cfg.priority.unwrap_or(Priority::Action);
                ReactionOutcome::Notify(event)
            }
        }
    }

    fn triggered_event(
        &self,
        session: &Session,
        key: &str,
        cfg: &ReactionConfig,
        default_priority: Priority,
    ) -> NotifyEvent {
        let message = cfg
            .message
            .clone()
            .unwrap_or_else(|| format!("reaction '{}' triggered for session {}", key, session.id));
        NotifyEvent::new(
            EventKind::ReactionTriggered,
            cfg.priority.unwrap_or(default_priority),
            message,
        )
        .for_session(&session.id, &session.project_id)
    }
}
