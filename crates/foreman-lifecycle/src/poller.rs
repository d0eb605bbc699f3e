//! The polling engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use foreman_config::{Config, ProjectConfig, PrpConfig};
use foreman_models::{
    session::keys, EventKind, NotifyEvent, Priority, PrpPhase, Session, SessionStatus,
};
use foreman_plugins::{
    ActivityState, Agent, CiStatus, IssueUpdate, PluginRegistry, PrState, ReviewDecision, Runtime,
    Scm, Tracker,
};
use foreman_session::SessionManager;
use foreman_store::MetadataStore;

use crate::reaction::{ReactionEngine, ReactionKey, ReactionOutcome, ReactionTracker};
use crate::writeback::writeback_comment;

/// Default poll period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Hard timeout on every external probe; a frozen plugin call cannot hang
/// more than one probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Terminal lines fetched for activity detection.
const OUTPUT_TAIL_LINES: u32 = 50;

/// Character budget for the plan excerpt in a plan-gate comment.
const PLAN_EXCERPT_LIMIT: usize = 4000;

/// In-memory state owned by the lifecycle manager. The reaction engine
/// receives the tracker map as a parameter and the session manager is a
/// black box reached only through its public operations, so this is the
/// single owner of mutable poll state.
struct Tracked {
    statuses: HashMap<String, SessionStatus>,
    /// `None` inside the option means "observed, no phase yet".
    phases: HashMap<String, Option<PrpPhase>>,
    all_complete_fired: bool,
}

/// Periodic poll over the session list.
pub struct LifecycleManager {
    config: Arc<Config>,
    store: MetadataStore,
    registry: Arc<PluginRegistry>,
    manager: Arc<SessionManager>,
    reactions: ReactionEngine,
    tracked: Mutex<Tracked>,
    trackers: Mutex<HashMap<ReactionKey, ReactionTracker>>,
    in_flight: AtomicBool,
    poll_interval: Duration,
    probe_timeout: Duration,
}

impl LifecycleManager {
    pub fn new(
        config: Arc<Config>,
        store: MetadataStore,
        registry: Arc<PluginRegistry>,
        manager: Arc<SessionManager>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            reactions: ReactionEngine::new(manager.clone()),
            manager,
            tracked: Mutex::new(Tracked {
                statuses: HashMap::new(),
                phases: HashMap::new(),
                all_complete_fired: false,
            }),
            trackers: Mutex::new(HashMap::new()),
            in_flight: AtomicBool::new(false),
            poll_interval: DEFAULT_POLL_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Runs the poll loop until the shutdown signal flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        debug!(
            poll_interval_ms = self.poll_interval.as_millis(),
            "starting lifecycle poller"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("lifecycle poller received shutdown signal");
                        break;
                    }
                }
            }
        }

        debug!("lifecycle poller stopped");
    }

    /// One poll pass. A single-flight guard skips the tick when the
    /// previous one has not finished.
    pub async fn tick(self: &Arc<Self>) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("previous tick still running, skipping");
            return;
        }
        self.tick_inner().await;
        self.in_flight.store(false, Ordering::SeqCst);
    }

    async fn tick_inner(self: &Arc<Self>) {
        let manager = self.manager.clone();
        let sessions = match tokio::task::spawn_blocking(move || manager.list(None)).await {
            Ok(Ok(sessions)) => sessions,
            Ok(Err(e)) => {
                warn!(error = %e, "session list failed, skipping tick");
                return;
            }
            Err(e) => {
                warn!(error = %e, "session list task failed, skipping tick");
                return;
            }
        };

        // Sessions are independent: concurrent across sessions, serial
        // within one.
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let limit = sessions.len().min(cores * 4).max(1);
        let semaphore = Arc::new(Semaphore::new(limit));

        let mut join = JoinSet::new();
        for session in sessions.clone() {
            let this = Arc::clone(self);
            let semaphore = semaphore.clone();
            join.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                this.check_session(&session).await;
            });
        }
        while join.join_next().await.is_some() {}

        self.prune(&sessions);
        self.check_all_complete(&sessions).await;
    }

    /// Per-session check: derive status, handle the transition, watch the
    /// methodology phase. Never lets an error escape into the tick.
    async fn check_session(&self, session: &Session) {
        let old = {
            let tracked = self.tracked.lock().unwrap_or_else(|e| e.into_inner());
            tracked
                .statuses
                .get(&session.id)
                .map(|t| SessionStatus::max_progress(session.status, *t))
                .unwrap_or(session.status)
        };

        let new = self.derive_status(session, old).await;
        let transitioned = new != old;

        if transitioned {
            self.handle_transition(session, old, new).await;
        } else {
            let mut tracked = self.tracked.lock().unwrap_or_else(|e| e.into_inner());
            tracked.statuses.insert(session.id.clone(), new);
        }

        if let Some(kind) = EventKind::for_transition(new) {
            // Reactions re-fire every tick while the condition holds
            // (that is their retry loop); other notifications only on
            // the transition itself.
            let mut handled_by_reaction = false;
            if transitioned || !new.is_terminal() {
                if let Some(key) = kind.reaction_key() {
                    if let Some(cfg) = self.config.reaction_for(&session.project_id, key) {
                        let cfg = cfg.clone();
                        handled_by_reaction = true;
                        let outcome = {
                            let mut trackers =
                                self.trackers.lock().unwrap_or_else(|e| e.into_inner());
                            self.reactions.run(
                                session,
                                key,
                                &cfg,
                                kind.default_priority(),
                                &mut trackers,
                            )
                        };
                        match outcome {
                            ReactionOutcome::Notify(event)
                            | ReactionOutcome::Escalated(event) => self.notify(event).await,
                            ReactionOutcome::Sent
                            | ReactionOutcome::SendFailed
                            | ReactionOutcome::AlreadyEscalated => {}
                        }
                    }
                }
            }
            if transitioned && !handled_by_reaction && kind.default_priority() != Priority::Info {
                let event = NotifyEvent::new(
                    kind,
                    kind.default_priority(),
                    format!("session {} is now {}", session.id, new),
                )
                .for_session(&session.id, &session.project_id);
                self.notify(event).await;
            }
        }

        self.check_prp_phase(session).await;
    }

    /// Probe ladder: runtime liveness → agent activity → PR state →
    /// default promotion. Transient probe failures preserve the current
    /// state instead of coercing it.
    async fn derive_status(&self, session: &Session, old: SessionStatus) -> SessionStatus {
        let mut probe_failed = false;

        if let (Some(handle), Some(runtime)) = (
            session.runtime_handle.clone(),
            self.runtime_for(&session.project_id),
        ) {
            let alive = {
                let runtime = runtime.clone();
                let handle = handle.clone();
                self.probe_blocking(move || runtime.is_alive(&handle)).await
            };
            match alive {
                Some(false) => return SessionStatus::Killed,
                Some(true) => {
                    let output = {
                        let runtime = runtime.clone();
                        let handle = handle.clone();
                        self.probe_blocking(move || runtime.output(&handle, Some(OUTPUT_TAIL_LINES)))
                            .await
                    };
                    match output {
                        Some(Ok(output)) if !output.trim().is_empty() => {
                            if let Some(agent) = self.agent_for(&session.project_id) {
                                match agent.detect_activity(&output) {
                                    ActivityState::WaitingInput => {
                                        return SessionStatus::NeedsInput
                                    }
                                    ActivityState::Blocked => return SessionStatus::Stuck,
                                    ActivityState::Active | ActivityState::Idle => {
                                        let running = {
                                            let agent = agent.clone();
                                            let handle = handle.clone();
                                            self.probe_blocking(move || {
                                                agent.is_process_running(&handle)
                                            })
                                            .await
                                        };
                                        if running == Some(false) {
                                            return SessionStatus::Killed;
                                        }
                                    }
                                    ActivityState::Ready => {}
                                }
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(session = %session.id, error = %e, "output probe failed");
                            probe_failed = true;
                        }
                        None => {
                            warn!(session = %session.id, "output probe timed out");
                            probe_failed = true;
                        }
                    }
                }
                None => {
                    warn!(session = %session.id, "liveness probe timed out");
                    probe_failed = true;
                }
            }
        }

        if let Some(pr) = session.pr_url.clone() {
            if let Some(scm) = self.scm_for(&session.project_id) {
                match self.probe_pr(scm, &pr, session).await {
                    Some(status) => return status,
                    None => return old,
                }
            }
        }

        match old {
            SessionStatus::Stuck | SessionStatus::NeedsInput if probe_failed => old,
            SessionStatus::Spawning | SessionStatus::Stuck | SessionStatus::NeedsInput => {
                SessionStatus::Working
            }
            other => other,
        }
    }

    /// Maps PR, CI, and review probes onto a status. `None` means a probe
    /// failed and the current state should be preserved.
    async fn probe_pr(
        &self,
        scm: Arc<dyn Scm>,
        pr: &str,
        session: &Session,
    ) -> Option<SessionStatus> {
        macro_rules! probe {
            ($future:expr, $what:literal) => {
                match timeout(self.probe_timeout, $future).await {
                    Ok(Ok(value)) => value,
                    Ok(Err(e)) => {
                        warn!(session = %session.id, error = %e, concat!($what, " probe failed"));
                        return None;
                    }
                    Err(_) => {
                        warn!(session = %session.id, concat!($what, " probe timed out"));
                        return None;
                    }
                }
            };
        }

        match probe!(scm.pr_state(pr), "pr state") {
            PrState::Merged => return Some(SessionStatus::Merged),
            PrState::Closed => return Some(SessionStatus::Terminated),
            PrState::Open => {}
        }

        let ci = probe!(scm.ci_summary(pr), "ci");
        if ci == CiStatus::Failing {
            return Some(SessionStatus::CiFailed);
        }

        match probe!(scm.review_decision(pr), "review") {
            ReviewDecision::ChangesRequested => Some(SessionStatus::ChangesRequested),
            ReviewDecision::Approved => {
                if probe!(scm.mergeability(pr), "mergeability") {
                    Some(SessionStatus::Mergeable)
                } else {
                    Some(SessionStatus::Approved)
                }
            }
            ReviewDecision::Pending => {
                // CI still running: the PR just exists. CI green: it is
                // actually waiting on a reviewer.
                if ci == CiStatus::Passing {
                    Some(SessionStatus::ReviewPending)
                } else {
                    Some(SessionStatus::PrOpen)
                }
            }
        }
    }

    async fn handle_transition(&self, session: &Session, old: SessionStatus, new: SessionStatus) {
        info!(session = %session.id, from = %old, to = %new, "status transition");

        let patch = HashMap::from([(keys::STATUS.to_string(), new.to_string())]);
        if let Err(e) = self.store.update_merge(&session.id, &patch) {
            warn!(session = %session.id, error = %e, "failed to persist status");
        }

        {
            let mut tracked = self.tracked.lock().unwrap_or_else(|e| e.into_inner());
            tracked.statuses.insert(session.id.clone(), new);
            if !new.is_terminal() {
                tracked.all_complete_fired = false;
            }
        }

        // Retries restart cleanly after leaving the old condition.
        if let Some(old_key) = EventKind::for_transition(old).and_then(|k| k.reaction_key()) {
            self.trackers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&(session.id.clone(), old_key.to_string()));
        }

        if let Some(comment) = writeback_comment(new, session) {
            self.post_writeback(session, comment).await;
        }
    }

    /// Watches `metadata.prpPhase` and drives the plan gate.
    async fn check_prp_phase(&self, session: &Session) {
        let Some(project) = self.config.projects.get(&session.project_id) else {
            return;
        };
        let Some(prp) = project.prp.as_ref().filter(|p| p.enabled) else {
            return;
        };

        let current = session.prp_phase;
        let previous = {
            let mut tracked = self.tracked.lock().unwrap_or_else(|e| e.into_inner());
            let previous = tracked.phases.get(&session.id).cloned();
            tracked.phases.insert(session.id.clone(), current);
            previous
        };

        // Writebacks only for changes observed while running; the first
        // observation after a (re)start is a baseline, not a transition.
        if let Some(previous) = previous {
            if previous != current {
                if let Some(phase) = current {
                    if let Some(comment) = phase_writeback(phase, session, prp) {
                        self.post_writeback(session, comment).await;
                    }
                }
            }
        }

        // The gate derives from the persisted phase alone, so a restart
        // cannot re-fire it: firing swaps the phase to `plan_gate`.
        if current == Some(PrpPhase::PlanningComplete) && prp.gates.plan {
            self.fire_plan_gate(session, project).await;
        }
    }

    async fn fire_plan_gate(&self, session: &Session, project: &ProjectConfig) {
        let tracker = self.tracker_for(project);
        let limit = tracker
            .as_ref()
            .map(|t| t.comment_limit())
            .unwrap_or(PLAN_EXCERPT_LIMIT);
        let comment = build_plan_gate_comment(session, limit);

        if let (Some(tracker), Some(issue)) = (tracker, session.issue_id.clone()) {
            match timeout(
                self.probe_timeout,
                tracker.update_issue(&issue, IssueUpdate::comment(comment)),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    // Leave the phase untouched; the next tick retries the
                    // whole gate.
                    warn!(session = %session.id, error = %e, "plan gate comment failed");
                    return;
                }
                Err(_) => {
                    warn!(session = %session.id, "plan gate comment timed out");
                    return;
                }
            }
        }

        let event = NotifyEvent::new(
            EventKind::PrpPlanGate,
            Priority::Action,
            format!(
                "session {} finished its plan and is waiting for approval on the issue",
                session.id
            ),
        )
        .for_session(&session.id, &session.project_id);
        self.notify(event).await;

        let patch = HashMap::from([(
            keys::PRP_PHASE.to_string(),
            PrpPhase::PlanGate.to_string(),
        )]);
        if let Err(e) = self.store.update_merge(&session.id, &patch) {
            warn!(session = %session.id, error = %e, "failed to persist plan gate phase");
            return;
        }
        self.tracked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .phases
            .insert(session.id.clone(), Some(PrpPhase::PlanGate));
        info!(session = %session.id, "plan gate engaged");
    }

    /// Fires the all-complete reaction once per edge into "every session
    /// terminal".
    async fn check_all_complete(&self, sessions: &[Session]) {
        if sessions.is_empty() {
            return;
        }
        let all_terminal = {
            let tracked = self.tracked.lock().unwrap_or_else(|e| e.into_inner());
            sessions.iter().all(|s| {
                tracked
                    .statuses
                    .get(&s.id)
                    .copied()
                    .unwrap_or(s.status)
                    .is_terminal()
            })
        };
        if !all_terminal {
            return;
        }

        {
            let mut tracked = self.tracked.lock().unwrap_or_else(|e| e.into_inner());
            if tracked.all_complete_fired {
                return;
            }
            tracked.all_complete_fired = true;
        }

        if let Some(cfg) = self.config.reactions.get("all-complete") {
            let message = cfg
                .message
                .clone()
                .unwrap_or_else(|| "all sessions are complete".to_string());
            let event = NotifyEvent::new(
                EventKind::AllComplete,
                cfg.priority.unwrap_or(Priority::Info),
                message,
            );
            self.notify(event).await;
        }
    }

    /// Drops tracked state for sessions that disappeared from the list.
    fn prune(&self, sessions: &[Session]) {
        let ids: std::collections::HashSet<&str> =
            sessions.iter().map(|s| s.id.as_str()).collect();
        {
            let mut tracked = self.tracked.lock().unwrap_or_else(|e| e.into_inner());
            tracked.statuses.retain(|id, _| ids.contains(id.as_str()));
            tracked.phases.retain(|id, _| ids.contains(id.as_str()));
        }
        self.trackers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(id, _), _| ids.contains(id.as_str()));
    }

    async fn notify(&self, event: NotifyEvent) {
        let names = self.config.notifiers_for(event.priority).to_vec();
        for notifier in self.registry.notifiers(&names) {
            match timeout(self.probe_timeout, notifier.notify(&event)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(notifier = notifier.name(), error = %e, "notifier failed")
                }
                Err(_) => warn!(notifier = notifier.name(), "notifier timed out"),
            }
        }
    }

    async fn post_writeback(&self, session: &Session, comment: String) {
        let Some(project) = self.config.projects.get(&session.project_id) else {
            return;
        };
        let Some(tracker) = self.tracker_for(project) else {
            return;
        };
        let Some(issue) = session.issue_id.clone() else {
            return;
        };
        match timeout(
            self.probe_timeout,
            tracker.update_issue(&issue, IssueUpdate::comment(comment)),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(session = %session.id, error = %e, "writeback failed"),
            Err(_) => warn!(session = %session.id, "writeback timed out"),
        }
    }

    async fn probe_blocking<T: Send + 'static>(
        &self,
        f: impl FnOnce() -> T + Send + 'static,
    ) -> Option<T> {
        match timeout(self.probe_timeout, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(value)) => Some(value),
            _ => None,
        }
    }

    fn runtime_for(&self, project_id: &str) -> Option<Arc<dyn Runtime>> {
        let name = self
            .config
            .projects
            .get(project_id)
            .and_then(|p| p.runtime.clone())
            .unwrap_or_else(|| self.config.defaults.runtime.clone());
        self.registry.runtime(&name)
    }

    fn agent_for(&self, project_id: &str) -> Option<Arc<dyn Agent>> {
        let name = self
            .config
            .projects
            .get(project_id)
            .and_then(|p| p.agent.clone())
            .unwrap_or_else(|| self.config.defaults.agent.clone());
        self.registry.agent(&name)
    }

    fn scm_for(&self, project_id: &str) -> Option<Arc<dyn Scm>> {
        let name = self.config.projects.get(project_id)?.scm.clone()?;
        let scm = self.registry.scm(&name);
        if scm.is_none() {
            // Spawn-time validation should have caught this; keep the
            // misconfiguration loud in case the session predates it.
            warn!(project = %project_id, scm = %name, "configured scm plugin not registered");
        }
        scm
    }

    fn tracker_for(&self, project: &ProjectConfig) -> Option<Arc<dyn Tracker>> {
        let tracker = project.tracker.as_ref()?;
        self.registry.tracker(&tracker.plugin)
    }
}

/// Phase-specific writeback comment, gated by the project's writeback
/// flags. The gated `planning_complete` case is covered by the plan-gate
/// comment instead.
fn phase_writeback(phase: PrpPhase, session: &Session, prp: &PrpConfig) -> Option<String> {
    let id = &session.id;
    match phase {
        PrpPhase::Investigating if prp.writeback.investigation => {
            Some(format!("🔍 session {id} is investigating"))
        }
        PrpPhase::Planning if prp.writeback.plan => {
            Some(format!("📝 session {id} is writing an implementation plan"))
        }
        PrpPhase::PlanningComplete if prp.writeback.plan && !prp.gates.plan => {
            Some(format!("📝 session {id} completed its plan"))
        }
        PrpPhase::Implementing if prp.writeback.implementation => {
            Some(format!("🔨 session {id} started implementing"))
        }
        _ => None,
    }
}

/// Builds the plan-gate comment: a fenced include of the first plan file,
/// truncated to the tracker's comment budget, plus approval instructions.
fn build_plan_gate_comment(session: &Session, limit: usize) -> String {
    let excerpt = session
        .workspace_path
        .as_ref()
        .and_then(|ws| first_plan_file(&ws.join(".claude/PRPs/plans")))
        .and_then(|path| std::fs::read_to_string(path).ok())
        .map(|content| truncate_chars(&content, limit))
        .unwrap_or_else(|| "(plan file not found in workspace)".to_string());

    format!(
        "📋 Implementation plan ready for review:\n\n\
         ```markdown\n{excerpt}\n```\n\n\
         Reply with `approve`, `lgtm`, `proceed`, or `go ahead` to start implementation."
    )
}

fn first_plan_file(dir: &std::path::Path) -> Option<std::path::PathBuf> {
    let mut plans: Vec<_> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(".plan.md"))
                .unwrap_or(false)
        })
        .collect();
    plans.sort();
    plans.into_iter().next()
}

fn truncate_chars(s: &str, limit: usize) -> String {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use foreman_plugins::testing::{
        FakeAgent, FakeNotifier, FakeRuntime, FakeScm, FakeTracker, FakeWorkspace,
    };
    use foreman_plugins::Issue;
    use foreman_session::SpawnRequest;
    use tempfile::TempDir;

    const CONFIG_YAML: &str = r#"
defaults:
  runtime: fake-runtime
  agent: fake-agent
  workspace: fake-workspace
  notifiers: [fake-notifier]
reactions:
  ci-failed:
    action: send-to-agent
    message: "CI failed — please fix"
    retries: 2
    escalateAfter: "30m"
    priority: warning
  approved-and-green:
    action: auto-merge
  all-complete:
    action: notify
    message: "fleet is done"
projects:
  app:
    repo: org/app
    path: /work/app
    scm: fake-scm
    tracker:
      plugin: fake-tracker
    prp:
      enabled: true
      gates:
        plan: true
"#;

    struct Env {
        _dir: TempDir,
        lifecycle: Arc<LifecycleManager>,
        manager: Arc<SessionManager>,
        store: MetadataStore,
        runtime: Arc<FakeRuntime>,
        agent: Arc<FakeAgent>,
        tracker: Arc<FakeTracker>,
        scm: Arc<FakeScm>,
        notifier: Arc<FakeNotifier>,
        registry: Arc<PluginRegistry>,
        config: Arc<Config>,
    }

    impl Env {
        /// A second lifecycle manager over the same store and plugins,
        /// as after an orchestrator restart.
        fn restarted(&self) -> Arc<LifecycleManager> {
            Arc::new(
                LifecycleManager::new(
                    self.config.clone(),
                    self.store.clone(),
                    self.registry.clone(),
                    self.manager.clone(),
                )
                .with_probe_timeout(Duration::from_secs(5)),
            )
        }
    }

    async fn make_env() -> Env {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path().join("state"));

        let runtime = Arc::new(FakeRuntime::new());
        let agent = Arc::new(FakeAgent::new());
        let tracker = Arc::new(FakeTracker::new());
        let scm = Arc::new(FakeScm::new());
        let notifier = Arc::new(FakeNotifier::new());
        tracker.seed_issue(
            "https://github.com/org/app/issues/42",
            Issue {
                id: "42".to_string(),
                number: Some(42),
                title: "Add login".to_string(),
                state: "open".to_string(),
                url: "https://github.com/org/app/issues/42".to_string(),
                ..Default::default()
            },
        );

        let mut registry = PluginRegistry::new();
        registry.register_runtime(runtime.clone());
        registry.register_agent(agent.clone());
        registry.register_workspace(Arc::new(FakeWorkspace::new(dir.path().join("ws"))));
        registry.register_tracker(tracker.clone());
        registry.register_scm(scm.clone());
        registry.register_notifier(notifier.clone());
        let registry = Arc::new(registry);

        let config: Arc<Config> = Arc::new(serde_yaml::from_str(CONFIG_YAML).unwrap());
        let manager = Arc::new(SessionManager::new(
            config.clone(),
            store.clone(),
            registry.clone(),
        ));
        let lifecycle = Arc::new(
            LifecycleManager::new(
                config.clone(),
                store.clone(),
                registry.clone(),
                manager.clone(),
            )
            .with_probe_timeout(Duration::from_secs(5)),
        );

        Env {
            _dir: dir,
            lifecycle,
            manager,
            store,
            runtime,
            agent,
            tracker,
            scm,
            notifier,
            registry,
            config,
        }
    }

    async fn spawn_session(env: &Env) -> Session {
        env.manager
            .spawn(SpawnRequest {
                project_id: "app".to_string(),
                issue_id: Some("https://github.com/org/app/issues/42".to_string()),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    fn set_meta(env: &Env, id: &str, pairs: &[(&str, &str)]) {
        let patch: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        env.store.update_merge(id, &patch).unwrap();
    }

    fn status_of(env: &Env, id: &str) -> String {
        env.store.read(id).unwrap().unwrap()["status"].clone()
    }

    #[tokio::test]
    async fn promotes_spawning_to_working() {
        let env = make_env().await;
        spawn_session(&env).await;

        env.lifecycle.tick().await;

        assert_eq!(status_of(&env, "app-1"), "working");
        assert!(env.notifier.events().is_empty());
    }

    #[tokio::test]
    async fn pr_flow_posts_writebacks_and_fires_merge_reaction() {
        use foreman_plugins::{CiStatus, PrState, ReviewDecision};
        let env = make_env().await;
        spawn_session(&env).await;
        set_meta(
            &env,
            "app-1",
            &[("status", "working"), ("pr", "https://github.com/org/app/pull/7")],
        );

        // PR just opened, CI still running.
        env.scm
            .script(PrState::Open, CiStatus::Pending, ReviewDecision::Pending, false);
        env.lifecycle.tick().await;
        assert_eq!(status_of(&env, "app-1"), "pr_open");
        let comments = env.tracker.comments();
        assert_eq!(comments.len(), 1);
        assert!(comments[0].1.contains("Pull Request: https://github.com/org/app/pull/7"));

        // Approved but not yet mergeable.
        env.scm
            .script(PrState::Open, CiStatus::Passing, ReviewDecision::Approved, false);
        env.lifecycle.tick().await;
        assert_eq!(status_of(&env, "app-1"), "approved");

        // Green across the board: merge-ready, reaction fires once.
        env.scm
            .script(PrState::Open, CiStatus::Passing, ReviewDecision::Approved, true);
        env.lifecycle.tick().await;
        assert_eq!(status_of(&env, "app-1"), "mergeable");

        let merge_events: Vec<_> = env
            .notifier
            .events()
            .into_iter()
            .filter(|e| e.kind == EventKind::ReactionTriggered)
            .collect();
        assert_eq!(merge_events.len(), 1);
        assert_eq!(merge_events[0].priority, Priority::Action);

        // Each transition's writeback posted exactly once.
        let bodies: Vec<String> =
            env.tracker.comments().into_iter().map(|(_, c)| c).collect();
        assert_eq!(
            bodies.iter().filter(|c| c.contains("Pull Request:")).count(),
            1
        );
        assert_eq!(bodies.iter().filter(|c| c.contains("approved and green")).count(), 1);
    }

    #[tokio::test]
    async fn waiting_input_is_detected_and_notified_once() {
        let env = make_env().await;
        let session = spawn_session(&env).await;
        set_meta(&env, "app-1", &[("status", "working")]);
        env.runtime
            .set_output(session.runtime_handle.as_ref().unwrap(), "Do you want me to continue?");
        env.agent.set_activity(ActivityState::WaitingInput);

        env.lifecycle.tick().await;
        assert_eq!(status_of(&env, "app-1"), "needs_input");
        let events = env.notifier.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::SessionNeedsInput);
        assert_eq!(events[0].priority, Priority::Action);

        // Steady state, no reaction configured for agent-needs-input:
        // no repeat notification.
        env.lifecycle.tick().await;
        assert_eq!(env.notifier.events().len(), 1);
    }

    #[tokio::test]
    async fn dead_agent_process_is_killed() {
        let env = make_env().await;
        let session = spawn_session(&env).await;
        set_meta(&env, "app-1", &[("status", "working")]);
        env.runtime
            .set_output(session.runtime_handle.as_ref().unwrap(), "some output");
        env.agent.set_activity(ActivityState::Idle);
        env.agent
            .process_running
            .store(false, std::sync::atomic::Ordering::SeqCst);

        env.lifecycle.tick().await;
        assert_eq!(status_of(&env, "app-1"), "killed");
    }

    #[tokio::test]
    async fn side_states_promote_to_working_when_probes_are_clean() {
        let env = make_env().await;
        spawn_session(&env).await;
        set_meta(&env, "app-1", &[("status", "needs_input")]);

        // Runtime alive, empty output, no PR: the agent answered its
        // question and went back to work.
        env.lifecycle.tick().await;
        assert_eq!(status_of(&env, "app-1"), "working");
    }

    #[tokio::test]
    async fn blocked_agent_is_stuck() {
        let env = make_env().await;
        let session = spawn_session(&env).await;
        set_meta(&env, "app-1", &[("status", "working")]);
        env.runtime
            .set_output(session.runtime_handle.as_ref().unwrap(), "rate limit reached");
        env.agent.set_activity(ActivityState::Blocked);

        env.lifecycle.tick().await;
        assert_eq!(status_of(&env, "app-1"), "stuck");
        // The stuck writeback names the status.
        assert!(env
            .tracker
            .comments()
            .iter()
            .any(|(_, c)| c.contains("status: stuck")));
    }

    #[tokio::test]
    async fn ci_failed_retries_then_escalates() {
        use foreman_plugins::{CiStatus, PrState, ReviewDecision};
        let env = make_env().await;
        let session = spawn_session(&env).await;
        let handle = session.runtime_handle.as_ref().unwrap().clone();
        set_meta(
            &env,
            "app-1",
            &[("status", "working"), ("pr", "https://github.com/org/app/pull/7")],
        );
        env.scm
            .script(PrState::Open, CiStatus::Failing, ReviewDecision::Pending, false);

        // Tick 1: transition to ci_failed, first send.
        env.lifecycle.tick().await;
        assert_eq!(status_of(&env, "app-1"), "ci_failed");
        // Tick 2: still failing, second send.
        env.lifecycle.tick().await;
        // Tick 3: attempts exceed retries, escalation.
        env.lifecycle.tick().await;
        // Tick 4: already escalated, nothing further.
        env.lifecycle.tick().await;

        let sends: Vec<String> = env
            .runtime
            .sent(&handle)
            .into_iter()
            .filter(|m| m.contains("CI failed — please fix"))
            .collect();
        assert_eq!(sends.len(), 2);

        let escalations: Vec<_> = env
            .notifier
            .events()
            .into_iter()
            .filter(|e| e.kind == EventKind::ReactionEscalated)
            .collect();
        assert_eq!(escalations.len(), 1);
        // Writeback for the single transition posted once.
        let ci_comments = env
            .tracker
            .comments()
            .into_iter()
            .filter(|(_, c)| c.contains("CI failing"))
            .count();
        assert_eq!(ci_comments, 1);
    }

    #[tokio::test]
    async fn recovery_after_ci_fix_clears_reaction_state() {
        use foreman_plugins::{CiStatus, PrState, ReviewDecision};
        let env = make_env().await;
        spawn_session(&env).await;
        set_meta(
            &env,
            "app-1",
            &[("status", "working"), ("pr", "https://github.com/org/app/pull/7")],
        );

        env.scm
            .script(PrState::Open, CiStatus::Failing, ReviewDecision::Pending, false);
        env.lifecycle.tick().await;
        assert!(env
            .lifecycle
            .trackers
            .lock()
            .unwrap()
            .contains_key(&("app-1".to_string(), "ci-failed".to_string())));

        // CI recovers: transition away clears the tracker entry.
        env.scm
            .script(PrState::Open, CiStatus::Passing, ReviewDecision::Pending, false);
        env.lifecycle.tick().await;
        assert_eq!(status_of(&env, "app-1"), "review_pending");
        assert!(!env
            .lifecycle
            .trackers
            .lock()
            .unwrap()
            .contains_key(&("app-1".to_string(), "ci-failed".to_string())));
    }

    #[tokio::test]
    async fn plan_gate_fires_exactly_once() {
        let env = make_env().await;
        let session = spawn_session(&env).await;
        set_meta(&env, "app-1", &[("status", "working")]);

        // The agent produced a large plan.
        let plans = session
            .workspace_path
            .as_ref()
            .unwrap()
            .join(".claude/PRPs/plans");
        std::fs::create_dir_all(&plans).unwrap();
        let long_plan: String = (0..200)
            .map(|i| format!("plan line {i}: {}\n", "x".repeat(30)))
            .collect();
        std::fs::write(plans.join("P.plan.md"), &long_plan).unwrap();
        set_meta(&env, "app-1", &[("prpPhase", "planning_complete")]);

        env.lifecycle.tick().await;

        // One gate comment with a truncated fenced plan.
        let comments = env.tracker.comments();
        let gate: Vec<_> = comments
            .iter()
            .filter(|(_, c)| c.contains("Implementation plan ready for review"))
            .collect();
        assert_eq!(gate.len(), 1);
        let body = &gate[0].1;
        assert!(body.contains("```markdown"));
        assert!(body.contains("plan line 0"));
        assert!(!body.contains("plan line 199"), "plan should be truncated");
        assert!(body.contains("`approve`"));

        // One action-priority notification.
        let gate_events: Vec<_> = env
            .notifier
            .events()
            .into_iter()
            .filter(|e| e.kind == EventKind::PrpPlanGate)
            .collect();
        assert_eq!(gate_events.len(), 1);
        assert_eq!(gate_events[0].priority, Priority::Action);

        // Phase swapped so the gate cannot re-fire.
        assert_eq!(
            env.store.read("app-1").unwrap().unwrap()["prpPhase"],
            "plan_gate"
        );
        env.lifecycle.tick().await;
        let again = env
            .tracker
            .comments()
            .iter()
            .filter(|(_, c)| c.contains("Implementation plan ready for review"))
            .count();
        assert_eq!(again, 1);
    }

    #[tokio::test]
    async fn restart_does_not_refire_gate_or_notify() {
        let env = make_env().await;
        spawn_session(&env).await;
        set_meta(&env, "app-1", &[("status", "working"), ("prpPhase", "plan_gate")]);

        let restarted = env.restarted();
        restarted.tick().await;

        assert!(env.tracker.comments().is_empty());
        assert!(env.notifier.events().is_empty());
        // The working session keeps being polled.
        assert_eq!(status_of(&env, "app-1"), "working");
    }

    #[tokio::test]
    async fn single_flight_skips_overlapping_tick() {
        let env = make_env().await;
        spawn_session(&env).await;

        env.lifecycle.in_flight.store(true, Ordering::SeqCst);
        env.lifecycle.tick().await;
        // Nothing processed while the guard is held.
        assert_eq!(status_of(&env, "app-1"), "spawning");

        env.lifecycle.in_flight.store(false, Ordering::SeqCst);
        env.lifecycle.tick().await;
        assert_eq!(status_of(&env, "app-1"), "working");
    }

    #[tokio::test]
    async fn pruning_drops_state_for_archived_sessions() {
        let env = make_env().await;
        spawn_session(&env).await;
        env.lifecycle.tick().await;
        assert!(env.lifecycle.tracked.lock().unwrap().statuses.contains_key("app-1"));

        env.manager.kill("app-1").unwrap();
        env.lifecycle.tick().await;
        assert!(!env.lifecycle.tracked.lock().unwrap().statuses.contains_key("app-1"));
    }

    #[tokio::test]
    async fn all_complete_reaction_fires_once_per_edge() {
        let env = make_env().await;
        spawn_session(&env).await;
        set_meta(&env, "app-1", &[("status", "merged")]);

        env.lifecycle.tick().await;
        env.lifecycle.tick().await;

        let done_events: Vec<_> = env
            .notifier
            .events()
            .into_iter()
            .filter(|e| e.kind == EventKind::AllComplete)
            .collect();
        assert_eq!(done_events.len(), 1);
        assert_eq!(done_events[0].message, "fleet is done");
    }

    #[tokio::test]
    async fn phase_writebacks_follow_flags() {
        let env = make_env().await;
        spawn_session(&env).await;
        set_meta(&env, "app-1", &[("status", "working")]);

        // Baseline observation first, then the phase change.
        env.lifecycle.tick().await;
        set_meta(&env, "app-1", &[("prpPhase", "investigating")]);
        env.lifecycle.tick().await;

        let comments = env.tracker.comments();
        assert!(
            comments.iter().any(|(_, c)| c.contains("investigating")),
            "expected investigation writeback, got {comments:?}"
        );
    }

    #[test]
    fn truncation_is_char_safe() {
        assert_eq!(truncate_chars("héllo", 3), "hél");
        assert_eq!(truncate_chars("ok", 10), "ok");
    }

    #[test]
    fn plan_gate_comment_without_plan_file() {
        let session = Session::from_metadata(
            "app-1",
            HashMap::from([(
                "worktree".to_string(),
                "/nonexistent/path".to_string(),
            )]),
        );
        let comment = build_plan_gate_comment(&session, 4000);
        assert!(comment.contains("plan file not found"));
    }
}
