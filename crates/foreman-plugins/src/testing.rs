//! In-memory fakes for every plugin slot.
//!
//! Downstream crates exercise the session manager, lifecycle manager, and
//! webhook receiver against these through the same [`PluginRegistry`] the
//! production wiring uses.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use foreman_models::NotifyEvent;

use crate::agent::{Agent, LaunchOptions};
use crate::error::{PluginError, Result};
use crate::notifier::Notifier;
use crate::runtime::Runtime;
use crate::scm::Scm;
use crate::tracker::{IssueUpdate, Tracker};
use crate::types::{ActivityState, CiStatus, Issue, PrState, ReviewDecision};
use crate::workspace::{Workspace, WorkspaceRequest};

#[derive(Debug, Default)]
struct FakeProc {
    alive: bool,
    output: String,
    sent: Vec<String>,
}

/// Runtime fake: handles are `fake-N`, processes live until stopped.
#[derive(Default)]
pub struct FakeRuntime {
    procs: Mutex<HashMap<String, FakeProc>>,
    counter: AtomicU32,
    pub fail_start: AtomicBool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the terminal output a later `output()` probe returns.
    pub fn set_output(&self, handle: &str, output: &str) {
        if let Some(proc) = self.procs.lock().unwrap().get_mut(handle) {
            proc.output = output.to_string();
        }
    }

    /// Marks the process dead without going through `stop`.
    pub fn kill_silently(&self, handle: &str) {
        if let Some(proc) = self.procs.lock().unwrap().get_mut(handle) {
            proc.alive = false;
        }
    }

    /// Messages sent into the handle so far.
    pub fn sent(&self, handle: &str) -> Vec<String> {
        self.procs
            .lock()
            .unwrap()
            .get(handle)
            .map(|p| p.sent.clone())
            .unwrap_or_default()
    }

    pub fn started_count(&self) -> u32 {
        self.counter.load(Ordering::SeqCst)
    }
}

impl Runtime for FakeRuntime {
    fn name(&self) -> &str {
        "fake-runtime"
    }

    fn start(
        &self,
        _argv: &[String],
        _env: &HashMap<String, String>,
        _cwd: &Path,
    ) -> Result<String> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(PluginError::CommandFailed("fake start failure".to_string()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = format!("fake-{n}");
        self.procs.lock().unwrap().insert(
            handle.clone(),
            FakeProc {
                alive: true,
                ..Default::default()
            },
        );
        Ok(handle)
    }

    fn is_alive(&self, handle: &str) -> bool {
        self.procs
            .lock()
            .unwrap()
            .get(handle)
            .map(|p| p.alive)
            .unwrap_or(false)
    }

    fn output(&self, handle: &str, _last_lines: Option<u32>) -> Result<String> {
        self.procs
            .lock()
            .unwrap()
            .get(handle)
            .map(|p| p.output.clone())
            .ok_or_else(|| PluginError::NotFound(handle.to_string()))
    }

    fn send(&self, handle: &str, text: &str) -> Result<()> {
        let mut procs = self.procs.lock().unwrap();
        let proc = procs
            .get_mut(handle)
            .ok_or_else(|| PluginError::NotFound(handle.to_string()))?;
        if !proc.alive {
            return Err(PluginError::NotFound(handle.to_string()));
        }
        proc.sent.push(text.to_string());
        Ok(())
    }

    fn stop(&self, handle: &str) -> Result<()> {
        let mut procs = self.procs.lock().unwrap();
        let proc = procs
            .get_mut(handle)
            .ok_or_else(|| PluginError::NotFound(handle.to_string()))?;
        proc.alive = false;
        Ok(())
    }
}

/// Agent fake with scriptable activity detection.
pub struct FakeAgent {
    activity: Mutex<ActivityState>,
    pub process_running: AtomicBool,
    pub setup_ran: AtomicBool,
}

impl FakeAgent {
    pub fn new() -> Self {
        Self {
            activity: Mutex::new(ActivityState::Active),
            process_running: AtomicBool::new(true),
            setup_ran: AtomicBool::new(false),
        }
    }

    pub fn set_activity(&self, state: ActivityState) {
        *self.activity.lock().unwrap() = state;
    }
}

impl Default for FakeAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for FakeAgent {
    fn name(&self) -> &str {
        "fake-agent"
    }

    fn build_launch_command(&self, opts: &LaunchOptions) -> Vec<String> {
        let mut argv = vec!["fake-agent".to_string()];
        if let Some(file) = &opts.system_prompt_file {
            argv.push("--system-prompt-file".to_string());
            argv.push(file.display().to_string());
        }
        argv
    }

    fn detect_activity(&self, _terminal_tail: &str) -> ActivityState {
        *self.activity.lock().unwrap()
    }

    fn is_process_running(&self, _handle: &str) -> bool {
        self.process_running.load(Ordering::SeqCst)
    }

    fn post_launch_setup(
        &self,
        _workspace: &Path,
        _session_id: &str,
        _metadata_file: &Path,
    ) -> Result<()> {
        self.setup_ran.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Workspace fake: plain directories under a test-owned root.
pub struct FakeWorkspace {
    root: PathBuf,
    pub fail_create: AtomicBool,
}

impl FakeWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fail_create: AtomicBool::new(false),
        }
    }
}

impl Workspace for FakeWorkspace {
    fn name(&self) -> &str {
        "fake-workspace"
    }

    fn create(&self, req: &WorkspaceRequest) -> Result<PathBuf> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(PluginError::CommandFailed("fake create failure".to_string()));
        }
        let path = self.root.join(&req.session_id);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    fn destroy(&self, path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        Ok(())
    }
}

/// Tracker fake with seeded issues and recorded comments.
#[derive(Default)]
pub struct FakeTracker {
    issues: Mutex<HashMap<String, Issue>>,
    comments: Mutex<Vec<(String, String)>>,
    pub fail_get: AtomicBool,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_issue(&self, id: &str, issue: Issue) {
        self.issues.lock().unwrap().insert(id.to_string(), issue);
    }

    /// `(issue id, comment body)` pairs in post order.
    pub fn comments(&self) -> Vec<(String, String)> {
        self.comments.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tracker for FakeTracker {
    fn name(&self) -> &str {
        "fake-tracker"
    }

    async fn get_issue(&self, id: &str) -> Result<Issue> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(PluginError::Provider("fake tracker outage".to_string()));
        }
        self.issues
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(format!("issue {id}")))
    }

    async fn is_completed(&self, id: &str) -> Result<bool> {
        Ok(self
            .issues
            .lock()
            .unwrap()
            .get(id)
            .map(|i| i.state == "closed")
            .unwrap_or(false))
    }

    fn issue_url(&self, id: &str) -> String {
        self.issues
            .lock()
            .unwrap()
            .get(id)
            .map(|i| i.url.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn branch_name(&self, _issue: &Issue) -> Option<String> {
        None
    }

    async fn generate_prompt(&self, id: &str) -> Result<String> {
        let issue = self.get_issue(id).await?;
        Ok(format!("Issue: {}\nURL: {}", issue.title, issue.url))
    }

    async fn update_issue(&self, id: &str, update: IssueUpdate) -> Result<()> {
        if let Some(comment) = update.comment {
            self.comments.lock().unwrap().push((id.to_string(), comment));
        }
        Ok(())
    }
}

/// SCM fake returning one scripted probe result.
pub struct FakeScm {
    pub state: Mutex<PrState>,
    pub ci: Mutex<CiStatus>,
    pub review: Mutex<ReviewDecision>,
    pub mergeable: Mutex<bool>,
    pub fail_probes: AtomicBool,
}

impl FakeScm {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PrState::Open),
            ci: Mutex::new(CiStatus::Pending),
            review: Mutex::new(ReviewDecision::Pending),
            mergeable: Mutex::new(false),
            fail_probes: AtomicBool::new(false),
        }
    }

    pub fn script(&self, state: PrState, ci: CiStatus, review: ReviewDecision, mergeable: bool) {
        *self.state.lock().unwrap() = state;
        *self.ci.lock().unwrap() = ci;
        *self.review.lock().unwrap() = review;
        *self.mergeable.lock().unwrap() = mergeable;
    }

    fn check(&self) -> Result<()> {
        if self.fail_probes.load(Ordering::SeqCst) {
            Err(PluginError::Provider("fake scm outage".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for FakeScm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scm for FakeScm {
    fn name(&self) -> &str {
        "fake-scm"
    }

    async fn pr_state(&self, _pr_url: &str) -> Result<PrState> {
        self.check()?;
        Ok(*self.state.lock().unwrap())
    }

    async fn ci_summary(&self, _pr_url: &str) -> Result<CiStatus> {
        self.check()?;
        Ok(*self.ci.lock().unwrap())
    }

    async fn review_decision(&self, _pr_url: &str) -> Result<ReviewDecision> {
        self.check()?;
        Ok(*self.review.lock().unwrap())
    }

    async fn mergeability(&self, _pr_url: &str) -> Result<bool> {
        self.check()?;
        Ok(*self.mergeable.lock().unwrap())
    }
}

/// Notifier fake recording every event.
#[derive(Default)]
pub struct FakeNotifier {
    events: Mutex<Vec<NotifyEvent>>,
}

impl FakeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NotifyEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    fn name(&self) -> &str {
        "fake-notifier"
    }

    async fn notify(&self, event: &NotifyEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
