//! The session manager.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use foreman_config::{Config, ProjectConfig};
use foreman_models::{session::keys, Session, SessionStatus};
use foreman_plugins::{
    Agent, Issue, LaunchOptions, PluginRegistry, Runtime, Tracker, Workspace, WorkspaceRequest,
};
use foreman_store::{atomic::atomic_write, MetadataStore, StoreError};

use crate::error::{Result, SessionError};
use crate::prompt;

/// Attempts at id reservation before giving up.
const RESERVE_ATTEMPTS: u32 = 10;

/// Metadata key for the composed system-prompt file.
const KEY_PROMPT_FILE: &str = "promptFile";

/// Inputs for spawning a session.
#[derive(Debug, Clone, Default)]
pub struct SpawnRequest {
    pub project_id: String,
    /// Raw tracker identifier or full issue URL.
    pub issue_id: Option<String>,
    /// Explicit prompt overriding the tracker-derived issue context.
    pub prompt: Option<String>,
    /// Explicit branch overriding tracker-derived and default names.
    pub branch: Option<String>,
}

/// Plugins resolved for one project.
struct ResolvedPlugins {
    runtime: Arc<dyn Runtime>,
    runtime_name: String,
    agent: Arc<dyn Agent>,
    agent_name: String,
    workspace: Arc<dyn Workspace>,
    tracker: Option<Arc<dyn Tracker>>,
}

/// Resources created during a spawn, for rollback on failure.
#[derive(Default)]
struct CreatedResources {
    workspace: Option<PathBuf>,
    handle: Option<String>,
}

/// Owns spawn and day-two operations for every session.
///
/// The manager holds no per-session state of its own: the metadata files
/// are the source of truth, and the lifecycle manager talks to sessions
/// exclusively through these operations.
pub struct SessionManager {
    config: Arc<Config>,
    store: MetadataStore,
    registry: Arc<PluginRegistry>,
}

impl SessionManager {
    pub fn new(config: Arc<Config>, store: MetadataStore, registry: Arc<PluginRegistry>) -> Self {
        Self {
            config,
            store,
            registry,
        }
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Spawns a session: validate issue → reserve id → workspace →
    /// prompts → launch → persist → post-launch hook.
    ///
    /// Fails without side effects until the id reservation; any later
    /// failure tears down created resources and archives the metadata.
    pub async fn spawn(&self, req: SpawnRequest) -> Result<Session> {
        let project = self.config.project(&req.project_id)?.clone();
        let plugins = self.resolve_plugins(&project)?;

        // Validate the issue before touching any resource.
        let issue = match &req.issue_id {
            Some(issue_id) => {
                let tracker = plugins.tracker.clone().ok_or_else(|| {
                    SessionError::Config(format!(
                        "project '{}' has no tracker configured",
                        req.project_id
                    ))
                })?;
                let issue = tracker
                    .get_issue(issue_id)
                    .await
                    .map_err(|e| SessionError::Tracker(e.to_string()))?;
                Some(issue)
            }
            None => None,
        };

        let id = self.reserve_id(&project, &req.project_id)?;
        info!(session = %id, project = %req.project_id, "reserved session id");

        let mut created = CreatedResources::default();
        match self
            .provision(&req, &project, &plugins, issue.as_ref(), &id, &mut created)
            .await
        {
            Ok(session) => {
                info!(session = %id, handle = ?session.runtime_handle, "session spawned");
                Ok(session)
            }
            Err(e) => {
                warn!(session = %id, error = %e, "spawn failed, rolling back");
                self.rollback(&id, &plugins, &created);
                Err(e)
            }
        }
    }

    async fn provision(
        &self,
        req: &SpawnRequest,
        project: &ProjectConfig,
        plugins: &ResolvedPlugins,
        issue: Option<&Issue>,
        id: &str,
        created: &mut CreatedResources,
    ) -> Result<Session> {
        let branch = branch_name(req, plugins.tracker.as_deref(), issue, id);

        // Workspace (typically a worktree off the default branch).
        let workspace_path = {
            let workspace = plugins.workspace.clone();
            let ws_req = WorkspaceRequest {
                project_path: project.path.clone(),
                default_branch: project.default_branch.clone(),
                branch: branch.clone(),
                session_id: id.to_string(),
            };
            tokio::task::spawn_blocking(move || workspace.create(&ws_req))
                .await
                .map_err(|e| SessionError::Resource(format!("workspace task failed: {e}")))?
                .map_err(|e| SessionError::Resource(format!("workspace creation failed: {e}")))?
        };
        created.workspace = Some(workspace_path.clone());

        // Prompt: explicit > tracker-derived issue context.
        let issue_context = match (&req.prompt, &req.issue_id, &plugins.tracker) {
            (Some(prompt), _, _) => Some(prompt.clone()),
            (None, Some(issue_id), Some(tracker)) => Some(
                tracker
                    .generate_prompt(issue_id)
                    .await
                    .map_err(|e| SessionError::Tracker(e.to_string()))?,
            ),
            _ => None,
        };
        let agent_prompt = prompt::compose_prompt(issue_context.as_deref(), &project.prompts);

        // Methodology: system-prompt file + symlinked skill/rule dirs.
        let mut system_prompt_file = None;
        if let (Some(prp), Some(issue)) = (&project.prp, issue) {
            if prp.enabled {
                let path = self.store.root().join("prompts").join(format!("{id}.md"));
                let content = prompt::compose_system_prompt(issue, &prp.gates);
                atomic_write(&path, content.as_bytes())?;
                if let Some(plugin_path) = &prp.plugin_path {
                    link_methodology_dirs(plugin_path, &workspace_path)?;
                }
                system_prompt_file = Some(path);
            }
        }
        for src in &project.symlinks {
            link_into_workspace(src, &workspace_path)?;
        }

        // Launch the agent under the runtime.
        let handle = {
            let runtime = plugins.runtime.clone();
            let argv = plugins.agent.build_launch_command(&LaunchOptions {
                system_prompt_file: system_prompt_file.clone(),
                ..Default::default()
            });
            let env = HashMap::from([
                ("FOREMAN_SESSION".to_string(), id.to_string()),
                ("FOREMAN_PROJECT".to_string(), req.project_id.clone()),
            ]);
            let cwd = workspace_path.clone();
            tokio::task::spawn_blocking(move || runtime.start(&argv, &env, &cwd))
                .await
                .map_err(|e| SessionError::Resource(format!("runtime task failed: {e}")))?
                .map_err(|e| SessionError::Resource(format!("agent launch failed: {e}")))?
        };
        created.handle = Some(handle.clone());

        plugins
            .agent
            .deliver(plugins.runtime.as_ref(), &handle, &agent_prompt)?;

        // Persist the full metadata record.
        let mut session = Session::from_metadata(id, HashMap::new());
        session.project_id = req.project_id.clone();
        session.status = SessionStatus::Spawning;
        session.branch = Some(branch);
        session.workspace_path = Some(workspace_path.clone());
        session.runtime_handle = Some(handle);
        session.agent = Some(plugins.agent_name.clone());
        session.issue_id = req
            .issue_id
            .as_ref()
            .map(|raw| issue.map(|i| i.url.clone()).filter(|u| !u.is_empty()).unwrap_or_else(|| raw.clone()));
        session.created_at = Some(Utc::now());
        if let Some(path) = &system_prompt_file {
            session
                .metadata
                .insert(KEY_PROMPT_FILE.to_string(), path.display().to_string());
        }
        session.metadata.insert(
            "runtime".to_string(),
            plugins.runtime_name.clone(),
        );
        self.store.update_merge(id, &session.to_metadata())?;

        // In-workspace hook so the agent writes facts back to us.
        let metadata_file = self.store.metadata_path(id)?;
        plugins
            .agent
            .post_launch_setup(&workspace_path, id, &metadata_file)?;

        Ok(session)
    }

    /// Best-effort teardown after a failed spawn.
    fn rollback(&self, id: &str, plugins: &ResolvedPlugins, created: &CreatedResources) {
        if let Some(handle) = &created.handle {
            if let Err(e) = plugins.runtime.stop(handle) {
                warn!(session = %id, error = %e, "rollback: runtime stop failed");
            }
        }
        if let Some(path) = &created.workspace {
            if let Err(e) = plugins.workspace.destroy(path) {
                warn!(session = %id, error = %e, "rollback: workspace destroy failed");
            }
        }
        if let Err(e) = self.store.archive(id) {
            warn!(session = %id, error = %e, "rollback: metadata archive failed");
        }
    }

    /// Reserves the next free `{prefix}-{n}` id, retrying on collisions.
    fn reserve_id(&self, project: &ProjectConfig, project_id: &str) -> Result<String> {
        let prefix = project.session_prefix_or(project_id);
        let mut n = self.current_max(prefix)? + 1;

        for _ in 0..RESERVE_ATTEMPTS {
            let id = format!("{prefix}-{n}");
            match self.store.reserve(&id) {
                Ok(()) => return Ok(id),
                Err(StoreError::AlreadyReserved(_)) => n += 1,
                Err(e) => return Err(e.into()),
            }
        }
        Err(SessionError::Resource(format!(
            "could not reserve a session id for '{prefix}' after {RESERVE_ATTEMPTS} attempts"
        )))
    }

    fn current_max(&self, prefix: &str) -> Result<u64> {
        let mut max = 0;
        for id in self.store.list()? {
            if let Some(rest) = id.strip_prefix(prefix).and_then(|r| r.strip_prefix('-')) {
                if let Ok(n) = rest.parse::<u64>() {
                    max = max.max(n);
                }
            }
        }
        Ok(max)
    }

    /// All sessions (optionally one project's), reconciled against runtime
    /// liveness: a non-terminal session whose runtime died is marked
    /// `killed` before being returned.
    pub fn list(&self, project_id: Option<&str>) -> Result<Vec<Session>> {
        let mut sessions = Vec::new();
        for id in self.store.list()? {
            let Some(map) = self.store.read(&id)? else {
                continue;
            };
            let mut session = Session::from_metadata(&id, map);
            if let Some(filter) = project_id {
                if session.project_id != filter {
                    continue;
                }
            }
            self.reconcile_liveness(&mut session);
            sessions.push(session);
        }
        Ok(sessions)
    }

    /// One session by id, reconciled like `list`.
    pub fn get(&self, id: &str) -> Result<Session> {
        let map = self
            .store
            .read(id)?
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let mut session = Session::from_metadata(id, map);
        self.reconcile_liveness(&mut session);
        Ok(session)
    }

    fn reconcile_liveness(&self, session: &mut Session) {
        if session.status.is_terminal() {
            return;
        }
        let (Some(handle), Some(runtime)) = (
            session.runtime_handle.clone(),
            self.runtime_for(&session.project_id),
        ) else {
            return;
        };
        if !runtime.is_alive(&handle) {
            debug!(session = %session.id, handle = %handle, "runtime handle dead, marking killed");
            session.status = SessionStatus::Killed;
            let patch = HashMap::from([(
                keys::STATUS.to_string(),
                SessionStatus::Killed.to_string(),
            )]);
            if let Err(e) = self.store.update_merge(&session.id, &patch) {
                warn!(session = %session.id, error = %e, "failed to persist killed status");
            }
        }
    }

    /// Delivers a message to the agent through its own transport and
    /// touches `lastActivityAt`.
    pub fn send(&self, id: &str, message: &str) -> Result<()> {
        let session = self.get(id)?;
        let handle = session
            .runtime_handle
            .clone()
            .ok_or_else(|| SessionError::Resource(format!("session '{id}' has no runtime handle")))?;

        let project = self.config.project(&session.project_id)?;
        let plugins = self.resolve_plugins(project)?;
        plugins
            .agent
            .deliver(plugins.runtime.as_ref(), &handle, message)?;

        let patch = HashMap::from([(
            keys::LAST_ACTIVITY_AT.to_string(),
            Utc::now().to_rfc3339(),
        )]);
        self.store.update_merge(id, &patch)?;
        Ok(())
    }

    /// Best-effort teardown: stop the runtime, destroy the workspace,
    /// archive the metadata. A failure in one step never prevents the
    /// others; only a failed archive is returned.
    pub fn kill(&self, id: &str) -> Result<()> {
        let session = self.get(id)?;

        if let (Some(handle), Some(runtime)) = (
            &session.runtime_handle,
            self.runtime_for(&session.project_id),
        ) {
            if runtime.is_alive(handle) {
                if let Err(e) = runtime.stop(handle) {
                    warn!(session = %id, error = %e, "kill: runtime stop failed");
                }
            }
        }

        if let (Some(path), Some(workspace)) = (
            &session.workspace_path,
            self.workspace_for(&session.project_id),
        ) {
            if let Err(e) = workspace.destroy(path) {
                warn!(session = %id, error = %e, "kill: workspace destroy failed");
            }
        }

        // Record the final status so the archive is self-describing.
        let patch = HashMap::from([(
            keys::STATUS.to_string(),
            SessionStatus::Killed.to_string(),
        )]);
        if let Err(e) = self.store.update_merge(id, &patch) {
            warn!(session = %id, error = %e, "kill: status persist failed");
        }

        self.store.archive(id)?;
        info!(session = %id, "session killed");
        Ok(())
    }

    /// Archives terminal sessions older than `max_age`. Returns the ids
    /// cleaned up.
    pub fn cleanup(&self, max_age: Duration) -> Result<Vec<String>> {
        let now = Utc::now();
        let mut cleaned = Vec::new();
        for session in self.list(None)? {
            if !session.status.is_terminal() {
                continue;
            }
            let last = session.last_activity_at.or(session.created_at);
            let old_enough = match last {
                Some(t) => (now - t).to_std().map(|d| d >= max_age).unwrap_or(false),
                // No timestamps at all: a stale reservation, clean it.
                None => true,
            };
            if old_enough {
                if let Err(e) = self.kill(&session.id) {
                    warn!(session = %session.id, error = %e, "cleanup: kill failed");
                    continue;
                }
                cleaned.push(session.id);
            }
        }
        Ok(cleaned)
    }

    /// Recreates workspace and runtime for a session whose runtime died.
    pub async fn restore(&self, id: &str) -> Result<Session> {
        let session = self.get(id)?;
        let project = self.config.project(&session.project_id)?.clone();
        let plugins = self.resolve_plugins(&project)?;

        if let Some(handle) = &session.runtime_handle {
            if plugins.runtime.is_alive(handle) {
                return Err(SessionError::Resource(format!(
                    "session '{id}' is already running"
                )));
            }
        }

        let branch = session
            .branch
            .clone()
            .unwrap_or_else(|| format!("session/{id}"));
        let workspace_path = match &session.workspace_path {
            Some(path) if path.exists() => path.clone(),
            _ => {
                let workspace = plugins.workspace.clone();
                let ws_req = WorkspaceRequest {
                    project_path: project.path.clone(),
                    default_branch: project.default_branch.clone(),
                    branch: branch.clone(),
                    session_id: id.to_string(),
                };
                tokio::task::spawn_blocking(move || workspace.create(&ws_req))
                    .await
                    .map_err(|e| SessionError::Resource(format!("workspace task failed: {e}")))?
                    .map_err(|e| SessionError::Resource(format!("workspace creation failed: {e}")))?
            }
        };

        let system_prompt_file = session
            .metadata
            .get(KEY_PROMPT_FILE)
            .map(PathBuf::from)
            .filter(|p| p.exists());
        let handle = {
            let runtime = plugins.runtime.clone();
            let argv = plugins.agent.build_launch_command(&LaunchOptions {
                system_prompt_file,
                ..Default::default()
            });
            let env = HashMap::from([
                ("FOREMAN_SESSION".to_string(), id.to_string()),
                ("FOREMAN_PROJECT".to_string(), session.project_id.clone()),
            ]);
            let cwd = workspace_path.clone();
            tokio::task::spawn_blocking(move || runtime.start(&argv, &env, &cwd))
                .await
                .map_err(|e| SessionError::Resource(format!("runtime task failed: {e}")))?
                .map_err(|e| SessionError::Resource(format!("agent launch failed: {e}")))?
        };

        let patch = HashMap::from([
            (keys::TMUX_NAME.to_string(), handle.clone()),
            (keys::WORKTREE.to_string(), workspace_path.display().to_string()),
            (keys::STATUS.to_string(), SessionStatus::Working.to_string()),
            (keys::LAST_ACTIVITY_AT.to_string(), Utc::now().to_rfc3339()),
        ]);
        let map = self.store.update_merge(id, &patch)?;
        info!(session = %id, handle = %handle, "session restored");
        Ok(Session::from_metadata(id, map))
    }

    fn resolve_plugins(&self, project: &ProjectConfig) -> Result<ResolvedPlugins> {
        let runtime_name = project
            .runtime
            .clone()
            .unwrap_or_else(|| self.config.defaults.runtime.clone());
        let agent_name = project
            .agent
            .clone()
            .unwrap_or_else(|| self.config.defaults.agent.clone());
        let workspace_name = project
            .workspace
            .clone()
            .unwrap_or_else(|| self.config.defaults.workspace.clone());

        let runtime = self
            .registry
            .runtime(&runtime_name)
            .ok_or_else(|| SessionError::Config(format!("unresolved runtime plugin '{runtime_name}'")))?;
        let agent = self
            .registry
            .agent(&agent_name)
            .ok_or_else(|| SessionError::Config(format!("unresolved agent plugin '{agent_name}'")))?;
        let workspace = self.registry.workspace(&workspace_name).ok_or_else(|| {
            SessionError::Config(format!("unresolved workspace plugin '{workspace_name}'"))
        })?;
        let tracker = match &project.tracker {
            Some(tc) => Some(self.registry.tracker(&tc.plugin).ok_or_else(|| {
                SessionError::Config(format!("unresolved tracker plugin '{}'", tc.plugin))
            })?),
            None => None,
        };

        // SCM and notifiers are resolved up front even though spawn never
        // probes them: an unresolved name must fail as a ConfigError here,
        // not surface later as a silently skipped probe in the poll loop.
        if let Some(scm_name) = &project.scm {
            self.registry.scm(scm_name).ok_or_else(|| {
                SessionError::Config(format!("unresolved scm plugin '{scm_name}'"))
            })?;
        }
        for name in self.config.notifier_names() {
            if self.registry.notifier(&name).is_none() {
                return Err(SessionError::Config(format!(
                    "unresolved notifier plugin '{name}'"
                )));
            }
        }

        Ok(ResolvedPlugins {
            runtime,
            runtime_name,
            agent,
            agent_name,
            workspace,
            tracker,
        })
    }

    /// Resolves every project's configured plugins against the registry.
    ///
    /// Run at startup so a misspelled or unregistered plugin name stops
    /// the process instead of failing a spawn, or worse, a skipped probe,
    /// much later.
    pub fn validate_plugins(&self) -> Result<()> {
        for (id, project) in &self.config.projects {
            self.resolve_plugins(project).map_err(|e| match e {
                SessionError::Config(msg) => {
                    SessionError::Config(format!("project '{id}': {msg}"))
                }
                other => other,
            })?;
        }
        Ok(())
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

    fn workspace_for(&self, project_id: &str) -> Option<Arc<dyn Workspace>> {
        let name = self
            .config
            .projects
            .get(project_id)
            .and_then(|p| p.workspace.clone())
            .unwrap_or_else(|| self.config.defaults.workspace.clone());
        self.registry.workspace(&name)
    }
}

/// Branch name precedence: explicit > tracker-derived > issue-derived >
/// `session/{id}`.
fn branch_name(
    req: &SpawnRequest,
    tracker: Option<&dyn Tracker>,
    issue: Option<&Issue>,
    id: &str,
) -> String {
    if let Some(branch) = &req.branch {
        return branch.clone();
    }
    if let (Some(tracker), Some(issue)) = (tracker, issue) {
        if let Some(branch) = tracker.branch_name(issue) {
            return branch;
        }
    }
    if let Some(issue_id) = &req.issue_id {
        return format!("feat/{}", sanitize_issue_ref(issue_id));
    }
    format!("session/{id}")
}

/// Reduces an issue reference (bare id or URL) to a branch-safe token.
fn sanitize_issue_ref(raw: &str) -> String {
    let tail = raw.rsplit('/').next().unwrap_or(raw);
    let mut out = String::with_capacity(tail.len());
    for c in tail.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "issue".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Symlinks the methodology's skill and rule directories into the
/// workspace. Only the individual subdirectories are linked (never the
/// methodology root: the workspace's own `.claude/settings.json` must not
/// leak into the methodology source). Existing link targets are replaced.
fn link_methodology_dirs(plugin_path: &Path, workspace: &Path) -> Result<()> {
    for sub in ["skills", "rules"] {
        let src = plugin_path.join(sub);
        if !src.exists() {
            continue;
        }
        let dest = workspace.join(".claude").join(sub);
        replace_symlink(&src, &dest)?;
    }
    Ok(())
}

/// Symlinks an arbitrary configured directory into the workspace root.
fn link_into_workspace(src: &Path, workspace: &Path) -> Result<()> {
    let Some(name) = src.file_name() else {
        return Ok(());
    };
    if !src.exists() {
        warn!(src = %src.display(), "configured symlink source missing, skipping");
        return Ok(());
    }
    replace_symlink(src, &workspace.join(name))
}

fn replace_symlink(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(foreman_plugins::PluginError::Io)?;
    }
    match std::fs::symlink_metadata(dest) {
        Ok(meta) => {
            if meta.file_type().is_dir() {
                std::fs::remove_dir_all(dest).map_err(foreman_plugins::PluginError::Io)?;
            } else {
                std::fs::remove_file(dest).map_err(foreman_plugins::PluginError::Io)?;
            }
        }
        Err(_) => {}
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(src, dest).map_err(foreman_plugins::PluginError::Io)?;
    #[cfg(not(unix))]
    {
        let _ = src;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use foreman_plugins::builtin::LogNotifier;
    use foreman_plugins::testing::{
        FakeAgent, FakeRuntime, FakeTracker, FakeWorkspace,
    };
    use foreman_store::MetadataStore;
    use tempfile::TempDir;

    struct TestEnv {
        _dir: TempDir,
        manager: SessionManager,
        runtime: Arc<FakeRuntime>,
        agent: Arc<FakeAgent>,
        tracker: Arc<FakeTracker>,
        store: MetadataStore,
        workspace_root: PathBuf,
    }

    const CONFIG_YAML: &str = r#"
defaults:
  runtime: fake-runtime
  agent: fake-agent
  workspace: fake-workspace
projects:
  app:
    repo: org/app
    path: /work/app
    tracker:
      plugin: fake-tracker
"#;

    fn make_env(config_yaml: &str) -> TestEnv {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path().join("state"));
        let workspace_root = dir.path().join("workspaces");

        let runtime = Arc::new(FakeRuntime::new());
        let agent = Arc::new(FakeAgent::new());
        let tracker = Arc::new(FakeTracker::new());
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
        registry.register_workspace(Arc::new(FakeWorkspace::new(&workspace_root)));
        registry.register_tracker(tracker.clone());
        registry.register_notifier(Arc::new(LogNotifier::new()));

        let config: Config = serde_yaml::from_str(config_yaml).unwrap();
        let manager = SessionManager::new(Arc::new(config), store.clone(), Arc::new(registry));

        TestEnv {
            _dir: dir,
            manager,
            runtime,
            agent,
            tracker,
            store,
            workspace_root,
        }
    }

    fn spawn_req(issue: Option<&str>) -> SpawnRequest {
        SpawnRequest {
            project_id: "app".to_string(),
            issue_id: issue.map(String::from),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn spawn_creates_full_session() {
        let env = make_env(CONFIG_YAML);

        let session = env
            .manager
            .spawn(spawn_req(Some("https://github.com/org/app/issues/42")))
            .await
            .unwrap();

        assert_eq!(session.id, "app-1");
        assert_eq!(session.status, SessionStatus::Spawning);
        assert_eq!(
            session.issue_id.as_deref(),
            Some("https://github.com/org/app/issues/42")
        );
        assert!(env.workspace_root.join("app-1").exists());

        let handle = session.runtime_handle.unwrap();
        assert!(env.runtime.is_alive(&handle));
        assert!(env.agent.setup_ran.load(std::sync::atomic::Ordering::SeqCst));

        // Initial prompt delivered through the agent transport.
        let sent = env.runtime.sent(&handle);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("autonomous coding agent"));
        assert!(sent[0].contains("Add login"));

        // Metadata persisted.
        let map = env.store.read("app-1").unwrap().unwrap();
        assert_eq!(map["status"], "spawning");
        assert_eq!(map["project"], "app");
        assert!(map.contains_key("createdAt"));
    }

    #[tokio::test]
    async fn spawn_without_issue_uses_explicit_prompt() {
        let env = make_env(CONFIG_YAML);
        let session = env
            .manager
            .spawn(SpawnRequest {
                project_id: "app".to_string(),
                prompt: Some("Refactor the config loader".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(session.branch.as_deref(), Some("session/app-1"));
        let sent = env.runtime.sent(&session.runtime_handle.unwrap());
        assert!(sent[0].contains("Refactor the config loader"));
    }

    #[tokio::test]
    async fn spawn_with_unregistered_scm_is_config_error() {
        let yaml = r#"
defaults:
  runtime: fake-runtime
  agent: fake-agent
  workspace: fake-workspace
projects:
  app:
    repo: org/app
    path: /work/app
    scm: github
    tracker:
      plugin: fake-tracker
"#;
        let env = make_env(yaml);

        let err = env.manager.spawn(spawn_req(None)).await.unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
        assert!(err.to_string().contains("scm"));
        // Nothing was reserved or created.
        assert!(env.store.list().unwrap().is_empty());
        assert_eq!(env.runtime.started_count(), 0);
    }

    #[tokio::test]
    async fn spawn_with_unrouted_notifier_is_config_error() {
        let yaml = r#"
defaults:
  runtime: fake-runtime
  agent: fake-agent
  workspace: fake-workspace
  notifiers: [pager]
projects:
  app:
    repo: org/app
    path: /work/app
"#;
        let env = make_env(yaml);
        let err = env.manager.spawn(spawn_req(None)).await.unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
        assert!(err.to_string().contains("notifier"));
    }

    #[test]
    fn validate_plugins_passes_and_fails_by_registry() {
        let good = make_env(CONFIG_YAML);
        good.manager.validate_plugins().unwrap();

        let bad = make_env(
            r#"
defaults:
  runtime: fake-runtime
  agent: fake-agent
  workspace: fake-workspace
projects:
  app:
    repo: org/app
    path: /work/app
    scm: github
"#,
        );
        let err = bad.manager.validate_plugins().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("project 'app'"), "{message}");
        assert!(message.contains("scm"), "{message}");
    }

    #[tokio::test]
    async fn spawn_unknown_project_is_config_error() {
        let env = make_env(CONFIG_YAML);
        let err = env
            .manager
            .spawn(SpawnRequest {
                project_id: "ghost".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
    }

    #[tokio::test]
    async fn spawn_missing_issue_allocates_nothing() {
        let env = make_env(CONFIG_YAML);
        let err = env
            .manager
            .spawn(spawn_req(Some("https://github.com/org/app/issues/999")))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Tracker(_)));
        assert!(env.store.list().unwrap().is_empty());
        assert_eq!(env.runtime.started_count(), 0);
    }

    #[tokio::test]
    async fn spawn_runtime_failure_rolls_back() {
        let env = make_env(CONFIG_YAML);
        env.runtime
            .fail_start
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let err = env
            .manager
            .spawn(spawn_req(Some("https://github.com/org/app/issues/42")))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Resource(_)));

        // Workspace torn down, metadata archived, nothing listed.
        assert!(!env.workspace_root.join("app-1").exists());
        assert!(env.store.list().unwrap().is_empty());
        assert!(env.store.archive_dir().exists());
    }

    #[tokio::test]
    async fn ids_increment_and_skip_reserved() {
        let env = make_env(CONFIG_YAML);

        let first = env.manager.spawn(spawn_req(None)).await.unwrap();
        assert_eq!(first.id, "app-1");

        // A manually reserved id pushes the counter past it.
        env.store.reserve("app-5").unwrap();
        let next = env.manager.spawn(spawn_req(None)).await.unwrap();
        assert_eq!(next.id, "app-6");
    }

    #[tokio::test]
    async fn branch_precedence() {
        let env = make_env(CONFIG_YAML);

        let explicit = env
            .manager
            .spawn(SpawnRequest {
                project_id: "app".to_string(),
                issue_id: Some("https://github.com/org/app/issues/42".to_string()),
                branch: Some("hotfix/now".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(explicit.branch.as_deref(), Some("hotfix/now"));

        // FakeTracker has no branch convention: issue-derived fallback.
        // (The duplicate-session guard lives in the trigger engine, so a
        // second spawn for the same issue goes through here.)
        let derived = env
            .manager
            .spawn(spawn_req(Some("https://github.com/org/app/issues/42")))
            .await
            .unwrap();
        assert_eq!(derived.branch.as_deref(), Some("feat/42"));
    }

    #[tokio::test]
    async fn send_delivers_and_touches_activity() {
        let env = make_env(CONFIG_YAML);
        let session = env.manager.spawn(spawn_req(None)).await.unwrap();
        let handle = session.runtime_handle.unwrap();

        env.manager.send("app-1", "please run the tests").unwrap();

        let sent = env.runtime.sent(&handle);
        assert!(sent.iter().any(|m| m == "please run the tests"));
        let map = env.store.read("app-1").unwrap().unwrap();
        assert!(map.contains_key("lastActivityAt"));
    }

    #[tokio::test]
    async fn send_unknown_session_is_not_found() {
        let env = make_env(CONFIG_YAML);
        assert!(matches!(
            env.manager.send("app-9", "hi"),
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn kill_tears_down_everything() {
        let env = make_env(CONFIG_YAML);
        let session = env.manager.spawn(spawn_req(None)).await.unwrap();
        let handle = session.runtime_handle.unwrap();

        env.manager.kill("app-1").unwrap();

        assert!(!env.runtime.is_alive(&handle));
        assert!(!env.workspace_root.join("app-1").exists());
        assert!(env.store.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_reconciles_dead_runtime_to_killed() {
        let env = make_env(CONFIG_YAML);
        let session = env.manager.spawn(spawn_req(None)).await.unwrap();
        env.runtime.kill_silently(&session.runtime_handle.unwrap());

        let sessions = env.manager.list(None).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Killed);

        // Persisted too.
        let map = env.store.read("app-1").unwrap().unwrap();
        assert_eq!(map["status"], "killed");
    }

    #[tokio::test]
    async fn restore_relaunches_dead_session() {
        let env = make_env(CONFIG_YAML);
        let session = env.manager.spawn(spawn_req(None)).await.unwrap();
        let old_handle = session.runtime_handle.unwrap();
        env.runtime.kill_silently(&old_handle);

        let restored = env.manager.restore("app-1").await.unwrap();
        let new_handle = restored.runtime_handle.unwrap();
        assert_ne!(new_handle, old_handle);
        assert!(env.runtime.is_alive(&new_handle));
        assert_eq!(restored.status, SessionStatus::Working);
    }

    #[tokio::test]
    async fn restore_refuses_live_session() {
        let env = make_env(CONFIG_YAML);
        env.manager.spawn(spawn_req(None)).await.unwrap();
        assert!(matches!(
            env.manager.restore("app-1").await,
            Err(SessionError::Resource(_))
        ));
    }

    #[tokio::test]
    async fn cleanup_archives_old_terminal_sessions() {
        let env = make_env(CONFIG_YAML);
        env.manager.spawn(spawn_req(None)).await.unwrap();
        env.manager.spawn(spawn_req(None)).await.unwrap();

        // app-1 finished long ago; app-2 is still working.
        env.store
            .update_merge(
                "app-1",
                &HashMap::from([
                    ("status".to_string(), "merged".to_string()),
                    (
                        "lastActivityAt".to_string(),
                        (Utc::now() - chrono::Duration::hours(48)).to_rfc3339(),
                    ),
                ]),
            )
            .unwrap();

        let cleaned = env.manager.cleanup(Duration::from_secs(24 * 3600)).unwrap();
        assert_eq!(cleaned, vec!["app-1".to_string()]);
        assert_eq!(env.store.list().unwrap(), vec!["app-2".to_string()]);
    }

    #[tokio::test]
    async fn prp_spawn_writes_system_prompt_file() {
        let yaml = r#"
defaults:
  runtime: fake-runtime
  agent: fake-agent
  workspace: fake-workspace
projects:
  app:
    repo: org/app
    path: /work/app
    tracker:
      plugin: fake-tracker
    prp:
      enabled: true
      gates:
        plan: true
"#;
        let env = make_env(yaml);
        let session = env
            .manager
            .spawn(spawn_req(Some("https://github.com/org/app/issues/42")))
            .await
            .unwrap();

        let prompt_file = env.store.root().join("prompts/app-1.md");
        assert!(prompt_file.exists());
        let content = std::fs::read_to_string(&prompt_file).unwrap();
        assert!(content.contains("Plan gate"));
        assert!(content.contains("/prp-investigate"));

        assert_eq!(
            session.metadata.get("promptFile").map(String::as_str),
            Some(prompt_file.display().to_string().as_str())
        );
        let _ = env.tracker;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn prp_spawn_symlinks_methodology_dirs() {
        let dir = TempDir::new().unwrap();
        let plugin_path = dir.path().join("methodology");
        std::fs::create_dir_all(plugin_path.join("skills")).unwrap();
        std::fs::create_dir_all(plugin_path.join("rules")).unwrap();

        let yaml = format!(
            r#"
defaults:
  runtime: fake-runtime
  agent: fake-agent
  workspace: fake-workspace
projects:
  app:
    repo: org/app
    path: /work/app
    tracker:
      plugin: fake-tracker
    prp:
      enabled: true
      pluginPath: {}
"#,
            plugin_path.display()
        );
        let env = make_env(&yaml);
        let session = env
            .manager
            .spawn(spawn_req(Some("https://github.com/org/app/issues/42")))
            .await
            .unwrap();

        let workspace = session.workspace_path.unwrap();
        for sub in ["skills", "rules"] {
            let link = workspace.join(".claude").join(sub);
            let meta = std::fs::symlink_metadata(&link).unwrap();
            assert!(meta.file_type().is_symlink(), "{sub} should be a symlink");
            assert_eq!(std::fs::read_link(&link).unwrap(), plugin_path.join(sub));
        }
    }

    #[test]
    fn sanitize_issue_refs() {
        assert_eq!(sanitize_issue_ref("42"), "42");
        assert_eq!(sanitize_issue_ref("https://github.com/org/app/issues/42"), "42");
        assert_eq!(sanitize_issue_ref("PROJ-123"), "proj-123");
        assert_eq!(sanitize_issue_ref("weird !! ref"), "weird-ref");
        assert_eq!(sanitize_issue_ref("///"), "issue");
    }
}
