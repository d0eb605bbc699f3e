//! The configuration schema.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use foreman_models::{Priority, TriggerEventKind};

use crate::error::{ConfigError, Result};
use crate::escalate::EscalateAfter;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub notification_routing: NotificationRouting,

    /// Deployment-wide reactions, keyed by reaction key.
    #[serde(default)]
    pub reactions: HashMap<String, ReactionConfig>,

    /// Projects in declared order (BTreeMap keeps matching deterministic).
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectConfig>,
}

impl Config {
    /// Loads and validates a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config =
            serde_yaml::from_str(&data).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (id, project) in &self.projects {
            let prefix = project.session_prefix.as_deref().unwrap_or(id);
            if !foreman_models::is_valid_session_id(prefix) {
                return Err(ConfigError::Invalid(format!(
                    "project '{id}': session prefix '{prefix}' must match [A-Za-z0-9_-]+"
                )));
            }
            if project.path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!("project '{id}': path is required")));
            }
        }
        Ok(())
    }

    pub fn project(&self, id: &str) -> Result<&ProjectConfig> {
        self.projects
            .get(id)
            .ok_or_else(|| ConfigError::UnknownProject(id.to_string()))
    }

    /// Looks up a reaction by key: project override first, then global.
    pub fn reaction_for(&self, project_id: &str, key: &str) -> Option<&ReactionConfig> {
        self.projects
            .get(project_id)
            .and_then(|p| p.reactions.get(key))
            .or_else(|| self.reactions.get(key))
    }

    /// Notifier names for a priority band, falling back to the default
    /// notifier list when the band is unrouted.
    pub fn notifiers_for(&self, priority: Priority) -> &[String] {
        let band = self.notification_routing.band(priority);
        if band.is_empty() {
            &self.defaults.notifiers
        } else {
            band
        }
    }

    /// Every notifier name the configuration can route to: the defaults
    /// plus all four priority bands, deduplicated.
    pub fn notifier_names(&self) -> Vec<String> {
        let routing = &self.notification_routing;
        let mut names = self.defaults.notifiers.clone();
        for band in [&routing.urgent, &routing.action, &routing.warning, &routing.info] {
            names.extend(band.iter().cloned());
        }
        names.sort();
        names.dedup();
        names
    }
}

/// Plugin names used when a project does not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Defaults {
    #[serde(default = "default_runtime")]
    pub runtime: String,
    #[serde(default = "default_agent")]
    pub agent: String,
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default = "default_notifiers")]
    pub notifiers: Vec<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            agent: default_agent(),
            workspace: default_workspace(),
            notifiers: default_notifiers(),
        }
    }
}

fn default_runtime() -> String {
    "tmux".to_string()
}

fn default_agent() -> String {
    "claude-code".to_string()
}

fn default_workspace() -> String {
    "worktree".to_string()
}

fn default_notifiers() -> Vec<String> {
    vec!["log".to_string()]
}

/// Notifier names per priority band.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NotificationRouting {
    #[serde(default)]
    pub urgent: Vec<String>,
    #[serde(default)]
    pub action: Vec<String>,
    #[serde(default)]
    pub warning: Vec<String>,
    #[serde(default)]
    pub info: Vec<String>,
}

impl NotificationRouting {
    pub fn band(&self, priority: Priority) -> &[String] {
        match priority {
            Priority::Urgent => &self.urgent,
            Priority::Action => &self.action,
            Priority::Warning => &self.warning,
            Priority::Info => &self.info,
        }
    }
}

/// Automated response to a recognized event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReactionConfig {
    /// When false, the automated action is suppressed; `notify` still runs.
    #[serde(default = "default_true")]
    pub auto: bool,
    pub action: ReactionAction,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub escalate_after: Option<EscalateAfter>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReactionAction {
    SendToAgent,
    Notify,
    AutoMerge,
}

/// One orchestrated project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProjectConfig {
    /// Repository slug (`org/app`) used for webhook project matching.
    #[serde(default)]
    pub repo: Option<String>,

    /// Primary checkout on disk.
    pub path: PathBuf,

    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Session id prefix; defaults to the project key.
    #[serde(default)]
    pub session_prefix: Option<String>,

    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub scm: Option<String>,

    #[serde(default)]
    pub tracker: Option<TrackerConfig>,

    /// Extra directories symlinked into each session workspace.
    #[serde(default)]
    pub symlinks: Vec<PathBuf>,

    /// Prompt snippets appended to every composed prompt.
    #[serde(default)]
    pub prompts: Vec<String>,

    /// Project-level reaction overrides.
    #[serde(default)]
    pub reactions: HashMap<String, ReactionConfig>,

    #[serde(default)]
    pub webhooks: WebhooksConfig,

    #[serde(default)]
    pub triggers: Vec<TriggerRule>,

    #[serde(default)]
    pub prp: Option<PrpConfig>,
}

impl ProjectConfig {
    pub fn session_prefix_or<'a>(&'a self, project_id: &'a str) -> &'a str {
        self.session_prefix.as_deref().unwrap_or(project_id)
    }

    pub fn prp_enabled(&self) -> bool {
        self.prp.as_ref().map(|p| p.enabled).unwrap_or(false)
    }
}

fn default_branch() -> String {
    "main".to_string()
}

/// Tracker plugin selection plus provider-specific options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub plugin: String,
    #[serde(flatten)]
    pub options: HashMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WebhooksConfig {
    #[serde(default)]
    pub github: Option<WebhookSecret>,
    #[serde(default)]
    pub plane: Option<PlaneWebhook>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WebhookSecret {
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlaneWebhook {
    pub secret: String,
    pub workspace_id: String,
}

/// A project-level rule mapping normalized tracker events to decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TriggerRule {
    pub on: TriggerEventKind,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub action: TriggerAction,
    #[serde(default)]
    pub comment_pattern: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerAction {
    #[default]
    Spawn,
    ResumeSession,
}

/// Structured-methodology settings for a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PrpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub plugin_path: Option<PathBuf>,
    #[serde(default)]
    pub gates: PrpGates,
    #[serde(default)]
    pub writeback: PrpWriteback,
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PrpGates {
    #[serde(default)]
    pub plan: bool,
    #[serde(default)]
    pub pr: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PrpWriteback {
    #[serde(default = "default_true")]
    pub investigation: bool,
    #[serde(default = "default_true")]
    pub plan: bool,
    #[serde(default = "default_true")]
    pub implementation: bool,
    #[serde(default = "default_true")]
    pub pr: bool,
}

impl Default for PrpWriteback {
    fn default() -> Self {
        Self {
            investigation: true,
            plan: true,
            implementation: true,
            pr: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
defaults:
  runtime: tmux
  agent: claude-code
  notifiers: [log]

notificationRouting:
  urgent: [log]
  action: [log]

reactions:
  ci-failed:
    action: send-to-agent
    message: "CI failed — please fix"
    retries: 2
    escalateAfter: "30m"
    priority: warning
  approved-and-green:
    action: auto-merge

projects:
  app:
    repo: org/app
    path: /work/app
    defaultBranch: main
    sessionPrefix: app
    tracker:
      plugin: github
    webhooks:
      github:
        secret: shhh
    triggers:
      - on: issue.labeled
        label: agent-work
        action: spawn
    prp:
      enabled: true
      gates:
        plan: true
"#;

    fn load_sample() -> Config {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        Config::load(file.path()).unwrap()
    }

    #[test]
    fn parses_full_schema() {
        let config = load_sample();

        let project = config.project("app").unwrap();
        assert_eq!(project.repo.as_deref(), Some("org/app"));
        assert_eq!(project.default_branch, "main");
        assert_eq!(project.tracker.as_ref().unwrap().plugin, "github");
        assert_eq!(project.webhooks.github.as_ref().unwrap().secret, "shhh");
        assert!(project.prp_enabled());
        assert!(project.prp.as_ref().unwrap().gates.plan);
        assert!(!project.prp.as_ref().unwrap().gates.pr);

        let rule = &project.triggers[0];
        assert_eq!(rule.on, TriggerEventKind::IssueLabeled);
        assert_eq!(rule.label.as_deref(), Some("agent-work"));
        assert_eq!(rule.action, TriggerAction::Spawn);
    }

    #[test]
    fn parses_reactions() {
        let config = load_sample();

        let ci = config.reaction_for("app", "ci-failed").unwrap();
        assert!(ci.auto);
        assert_eq!(ci.action, ReactionAction::SendToAgent);
        assert_eq!(ci.retries, Some(2));
        assert_eq!(
            ci.escalate_after,
            Some(EscalateAfter::After(Duration::from_secs(1800)))
        );
        assert_eq!(ci.priority, Some(Priority::Warning));

        assert!(config.reaction_for("app", "agent-stuck").is_none());
    }

    #[test]
    fn project_reaction_overrides_global() {
        let mut config = load_sample();
        let override_cfg = ReactionConfig {
            auto: false,
            action: ReactionAction::Notify,
            message: None,
            priority: None,
            retries: None,
            escalate_after: None,
        };
        config
            .projects
            .get_mut("app")
            .unwrap()
            .reactions
            .insert("ci-failed".to_string(), override_cfg);

        let found = config.reaction_for("app", "ci-failed").unwrap();
        assert_eq!(found.action, ReactionAction::Notify);
    }

    #[test]
    fn routing_falls_back_to_default_notifiers() {
        let config = load_sample();
        assert_eq!(config.notifiers_for(Priority::Urgent), ["log".to_string()]);
        // warning band is unrouted in the sample; falls back to defaults.
        assert_eq!(config.notifiers_for(Priority::Warning), ["log".to_string()]);
    }

    #[test]
    fn notifier_names_collects_defaults_and_bands() {
        let mut config = load_sample();
        config
            .notification_routing
            .urgent
            .push("pager".to_string());

        let names = config.notifier_names();
        assert_eq!(names, vec!["log".to_string(), "pager".to_string()]);
    }

    #[test]
    fn unknown_top_level_field_is_rejected() {
        let result: std::result::Result<Config, _> =
            serde_yaml::from_str("bogusField: true\n");
        assert!(result.is_err());
    }

    #[test]
    fn invalid_session_prefix_fails_validation() {
        let mut config = load_sample();
        config.projects.get_mut("app").unwrap().session_prefix =
            Some("bad prefix".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn defaults_fill_in() {
        let config: Config = serde_yaml::from_str("projects: {}\n").unwrap();
        assert_eq!(config.defaults.runtime, "tmux");
        assert_eq!(config.defaults.agent, "claude-code");
        assert_eq!(config.defaults.workspace, "worktree");
        assert_eq!(config.defaults.notifiers, ["log".to_string()]);
    }
}
