//! Wiring: configuration, storage root, plugin registry, session manager.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::warn;

use foreman_config::{state_dir, Config};
use foreman_plugins::builtin::{ClaudeCodeAgent, GitWorktreeWorkspace, LogNotifier};
use foreman_plugins::PluginRegistry;
use foreman_session::SessionManager;
use foreman_store::{storage_root, MetadataStore};
use foreman_tmux::TmuxRuntime;

/// The assembled coordinator.
pub struct App {
    pub config: Arc<Config>,
    pub store: MetadataStore,
    pub registry: Arc<PluginRegistry>,
    pub manager: Arc<SessionManager>,
}

/// Loads configuration and builds the closed-world plugin registry.
///
/// Tracker and SCM integrations are external plugins; the built-ins cover
/// runtime (tmux), agent (claude-code), workspace (git worktree), and the
/// log notifier.
pub fn build(config_path: &Path) -> anyhow::Result<App> {
    let config = Arc::new(
        Config::load(config_path)
            .with_context(|| format!("loading config {}", config_path.display()))?,
    );

    let root = storage_root(&state_dir(), config_path);
    let store = MetadataStore::new(root);

    let mut registry = PluginRegistry::new();
    match TmuxRuntime::new() {
        Ok(tmux) => registry.register_runtime(Arc::new(tmux)),
        Err(e) => warn!(error = %e, "tmux runtime unavailable"),
    }
    registry.register_agent(Arc::new(ClaudeCodeAgent::new()));
    registry.register_workspace(Arc::new(GitWorktreeWorkspace::new()));
    registry.register_notifier(Arc::new(LogNotifier::new()));
    let registry = Arc::new(registry);

    let manager = Arc::new(SessionManager::new(
        config.clone(),
        store.clone(),
        registry.clone(),
    ));
    // Fail fast on plugin names the registry cannot resolve; a bad `scm:`
    // or notifier entry must not surface as a silently skipped probe.
    manager
        .validate_plugins()
        .context("validating configured plugins against the registry")?;

    Ok(App {
        config,
        store,
        registry,
        manager,
    })
}
