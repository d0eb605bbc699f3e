//! Shared state for the webhook endpoints.

use std::sync::Arc;

use foreman_config::Config;
use foreman_plugins::PluginRegistry;
use foreman_session::SessionManager;
use foreman_trigger::TriggerEngine;

/// Everything a webhook handler needs, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: Arc<SessionManager>,
    pub trigger: Arc<TriggerEngine>,
    pub registry: Arc<PluginRegistry>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        manager: Arc<SessionManager>,
        trigger: Arc<TriggerEngine>,
        registry: Arc<PluginRegistry>,
    ) -> Self {
        Self {
            config,
            manager,
            trigger,
            registry,
        }
    }
}
