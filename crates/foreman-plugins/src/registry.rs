//! Typed plugin registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::agent::Agent;
use crate::notifier::Notifier;
use crate::runtime::Runtime;
use crate::scm::Scm;
use crate::tracker::Tracker;
use crate::workspace::Workspace;

/// Closed-world registry mapping `(slot, name)` to an implementation of
/// that slot's capability set.
///
/// Registration happens once at startup; afterwards the registry is shared
/// read-only behind an `Arc`. Lookups clone the `Arc<dyn _>` so callers
/// never hold a borrow into the registry.
#[derive(Default)]
pub struct PluginRegistry {
    runtimes: HashMap<String, Arc<dyn Runtime>>,
    agents: HashMap<String, Arc<dyn Agent>>,
    workspaces: HashMap<String, Arc<dyn Workspace>>,
    trackers: HashMap<String, Arc<dyn Tracker>>,
    scms: HashMap<String, Arc<dyn Scm>>,
    notifiers: HashMap<String, Arc<dyn Notifier>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_runtime(&mut self, plugin: Arc<dyn Runtime>) {
        self.runtimes.insert(plugin.name().to_string(), plugin);
    }

    pub fn register_agent(&mut self, plugin: Arc<dyn Agent>) {
        self.agents.insert(plugin.name().to_string(), plugin);
    }

    pub fn register_workspace(&mut self, plugin: Arc<dyn Workspace>) {
        self.workspaces.insert(plugin.name().to_string(), plugin);
    }

    pub fn register_tracker(&mut self, plugin: Arc<dyn Tracker>) {
        self.trackers.insert(plugin.name().to_string(), plugin);
    }

    pub fn register_scm(&mut self, plugin: Arc<dyn Scm>) {
        self.scms.insert(plugin.name().to_string(), plugin);
    }

    pub fn register_notifier(&mut self, plugin: Arc<dyn Notifier>) {
        self.notifiers.insert(plugin.name().to_string(), plugin);
    }

    pub fn runtime(&self, name: &str) -> Option<Arc<dyn Runtime>> {
        self.runtimes.get(name).cloned()
    }

    pub fn agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn workspace(&self, name: &str) -> Option<Arc<dyn Workspace>> {
        self.workspaces.get(name).cloned()
    }

    pub fn tracker(&self, name: &str) -> Option<Arc<dyn Tracker>> {
        self.trackers.get(name).cloned()
    }

    pub fn scm(&self, name: &str) -> Option<Arc<dyn Scm>> {
        self.scms.get(name).cloned()
    }

    pub fn notifier(&self, name: &str) -> Option<Arc<dyn Notifier>> {
        self.notifiers.get(name).cloned()
    }

    /// Resolves a list of notifier names, skipping (and logging) unknowns.
    pub fn notifiers(&self, names: &[String]) -> Vec<Arc<dyn Notifier>> {
        names
            .iter()
            .filter_map(|name| {
                let found = self.notifier(name);
                if found.is_none() {
                    tracing::warn!(notifier = %name, "unknown notifier in routing config");
                }
                found
            })
            .collect()
    }
}
