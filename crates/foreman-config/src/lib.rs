//! Configuration for foreman.
//!
//! One YAML file describes the whole deployment: plugin defaults,
//! notification routing, reactions, and per-project trackers, triggers,
//! webhooks, and methodology settings. The schema is deserialized with
//! serde; unknown top-level fields are rejected so typos fail loudly at
//! startup instead of silently disabling behavior.

pub mod error;
pub mod escalate;
pub mod paths;
pub mod schema;

pub use error::{ConfigError, Result};
pub use escalate::EscalateAfter;
pub use paths::state_dir;
pub use schema::{
    Config, Defaults, NotificationRouting, PlaneWebhook, ProjectConfig, PrpConfig, PrpGates,
    PrpWriteback, ReactionAction, ReactionConfig, TrackerConfig, TriggerAction, TriggerRule,
    WebhookSecret, WebhooksConfig,
};
