//! Error types for session management.

use thiserror::Error;

/// Errors raised by session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Missing project or unresolved plugin. Never suppressed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Issue validation or tracker I/O failed; spawn aborts cleanly.
    #[error("tracker error: {0}")]
    Tracker(String),

    /// Id reservation exhausted or workspace/runtime creation failed;
    /// prior steps have been rolled back.
    #[error("resource error: {0}")]
    Resource(String),

    #[error("session '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] foreman_store::StoreError),

    #[error(transparent)]
    Plugin(#[from] foreman_plugins::PluginError),
}

impl From<foreman_config::ConfigError> for SessionError {
    fn from(e: foreman_config::ConfigError) -> Self {
        SessionError::Config(e.to_string())
    }
}

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
