//! Error type shared by plugin implementations.

use thiserror::Error;

/// Errors surfaced by plugin operations.
#[derive(Error, Debug)]
pub enum PluginError {
    /// The plugin's backing tool is missing (e.g. tmux not in PATH).
    #[error("{0} not available")]
    NotAvailable(String),

    /// A subprocess the plugin runs exited non-zero.
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// The target of an operation does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Output from the backing tool could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// A provider-side failure (tracker, SCM, notifier backend).
    #[error("provider error: {0}")]
    Provider(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for plugin operations.
pub type Result<T> = std::result::Result<T, PluginError>;
