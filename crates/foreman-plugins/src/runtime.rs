//! The runtime slot: where agent processes live.

use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;

/// Runs agent processes and exposes their terminals.
///
/// A handle is an opaque string naming one running agent (for the tmux
/// implementation it is the tmux session name). Handles stay valid across
/// orchestrator restarts: they are persisted in session metadata and
/// re-probed on every poll.
pub trait Runtime: Send + Sync {
    /// Registry name of this runtime.
    fn name(&self) -> &str;

    /// Starts `argv` in `cwd` with `env` merged over the inherited
    /// environment, detached from the coordinator. Returns the handle.
    fn start(
        &self,
        argv: &[String],
        env: &HashMap<String, String>,
        cwd: &Path,
    ) -> Result<String>;

    /// True while the handle refers to a live process.
    fn is_alive(&self, handle: &str) -> bool;

    /// Captures terminal output, optionally only the last `last_lines`.
    fn output(&self, handle: &str, last_lines: Option<u32>) -> Result<String>;

    /// Types `text` into the agent's terminal followed by a newline.
    fn send(&self, handle: &str, text: &str) -> Result<()>;

    /// Stops the process behind the handle.
    fn stop(&self, handle: &str) -> Result<()>;
}
