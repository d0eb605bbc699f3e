//! The agent slot: one kind of AI coding agent.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::runtime::Runtime;
use crate::types::ActivityState;

/// Options for building an agent launch command.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Path to a composed system-prompt file, when the project runs with
    /// the structured methodology.
    pub system_prompt_file: Option<PathBuf>,
    pub model: Option<String>,
    pub permissions: Option<String>,
}

/// Knows how to launch, read, and message one kind of coding agent.
pub trait Agent: Send + Sync {
    /// Registry name of this agent.
    fn name(&self) -> &str;

    /// The argv to hand to the runtime plugin. Never a shell string.
    fn build_launch_command(&self, opts: &LaunchOptions) -> Vec<String>;

    /// Classifies a terminal tail into an activity state.
    fn detect_activity(&self, terminal_tail: &str) -> ActivityState;

    /// True while the agent process itself (not just its terminal) runs.
    fn is_process_running(&self, handle: &str) -> bool;

    /// Delivers a message to the agent. The agent owns the transport;
    /// the default types the message into the runtime terminal.
    fn deliver(&self, runtime: &dyn Runtime, handle: &str, message: &str) -> Result<()> {
        runtime.send(handle, message)
    }

    /// Installs in-workspace glue after launch (for claude-code, the
    /// tool-use hook that writes facts back into the session's metadata
    /// file).
    fn post_launch_setup(
        &self,
        workspace: &Path,
        session_id: &str,
        metadata_file: &Path,
    ) -> Result<()>;
}
