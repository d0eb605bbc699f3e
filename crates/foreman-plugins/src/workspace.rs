//! The workspace slot: isolated checkouts for agents.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Inputs for creating a workspace.
#[derive(Debug, Clone)]
pub struct WorkspaceRequest {
    /// Root of the project's primary checkout.
    pub project_path: PathBuf,
    /// Branch the workspace is cut from.
    pub default_branch: String,
    /// Branch the workspace checks out (created if absent).
    pub branch: String,
    pub session_id: String,
}

/// Creates and destroys isolated checkouts (typically git worktrees).
pub trait Workspace: Send + Sync {
    /// Registry name of this workspace plugin.
    fn name(&self) -> &str;

    /// Creates the workspace and returns its path.
    fn create(&self, req: &WorkspaceRequest) -> Result<PathBuf>;

    /// Removes the workspace. Must be safe to call on a half-created or
    /// already-removed path.
    fn destroy(&self, path: &Path) -> Result<()>;
}
