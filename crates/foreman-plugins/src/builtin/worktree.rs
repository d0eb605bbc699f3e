//! Git worktree workspaces.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use crate::error::{PluginError, Result};
use crate::workspace::{Workspace, WorkspaceRequest};

/// Workspace plugin backed by `git worktree`, one worktree per session in
/// a `<project>-worktrees` directory next to the primary checkout.
pub struct GitWorktreeWorkspace;

impl GitWorktreeWorkspace {
    pub fn new() -> Self {
        Self
    }

    fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("git").arg("-C").arg(dir).args(args).output()?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(PluginError::CommandFailed(format!(
                "git {}: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn branch_exists(repo: &Path, branch: &str) -> bool {
        Self::run_git(
            repo,
            &["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")],
        )
        .is_ok()
    }

    fn worktrees_dir(project_path: &Path) -> PathBuf {
        let name = project_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string());
        project_path
            .parent()
            .unwrap_or(project_path)
            .join(format!("{name}-worktrees"))
    }
}

impl Default for GitWorktreeWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Workspace for GitWorktreeWorkspace {
    fn name(&self) -> &str {
        "worktree"
    }

    fn create(&self, req: &WorkspaceRequest) -> Result<PathBuf> {
        let path = Self::worktrees_dir(&req.project_path).join(&req.session_id);
        if path.exists() {
            return Err(PluginError::CommandFailed(format!(
                "workspace path already exists: {}",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let path_str = path.display().to_string();
        if Self::branch_exists(&req.project_path, &req.branch) {
            Self::run_git(&req.project_path, &["worktree", "add", &path_str, &req.branch])?;
        } else {
            Self::run_git(
                &req.project_path,
                &[
                    "worktree",
                    "add",
                    "-b",
                    &req.branch,
                    &path_str,
                    &req.default_branch,
                ],
            )?;
        }

        debug!(
            session = %req.session_id,
            path = %path.display(),
            branch = %req.branch,
            "created worktree"
        );
        Ok(path)
    }

    fn destroy(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }

        // `worktree remove` must run from the main checkout; resolve it
        // through the worktree's common git dir.
        let main_repo = Self::run_git(
            path,
            &["rev-parse", "--path-format=absolute", "--git-common-dir"],
        )
        .ok()
        .map(PathBuf::from)
        .and_then(|git_dir| git_dir.parent().map(Path::to_path_buf));

        if let Some(main_repo) = main_repo {
            let path_str = path.display().to_string();
            match Self::run_git(&main_repo, &["worktree", "remove", "--force", &path_str]) {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "worktree remove failed, falling back to rm");
                    fs::remove_dir_all(path)?;
                    let _ = Self::run_git(&main_repo, &["worktree", "prune"]);
                    return Ok(());
                }
            }
        }

        // Not a recognizable worktree; remove the directory alone.
        fs::remove_dir_all(path)?;
        Ok(())
    }
}
