//! Built-in plugin implementations.
//!
//! These cover the slots foreman can serve locally: the claude-code agent
//! launcher, git-worktree workspaces, and a log-based notifier. Runtime
//! lives in its own crate (`foreman-tmux`); tracker and SCM integrations
//! are expected to come from external plugins.

mod claude;
mod log_notifier;
mod worktree;

pub use claude::ClaudeCodeAgent;
pub use log_notifier::LogNotifier;
pub use worktree::GitWorktreeWorkspace;
