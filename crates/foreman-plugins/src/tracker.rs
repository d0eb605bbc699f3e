//! The tracker slot: the issue tracker the fleet reports to.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Issue;

/// A change to push to an issue.
#[derive(Debug, Clone, Default)]
pub struct IssueUpdate {
    pub comment: Option<String>,
    pub status: Option<String>,
}

impl IssueUpdate {
    pub fn comment(text: impl Into<String>) -> Self {
        Self {
            comment: Some(text.into()),
            status: None,
        }
    }
}

/// Talks to one issue tracker (GitHub issues, Plane, ...).
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Registry name of this tracker.
    fn name(&self) -> &str;

    async fn get_issue(&self, id: &str) -> Result<Issue>;

    async fn is_completed(&self, id: &str) -> Result<bool>;

    fn issue_url(&self, id: &str) -> String;

    /// Tracker-derived branch name for an issue, when the tracker has a
    /// convention for one.
    fn branch_name(&self, issue: &Issue) -> Option<String>;

    /// Issue context rendered for prompt composition (title, URL,
    /// description, labels).
    async fn generate_prompt(&self, id: &str) -> Result<String>;

    async fn update_issue(&self, id: &str, update: IssueUpdate) -> Result<()>;

    /// Maximum comment length this tracker accepts. The plan-gate comment
    /// is truncated to this; the default stays at 4000.
    fn comment_limit(&self) -> usize {
        4000
    }
}
