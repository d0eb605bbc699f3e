//! The SCM slot: pull request, CI, and review probes.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{CiStatus, PrState, ReviewDecision};

/// Probes pull request state on the source-code host.
#[async_trait]
pub trait Scm: Send + Sync {
    /// Registry name of this SCM.
    fn name(&self) -> &str;

    async fn pr_state(&self, pr_url: &str) -> Result<PrState>;

    async fn ci_summary(&self, pr_url: &str) -> Result<CiStatus>;

    async fn review_decision(&self, pr_url: &str) -> Result<ReviewDecision>;

    async fn mergeability(&self, pr_url: &str) -> Result<bool>;
}
