//! Shared value types exchanged across plugin boundaries.

use serde::{Deserialize, Serialize};

/// An issue as seen by a tracker plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Issue {
    /// Provider-native identifier.
    pub id: String,
    /// Issue number, when the provider has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub state: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub assignees: Vec<String>,
    pub url: String,
}

/// Pull request state as reported by the SCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    Open,
    Merged,
    Closed,
}

/// CI rollup for a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    Passing,
    Failing,
    Pending,
    /// No checks configured.
    None,
}

/// Review rollup for a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Pending,
    Approved,
    ChangesRequested,
}

/// What the agent plugin reads off a terminal tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    /// Output is moving; the agent is doing something.
    Active,
    /// The agent sits at its prompt with nothing pending.
    Idle,
    /// The agent asked a question and is waiting for a human.
    WaitingInput,
    /// The agent hit something it cannot get past (rate limit, login).
    Blocked,
    /// The agent just started and is ready for its first instruction.
    Ready,
}
