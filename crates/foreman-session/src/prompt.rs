//! Layered prompt composition.
//!
//! Prompts stack in a fixed order: the base role prompt, tracker-derived
//! issue context, then project-configured snippets. Projects running the
//! structured methodology additionally get a system-prompt file composed
//! from the lifecycle block, the issue-specific command list, and the
//! configured gate sections.

use foreman_config::PrpGates;
use foreman_plugins::Issue;

/// Base prompt establishing the agent's role.
pub const BASE_PROMPT: &str = "\
You are an autonomous coding agent working on a single tracker issue in an \
isolated workspace. Investigate the issue, implement a fix on your branch, \
keep the build and tests green, and open a pull request when the work is \
ready. Report anything you cannot resolve yourself by asking in the \
terminal.";

/// Fixed lifecycle block naming the five mandatory methodology steps.
pub const PRP_LIFECYCLE: &str = "\
## Methodology

Work through these five steps, in order, completing each before the next:

1. **Investigate** — read the issue and the relevant code; write your
   findings to `.claude/PRPs/investigations/`.
2. **Plan** — produce a concrete implementation plan as a `.plan.md` file
   under `.claude/PRPs/plans/`.
3. **Implement** — execute the plan with an autonomous validation loop:
   change, build, test, repeat until green.
4. **Pull request** — push the branch and open a PR referencing the issue.
5. **Self-review** — review your own diff as a skeptical reviewer and fix
   what you find before asking humans for review.";

/// Gate section appended when the project gates on plan approval.
pub const GATE_PLAN: &str = "\
## Plan gate

STOP after completing the plan. Do not start implementing. A human will
review the plan on the issue and reply with an approval comment; you will
receive a resume message when the plan is approved.";

/// Gate section appended when the project gates on PR creation.
pub const GATE_PR: &str = "\
## PR gate

STOP after opening the pull request. Do not merge or continue. A human
will review the PR and tell you how to proceed.";

/// Composes the agent prompt: base, then issue context, then project
/// snippets. Order matters; empty layers are skipped.
pub fn compose_prompt(issue_context: Option<&str>, extras: &[String]) -> String {
    let mut parts = vec![BASE_PROMPT.to_string()];
    if let Some(context) = issue_context {
        if !context.trim().is_empty() {
            parts.push(context.trim().to_string());
        }
    }
    for extra in extras {
        if !extra.trim().is_empty() {
            parts.push(extra.trim().to_string());
        }
    }
    parts.join("\n\n")
}

/// Composes the methodology system-prompt file for one issue.
pub fn compose_system_prompt(issue: &Issue, gates: &PrpGates) -> String {
    let mut sections = vec![PRP_LIFECYCLE.to_string()];

    let issue_ref = if issue.url.is_empty() {
        issue.id.clone()
    } else {
        issue.url.clone()
    };
    sections.push(format!(
        "## This issue\n\n\
         {title}\n\n\
         Run the methodology commands in this order:\n\n\
         1. `/prp-investigate {issue_ref}`\n\
         2. `/prp-plan {issue_ref}`\n\
         3. `/prp-implement {issue_ref}`\n\
         4. `/prp-pr {issue_ref}`\n\
         5. `/prp-review {issue_ref}`",
        title = issue.title,
    ));

    if gates.plan {
        sections.push(GATE_PLAN.to_string());
    }
    if gates.pr {
        sections.push(GATE_PR.to_string());
    }

    sections.join("\n\n")
}
