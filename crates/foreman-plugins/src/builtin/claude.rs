//! The claude-code agent plugin.

use std::fs;
use std::path::Path;
use std::process::Command;

use tracing::{debug, trace};

use crate::agent::{Agent, LaunchOptions};
use crate::error::{PluginError, Result};
use crate::patterns::{self, claude_code};
use crate::types::ActivityState;

/// Shell names that mean "nothing but the shell runs in this pane".
const SHELLS: &[&str] = &["bash", "zsh", "sh", "fish", "dash"];

/// Agent plugin for the `claude` CLI running inside a tmux pane.
pub struct ClaudeCodeAgent;

impl ClaudeCodeAgent {
    pub fn new() -> Self {
        Self
    }

    /// Renders the tool-use hook script that writes facts back into this
    /// session's metadata file.
    fn hook_script(metadata_file: &Path) -> String {
        format!(
            r#"#!/bin/sh
# Post-tool hook: records session facts into the orchestrator's metadata file.
META="{meta}"

append_meta() {{
    key="$1"; value="$2"
    tmp=$(mktemp "${{META%/*}}/.sync.XXXXXX") || exit 0
    {{ grep -v "^${{key}}=" "$META" 2>/dev/null; printf '%s=%s\n' "$key" "$value"; }} > "$tmp" \
        && mv "$tmp" "$META"
}}

payload=$(cat)

case "$payload" in
*"gh pr create"*)
    url=$(printf '%s' "$payload" | grep -oE 'https://[^"[:space:]]*/pull/[0-9]+' | head -n1)
    [ -n "$url" ] && append_meta pr "$url"
    ;;
*"gh pr merge"*)
    append_meta status merged
    ;;
*"git checkout -b"*|*"git switch -c"*)
    branch=$(printf '%s' "$payload" | sed -n 's/.*\(checkout -b\|switch -c\) \([^"[:space:]]*\).*/\2/p' | head -n1)
    [ -n "$branch" ] && append_meta branch "$branch"
    ;;
esac

ws=$(pwd)
cur=$(sed -n 's/^prpPhase=//p' "$META" | head -n1)
if [ -d "$ws/.claude/PRPs/plans" ] && ls "$ws/.claude/PRPs/plans"/*.plan.md >/dev/null 2>&1; then
    case "$cur" in
    planning_complete|plan_gate|implementing) ;;
    *) append_meta prpPhase planning_complete ;;
    esac
elif [ -d "$ws/.claude/PRPs/investigations" ] && [ -z "$cur" ]; then
    append_meta prpPhase investigating
fi

exit 0
"#,
            meta = metadata_file.display()
        )
    }
}

impl Default for ClaudeCodeAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl Agent for ClaudeCodeAgent {
    fn name(&self) -> &str {
        "claude-code"
    }

    fn build_launch_command(&self, opts: &LaunchOptions) -> Vec<String> {
        let mut argv = vec!["claude".to_string()];
        if let Some(model) = &opts.model {
            argv.push("--model".to_string());
            argv.push(model.clone());
        }
        if let Some(permissions) = &opts.permissions {
            argv.push("--permission-mode".to_string());
            argv.push(permissions.clone());
        }
        if let Some(file) = &opts.system_prompt_file {
            argv.push("--append-system-prompt-file".to_string());
            argv.push(file.display().to_string());
        }
        argv
    }

    fn detect_activity(&self, terminal_tail: &str) -> ActivityState {
        // Only the recent tail matters; old questions scrolled past are
        // not the current state.
        let recent: String = {
            let lines: Vec<&str> = terminal_tail.lines().collect();
            let start = lines.len().saturating_sub(30);
            lines[start..].join("\n")
        };

        if patterns::any_match(&recent, claude_code::waiting_patterns()) {
            return ActivityState::WaitingInput;
        }
        if let Some(hit) = patterns::first_match(&recent, claude_code::blocked_patterns()) {
            trace!(pattern = hit.name, "agent blocked");
            return ActivityState::Blocked;
        }
        if patterns::any_match(&recent, claude_code::active_patterns()) {
            return ActivityState::Active;
        }
        if patterns::any_match(&recent, claude_code::idle_patterns()) {
            return ActivityState::Idle;
        }
        if recent.trim().is_empty() {
            ActivityState::Ready
        } else {
            ActivityState::Active
        }
    }

    fn is_process_running(&self, handle: &str) -> bool {
        let output = Command::new("tmux")
            .args(["list-panes", "-t", handle, "-F", "#{pane_current_command}"])
            .output();

        match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
                .lines()
                .any(|cmd| !SHELLS.contains(&cmd.trim())),
            _ => false,
        }
    }

    fn post_launch_setup(
        &self,
        workspace: &Path,
        session_id: &str,
        metadata_file: &Path,
    ) -> Result<()> {
        let claude_dir = workspace.join(".claude");
        let hooks_dir = claude_dir.join("hooks");
        fs::create_dir_all(&hooks_dir)?;

        let script_path = hooks_dir.join("metadata-sync.sh");
        fs::write(&script_path, Self::hook_script(metadata_file))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;
        }

        let settings = serde_json::json!({
            "hooks": {
                "PostToolUse": [{
                    "matcher": "Bash",
                    "hooks": [{
                        "type": "command",
                        "command": script_path.display().to_string(),
                    }]
                }]
            }
        });
        let settings_path = claude_dir.join("settings.json");
        fs::write(&settings_path, serde_json::to_string_pretty(&settings).map_err(
            |e| PluginError::Parse(e.to_string()),
        )?)?;

        debug!(
            session = %session_id,
            workspace = %workspace.display(),
            "installed metadata-sync hook"
        );
        Ok(())
    }
}
