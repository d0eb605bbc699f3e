//! Command-line definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "foreman", version, about = "Supervise fleets of AI coding agents")]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "foreman.yaml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Spawn a session for an issue (or a free-form prompt).
    Spawn {
        /// Project key from the configuration.
        project: String,
        /// Issue id or URL.
        #[arg(long)]
        issue: Option<String>,
        /// Free-form prompt instead of tracker-derived context.
        #[arg(long)]
        prompt: Option<String>,
        /// Branch name override.
        #[arg(long)]
        branch: Option<String>,
    },

    /// Run the coordinator: webhook server plus lifecycle poller.
    Start {
        /// Address for the webhook endpoints.
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },

    /// List sessions and their statuses.
    Status {
        /// Limit to one project.
        #[arg(long)]
        project: Option<String>,
    },

    /// Show one session's full metadata.
    Session { id: String },

    /// Send a message to a session's agent.
    Send { id: String, message: String },

    /// Kill a session: stop the runtime, remove the workspace, archive.
    Kill { id: String },

    /// Recreate workspace and runtime for a dead session.
    Restore { id: String },

    /// Spawn one session per issue.
    BatchSpawn {
        project: String,
        /// Issue ids or URLs.
        #[arg(required = true)]
        issues: Vec<String>,
    },

    /// Archive terminal sessions older than the threshold.
    Cleanup {
        #[arg(long, default_value_t = 24)]
        max_age_hours: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_spawn() {
        let cli = Cli::try_parse_from([
            "foreman", "spawn", "app", "--issue", "42", "--branch", "feat/x",
        ])
        .unwrap();
        match cli.command {
            Command::Spawn {
                project,
                issue,
                branch,
                prompt,
            } => {
                assert_eq!(project, "app");
                assert_eq!(issue.as_deref(), Some("42"));
                assert_eq!(branch.as_deref(), Some("feat/x"));
                assert!(prompt.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_start_with_defaults() {
        let cli = Cli::try_parse_from(["foreman", "start"]).unwrap();
        match cli.command {
            Command::Start { bind } => assert_eq!(bind, "127.0.0.1:8080"),
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.config, PathBuf::from("foreman.yaml"));
    }

    #[test]
    fn batch_spawn_requires_issues() {
        assert!(Cli::try_parse_from(["foreman", "batch-spawn", "app"]).is_err());
        let cli =
            Cli::try_parse_from(["foreman", "batch-spawn", "app", "41", "42"]).unwrap();
        match cli.command {
            Command::BatchSpawn { issues, .. } => assert_eq!(issues, vec!["41", "42"]),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_config_flag() {
        let cli =
            Cli::try_parse_from(["foreman", "status", "--config", "/etc/foreman.yaml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/foreman.yaml"));
    }
}
