//! foreman: a single coordinator supervising fleets of AI coding agents.

mod bootstrap;
mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use foreman_api::AppState;
use foreman_lifecycle::LifecycleManager;
use foreman_models::Session;
use foreman_session::SpawnRequest;
use foreman_trigger::TriggerEngine;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let app = bootstrap::build(&cli.config)?;

    match cli.command {
        Command::Spawn {
            project,
            issue,
            prompt,
            branch,
        } => {
            let session = app
                .manager
                .spawn(SpawnRequest {
                    project_id: project,
                    issue_id: issue,
                    prompt,
                    branch,
                })
                .await?;
            println!("spawned {}", session.id);
        }

        Command::Start { bind } => {
            let lifecycle = Arc::new(LifecycleManager::new(
                app.config.clone(),
                app.store.clone(),
                app.registry.clone(),
                app.manager.clone(),
            ));
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let poller = tokio::spawn(lifecycle.run(shutdown_rx));

            let state = AppState::new(
                app.config.clone(),
                app.manager.clone(),
                Arc::new(TriggerEngine::new()),
                app.registry.clone(),
            );
            let server = tokio::spawn(async move {
                if let Err(e) = foreman_api::serve(&bind, state).await {
                    tracing::error!(error = %e, "webhook server exited");
                }
            });

            tokio::signal::ctrl_c()
                .await
                .context("waiting for ctrl-c")?;
            info!("shutting down");
            let _ = shutdown_tx.send(true);
            let _ = poller.await;
            server.abort();
        }

        Command::Status { project } => {
            let sessions = app.manager.list(project.as_deref())?;
            if sessions.is_empty() {
                println!("no sessions");
            }
            for session in sessions {
                println!("{}", format_session_line(&session));
            }
        }

        Command::Session { id } => {
            let session = app.manager.get(&id)?;
            let mut keys: Vec<&String> = session.metadata.keys().collect();
            keys.sort();
            for key in keys {
                println!("{key}={}", session.metadata[key]);
            }
        }

        Command::Send { id, message } => {
            app.manager.send(&id, &message)?;
            println!("sent to {id}");
        }

        Command::Kill { id } => {
            app.manager.kill(&id)?;
            println!("killed {id}");
        }

        Command::Restore { id } => {
            let session = app.manager.restore(&id).await?;
            println!(
                "restored {} (handle {})",
                session.id,
                session.runtime_handle.as_deref().unwrap_or("-")
            );
        }

        Command::BatchSpawn { project, issues } => {
            for issue in issues {
                match app
                    .manager
                    .spawn(SpawnRequest {
                        project_id: project.clone(),
                        issue_id: Some(issue.clone()),
                        ..Default::default()
                    })
                    .await
                {
                    Ok(session) => println!("spawned {} for {issue}", session.id),
                    Err(e) => eprintln!("failed to spawn for {issue}: {e}"),
                }
            }
        }

        Command::Cleanup { max_age_hours } => {
            let cleaned = app
                .manager
                .cleanup(Duration::from_secs(max_age_hours * 3600))?;
            println!("archived {} session(s)", cleaned.len());
            for id in cleaned {
                println!("  {id}");
            }
        }
    }

    Ok(())
}

fn format_session_line(session: &Session) -> String {
    format!(
        "{:<12} {:<18} {:<24} {}",
        session.id,
        session.status,
        session.branch.as_deref().unwrap_or("-"),
        session.issue_id.as_deref().unwrap_or("-"),
    )
}
