//! Webhook endpoint handlers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use tracing::{debug, info, warn};

use foreman_config::TriggerAction;
use foreman_models::{TriggerEvent, TriggerEventKind};
use foreman_plugins::IssueUpdate;
use foreman_session::SpawnRequest;
use foreman_trigger::SpawnDecision;

use crate::normalize;
use crate::resume::gate_resume;
use crate::signature::verify_signature;
use crate::state::AppState;

/// POST /api/webhooks/github
pub async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(signature) = header(&headers, "x-hub-signature-256")
        .and_then(|v| v.strip_prefix("sha256=").map(String::from))
    else {
        return StatusCode::UNAUTHORIZED;
    };

    let secrets: Vec<String> = state
        .config
        .projects
        .values()
        .filter_map(|p| p.webhooks.github.as_ref().map(|w| w.secret.clone()))
        .collect();
    if !secrets
        .iter()
        .any(|secret| verify_signature(secret, &body, &signature))
    {
        return StatusCode::UNAUTHORIZED;
    }

    // JSON is parsed only after the signature checks out.
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "unparseable github payload");
            return StatusCode::BAD_REQUEST;
        }
    };

    let event_type = header(&headers, "x-github-event").unwrap_or_default();
    let delivery = header(&headers, "x-github-delivery").unwrap_or_default();
    match normalize::github_event(&event_type, &delivery, &payload) {
        Some(event) => dispatch(&state, event).await,
        None => debug!(event = %event_type, "github delivery not relevant, skipping"),
    }
    StatusCode::OK
}

/// POST /api/webhooks/plane
pub async fn plane_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(signature) = header(&headers, "x-plane-signature") else {
        return StatusCode::UNAUTHORIZED;
    };

    let secrets: Vec<String> = state
        .config
        .projects
        .values()
        .filter_map(|p| p.webhooks.plane.as_ref().map(|w| w.secret.clone()))
        .collect();
    if !secrets
        .iter()
        .any(|secret| verify_signature(secret, &body, &signature))
    {
        return StatusCode::UNAUTHORIZED;
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "unparseable plane payload");
            return StatusCode::BAD_REQUEST;
        }
    };

    let delivery = header(&headers, "x-plane-delivery").unwrap_or_default();
    match normalize::plane_event(&delivery, &payload) {
        Some(event) => dispatch(&state, event).await,
        None => debug!("plane delivery not relevant, skipping"),
    }
    StatusCode::OK
}

/// GET /api/health
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Routes a normalized event. Errors are logged, never surfaced: a
/// signature-verified delivery always gets 200.
async fn dispatch(state: &AppState, event: TriggerEvent) {
    if event.event == TriggerEventKind::IssueComment {
        gate_resume(state, &event).await;
        return;
    }

    let manager = state.manager.clone();
    let sessions = match tokio::task::spawn_blocking(move || manager.list(None)).await {
        Ok(Ok(sessions)) => sessions,
        other => {
            warn!(?other, "session list failed during dispatch");
            return;
        }
    };

    let Some(decision) = state.trigger.evaluate(&event, &state.config, &sessions) else {
        debug!(delivery = %event.delivery_id, "no trigger matched");
        return;
    };

    match decision.action {
        TriggerAction::Spawn => {
            match state
                .manager
                .spawn(SpawnRequest {
                    project_id: decision.project_id.clone(),
                    issue_id: Some(decision.issue_id.clone()),
                    prompt: None,
                    branch: None,
                })
                .await
            {
                Ok(session) => {
                    info!(session = %session.id, issue = %decision.issue_id, "spawned from webhook");
                    confirm_action(
                        state,
                        &decision,
                        format!("🤖 spawned session `{}` for this issue", session.id),
                    );
                }
                Err(e) => {
                    warn!(issue = %decision.issue_id, error = %e, "webhook spawn failed");
                }
            }
        }
        TriggerAction::ResumeSession => {
            let Some(session_id) = decision.resume_session.clone() else {
                return;
            };
            match state.manager.restore(&session_id).await {
                Ok(session) => {
                    info!(session = %session.id, issue = %decision.issue_id, "resumed from webhook");
                    confirm_action(
                        state,
                        &decision,
                        format!("🔁 resumed session `{}` for this issue", session.id),
                    );
                }
                Err(e) => {
                    warn!(session = %session_id, error = %e, "webhook resume failed");
                }
            }
        }
    }
}

/// Fire-and-forget tracker comment confirming what the trigger did.
fn confirm_action(state: &AppState, decision: &SpawnDecision, comment: String) {
    let tracker = state
        .config
        .projects
        .get(&decision.project_id)
        .and_then(|p| p.tracker.as_ref())
        .and_then(|t| state.registry.tracker(&t.plugin));
    let Some(tracker) = tracker else {
        return;
    };

    let issue = decision.issue_id.clone();
    tokio::spawn(async move {
        if let Err(e) = tracker.update_issue(&issue, IssueUpdate::comment(comment)).await {
            warn!(issue = %issue, error = %e, "trigger confirmation comment failed");
        }
    });
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}
