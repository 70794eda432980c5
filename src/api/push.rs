//! Push-Webhook Ingest: receives a GitHub-style push event and triggers a
//! deploy for the first matching, auto-deploy-enabled app. Distinct from
//! `crate::webhooks`, which only *sends* outbound notifications — this
//! handler only receives. Authenticated per-app by an HMAC secret rather
//! than `X-API-Key`, since the caller here is GitHub, not an operator.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::auth;
use crate::db::repo;

use super::{deploys, AppState};

#[derive(Debug, Deserialize)]
struct Repository {
    clone_url: String,
}

#[derive(Debug, Deserialize)]
struct PushEvent {
    #[serde(rename = "ref")]
    git_ref: String,
    repository: Repository,
    after: Option<String>,
}

/// Always returns 200 once the signature is checked — a subscriber must
/// never learn, from the response code, whether a repo+branch match
/// existed, to avoid leaking which apps are wired to which repos.
///
/// Dispatch is driven by `X-GitHub-Event`, not by whether the body happens
/// to parse as a push payload: a `ping` event has a different shape
/// entirely and must hit the unconditional pong fast path rather than
/// fall through to "ignored: not a push event".
pub async fn ingest(State(core): State<AppState>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let event_type = headers.get("x-github-event").and_then(|v| v.to_str().ok()).unwrap_or("");

    if event_type == "ping" {
        return (StatusCode::OK, Json(json!({"message": "pong"})));
    }
    if event_type != "push" {
        return (StatusCode::OK, Json(json!({"message": "ignored: not a push event"})));
    }

    let event: PushEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(_) => return (StatusCode::OK, Json(json!({"message": "ignored: not a push event"}))),
    };

    let Some(branch) = event.git_ref.strip_prefix("refs/heads/") else {
        return (StatusCode::OK, Json(json!({"message": "ignored: not a branch push"})));
    };

    let signature = headers.get("x-hub-signature-256").and_then(|v| v.to_str().ok());

    let candidates = match repo::list_apps_by_repo_branch(&core.pool, &event.repository.clone_url, branch).await {
        Ok(apps) => apps,
        Err(_) => return (StatusCode::OK, Json(json!({"message": "ignored: lookup failed"}))),
    };

    for app in candidates {
        if !app.auto_deploy {
            continue;
        }
        let Some(secret) = &app.webhook_secret else { continue };
        let Some(signature) = signature else { continue };
        if !auth::verify_signature(secret, &body, signature) {
            continue;
        }

        let deploy_request = deploys::DeployRequest { commit: event.after.clone(), image: None };
        let core = core.clone();
        let app_id = app.id;
        tokio::spawn(async move {
            if let Err(e) = deploys::deploy_app(core, app_id, deploy_request).await {
                tracing::warn!(app_id, error = %e, "push-triggered deploy failed");
            }
        });
        return (StatusCode::OK, Json(json!({"message": "deploy triggered"})));
    }

    (StatusCode::OK, Json(json!({"message": "ignored: no matching app"})))
}
