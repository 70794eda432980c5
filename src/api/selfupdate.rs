//! Self-update ingest: an optional, process-wide-secret-authenticated route
//! that lets a release pipeline tell a running control plane to pull and
//! restart its own container. Distinct from both the Push-Webhook Ingest
//! (`crate::api::push`, which triggers *app* deploys) and the outbound
//! sender (`crate::webhooks`, which only sends) — this is the one place
//! the control plane deploys itself.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;

use crate::auth;

use super::AppState;

/// Verifies `X-Hub-Signature-256` against `self_update_webhook_secret` and,
/// on match, pulls and recreates the control plane's own compose project
/// in the background. Runs locally via `std::process::Command` rather than
/// over SSH — the target here is the host this process itself runs on.
pub async fn ingest(State(core): State<AppState>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let Some(secret) = core.config.self_update_webhook_secret.as_deref() else {
        return (StatusCode::NOT_FOUND, "self-update is not configured");
    };
    let Some(signature) = headers.get("x-hub-signature-256").and_then(|v| v.to_str().ok()) else {
        return (StatusCode::UNAUTHORIZED, "missing signature");
    };
    if !auth::verify_signature(secret, &body, signature) {
        return (StatusCode::FORBIDDEN, "invalid signature");
    }

    let Some(compose_file) = core.config.self_update_compose_file.clone() else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "no compose file configured for self-update");
    };
    let image = core.config.release_image.clone();

    tokio::spawn(async move {
        if let Err(e) = run_self_update(&compose_file, &image).await {
            tracing::error!(error = %e, "self-update failed");
        }
    });

    (StatusCode::ACCEPTED, "self-update scheduled")
}

async fn run_self_update(compose_file: &str, image: &str) -> anyhow::Result<()> {
    tracing::info!(image, compose_file, "pulling release image for self-update");
    let pull = tokio::process::Command::new("docker")
        .args(["compose", "-f", compose_file, "pull"])
        .env("DOCKHAND_RELEASE_IMAGE", image)
        .status()
        .await?;
    anyhow::ensure!(pull.success(), "docker compose pull exited with {pull}");

    let up = tokio::process::Command::new("docker")
        .args(["compose", "-f", compose_file, "up", "-d", "--remove-orphans"])
        .env("DOCKHAND_RELEASE_IMAGE", image)
        .status()
        .await?;
    anyhow::ensure!(up.success(), "docker compose up exited with {up}");
    Ok(())
}
