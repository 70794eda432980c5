use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::db::repo;
use crate::error::{Error, Result};
use crate::provision;
use crate::ssh::SshSession;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateServerRequest {
    pub name: String,
    pub host_address: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: i64,
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    pub ssh_key_path: Option<String>,
    pub provider: Option<String>,
}

fn default_ssh_port() -> i64 {
    22
}
fn default_ssh_user() -> String {
    "root".to_string()
}

pub async fn list(State(core): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(repo::list_servers(&core.pool).await?))
}

pub async fn create(State(core): State<AppState>, Json(body): Json<CreateServerRequest>) -> Result<impl IntoResponse> {
    let server = repo::create_server(
        &core.pool,
        &body.name,
        &body.host_address,
        body.ssh_port,
        &body.ssh_user,
        body.ssh_key_path.as_deref(),
        body.provider.as_deref(),
    )
    .await?;
    Ok(Json(server))
}

pub async fn get(State(core): State<AppState>, Path(id): Path<i64>) -> Result<impl IntoResponse> {
    Ok(Json(repo::get_server(&core.pool, id).await?))
}

pub async fn delete(State(core): State<AppState>, Path(id): Path<i64>) -> Result<impl IntoResponse> {
    repo::delete_server(&core.pool, id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ProvisionRequest {
    pub acme_email: String,
}

/// Runs synchronously — provisioning is an operator-initiated, one-shot
/// action expected to take minutes, not a request an HTTP client is
/// expected to poll for. Progress is mirrored onto the log broadcaster
/// under the negative of the server id, a key space `deployments` (whose
/// ids are always positive) never occupies.
pub async fn provision(
    State(core): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<ProvisionRequest>,
) -> Result<impl IntoResponse> {
    let server = repo::get_server(&core.pool, id).await?;
    repo::set_server_status(&core.pool, id, crate::db::models::ServerStatus::Provisioning).await?;

    let broadcast_id = -id;
    core.broadcaster.register(broadcast_id).await;

    let session = SshSession::connect(
        &server.ssh_user,
        &server.host_address,
        Some(server.ssh_port as u16),
        server.ssh_key_path.as_deref().map(std::path::Path::new),
    )
    .await
    .map_err(|e| Error::Remote(e.to_string()))?;

    let broadcaster = core.broadcaster.clone();
    let result = provision::provision_server(&session, &body.acme_email, |step| {
        let line = format!("[{}/{}] {}", step.index + 1, step.total, step.name);
        let broadcaster = broadcaster.clone();
        tokio::spawn(async move {
            broadcaster.publish(broadcast_id, line).await;
        });
    })
    .await;
    session.close().await.ok();

    core.broadcaster.finish(broadcast_id).await;
    core.broadcaster.schedule_cleanup(broadcast_id);

    match result {
        Ok(()) => {
            repo::set_server_status(&core.pool, id, crate::db::models::ServerStatus::Active).await?;
            Ok(Json(repo::get_server(&core.pool, id).await?))
        }
        Err(e) => {
            repo::set_server_status(&core.pool, id, crate::db::models::ServerStatus::Error).await?;
            Err(Error::Remote(e.to_string()))
        }
    }
}

pub async fn wipe(State(core): State<AppState>, Path(id): Path<i64>) -> Result<impl IntoResponse> {
    let server = repo::get_server(&core.pool, id).await?;
    let session = SshSession::connect(
        &server.ssh_user,
        &server.host_address,
        Some(server.ssh_port as u16),
        server.ssh_key_path.as_deref().map(std::path::Path::new),
    )
    .await
    .map_err(|e| Error::Remote(e.to_string()))?;

    provision::wipe_server(&session, |_| {}).await.map_err(|e| Error::Remote(e.to_string()))?;
    session.close().await.ok();

    repo::set_server_status(&core.pool, id, crate::db::models::ServerStatus::Inactive).await?;
    Ok(Json(repo::get_server(&core.pool, id).await?))
}
