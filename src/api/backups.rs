use std::path::Path as FsPath;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::backup::{self, s3::S3Target};
use crate::db::repo;
use crate::error::{Error, Result};
use crate::ssh::SshSession;

use super::AppState;

async fn connect(core: &AppState, server_id: i64) -> Result<(crate::db::models::Server, SshSession)> {
    let server = repo::get_server(&core.pool, server_id).await?;
    let session = SshSession::connect(
        &server.ssh_user,
        &server.host_address,
        Some(server.ssh_port as u16),
        server.ssh_key_path.as_deref().map(FsPath::new),
    )
    .await?;
    Ok((server, session))
}

fn backup_dir(core: &AppState) -> String {
    format!("{}/backups", core.config.remote_base_dir)
}

pub async fn list(State(core): State<AppState>, Path(app_id): Path<i64>) -> Result<impl IntoResponse> {
    let app = repo::get_app(&core.pool, app_id).await?;
    let (_, session) = connect(&core, app.server_id).await?;
    let backups = backup::list_backups(&session, &backup_dir(&core), &app.name).await?;
    session.close().await.ok();
    Ok(Json(backups))
}

pub async fn trigger(State(core): State<AppState>, Path(app_id): Path<i64>) -> Result<impl IntoResponse> {
    let app = repo::get_app(&core.pool, app_id).await?;
    let (_, session) = connect(&core, app.server_id).await?;
    let remote_path = backup::backup_database(&session, &app, &backup_dir(&core)).await?;

    if let Some(store) = repo::get_object_store_config(&core.pool).await? {
        let secret_key = crate::secrets::store::decrypt(store.secret_key_encrypted.as_bytes(), &core.identity)?;
        let target = S3Target {
            endpoint: &store.endpoint,
            bucket: &store.bucket,
            region: &store.region,
            access_key: &store.access_key,
            secret_key: &secret_key,
            prefix: store.key_prefix.as_deref().unwrap_or(""),
        };
        crate::backup::s3::upload_backup_to_s3(&session, &remote_path, &target, &app.name).await?;
    }
    session.close().await.ok();

    let webhooks = repo::list_webhooks(&core.pool).await?;
    crate::webhooks::fire(&core.http_client, &webhooks, "backup.complete", json!({"app": app.name, "path": remote_path})).await;

    Ok(Json(json!({"path": remote_path})))
}

#[derive(Debug, Deserialize)]
pub struct RestorePath {
    pub app_id: i64,
    pub name: String,
}

pub async fn restore(State(core): State<AppState>, Path(params): Path<RestorePath>) -> Result<impl IntoResponse> {
    let app = repo::get_app(&core.pool, params.app_id).await?;
    let (_, session) = connect(&core, app.server_id).await?;
    let remote_path = format!("{}/{}", backup_dir(&core), params.name);
    backup::restore_database(&session, &app, &remote_path).await?;
    session.close().await.ok();

    let webhooks = repo::list_webhooks(&core.pool).await?;
    crate::webhooks::fire(&core.http_client, &webhooks, "backup.restore", json!({"app": app.name, "path": remote_path})).await;

    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub cron: String,
    #[serde(default = "default_retention")]
    pub retention_days: i64,
}

fn default_retention() -> i64 {
    7
}

pub async fn install_schedule(
    State(core): State<AppState>,
    Path(app_id): Path<i64>,
    Json(body): Json<ScheduleRequest>,
) -> Result<impl IntoResponse> {
    crate::config::validate::cron(&body.cron).map_err(|e| Error::Validation(e.to_string()))?;
    let app = repo::get_app(&core.pool, app_id).await?;
    let (_, session) = connect(&core, app.server_id).await?;
    backup::install_backup_cron(&session, &app, &backup_dir(&core), &body.cron, body.retention_days).await?;
    session.close().await.ok();
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn remove_schedule(State(core): State<AppState>, Path(app_id): Path<i64>) -> Result<impl IntoResponse> {
    let app = repo::get_app(&core.pool, app_id).await?;
    let (_, session) = connect(&core, app.server_id).await?;
    backup::remove_backup_cron(&session, &app, &backup_dir(&core)).await?;
    session.close().await.ok();
    Ok(axum::http::StatusCode::NO_CONTENT)
}
