use std::path::Path as FsPath;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::db::models::{AppStatus, AppTypeKind, DbEngine, DeployStrategy};
use crate::db::repo;
use crate::error::Result;
use crate::reconcile;
use crate::secrets::store;
use crate::ssh::SshSession;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct ListAppsQuery {
    pub server_id: Option<i64>,
}

pub async fn list(State(core): State<AppState>, Query(query): Query<ListAppsQuery>) -> Result<impl IntoResponse> {
    Ok(Json(repo::list_apps(&core.pool, query.server_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateAppRequest {
    pub server_id: i64,
    pub name: String,
    pub domain: Option<String>,
    pub container_port: Option<i64>,
    pub source_repo: Option<String>,
    pub branch: Option<String>,
    pub image: Option<String>,
    pub compose_manifest: Option<String>,
    pub app_type: AppTypeKind,
    pub db_engine: Option<DbEngine>,
    #[serde(default)]
    pub auto_deploy: bool,
    #[serde(default = "default_strategy")]
    pub deploy_strategy: DeployStrategy,
}

fn default_strategy() -> DeployStrategy {
    DeployStrategy::Restart
}

pub async fn create(State(core): State<AppState>, Json(body): Json<CreateAppRequest>) -> Result<impl IntoResponse> {
    let app = repo::create_app(
        &core.pool,
        body.server_id,
        &body.name,
        body.domain.as_deref(),
        body.container_port,
        body.source_repo.as_deref(),
        body.branch.as_deref(),
        body.image.as_deref(),
        body.compose_manifest.as_deref(),
        body.app_type,
        body.db_engine,
        body.auto_deploy,
        body.deploy_strategy,
    )
    .await?;
    Ok(Json(app))
}

pub async fn get(State(core): State<AppState>, Path(id): Path<i64>) -> Result<impl IntoResponse> {
    Ok(Json(repo::get_app(&core.pool, id).await?))
}

pub async fn delete(State(core): State<AppState>, Path(id): Path<i64>) -> Result<impl IntoResponse> {
    delete_app_and_route(&core, id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// Removes the app's proxy route (if it has a domain) before deleting the
/// row — best-effort: a server that's unreachable, or a route file already
/// gone, must not block the app record itself from being removed. Shared
/// by the HTTP handler above and the CLI's `app remove` so both destroy
/// paths behave identically.
pub async fn delete_app_and_route(core: &AppState, id: i64) -> Result<()> {
    let app = repo::get_app(&core.pool, id).await?;
    if let Some(domain) = &app.domain {
        if let Err(e) = remove_proxy_route(core, &app, domain).await {
            tracing::warn!(app_id = id, error = %e, "failed to remove proxy route before app delete");
        }
    }
    repo::delete_app(&core.pool, id).await?;
    Ok(())
}

async fn remove_proxy_route(core: &AppState, app: &crate::db::models::App, domain: &str) -> anyhow::Result<()> {
    let server = repo::get_server(&core.pool, app.server_id).await?;
    let session = SshSession::connect(
        &server.ssh_user,
        &server.host_address,
        Some(server.ssh_port as u16),
        server.ssh_key_path.as_deref().map(FsPath::new),
    )
    .await?;
    crate::proxy::remove_domain(&session, &core.config.remote_base_dir, domain).await?;
    session.close().await.ok();
    Ok(())
}

#[derive(serde::Serialize)]
pub struct AppStatusResponse {
    pub status: AppStatus,
    pub containers: Vec<reconcile::ContainerState>,
    pub health_check: Option<reconcile::HealthCheck>,
}

/// Connects to the app's server and derives live status from container
/// state, persisting it back onto the `apps` row so the next plain `get`
/// reflects reality without needing a fresh reconcile. When the app has a
/// health-check URL configured, also runs the separate HTTP health probe
/// against its declared port so a caller can see both views at once.
pub async fn status(State(core): State<AppState>, Path(id): Path<i64>) -> Result<impl IntoResponse> {
    let app = repo::get_app(&core.pool, id).await?;
    let server = repo::get_server(&core.pool, app.server_id).await?;
    let session = SshSession::connect(
        &server.ssh_user,
        &server.host_address,
        Some(server.ssh_port as u16),
        server.ssh_key_path.as_deref().map(FsPath::new),
    )
    .await?;

    let app_dir = format!("{}/apps/{}", core.config.remote_base_dir, app.name);
    let containers = reconcile::container_states(&session, &app_dir).await?;
    let status = reconcile::reconcile_status(&containers);

    let health_check = match (&app.health_check_url, app.container_port) {
        (Some(path), Some(port)) => {
            reconcile::check_app_health(&session, port as u16, path).await.ok()
        }
        _ => None,
    };

    session.close().await.ok();

    repo::set_app_status(&core.pool, id, status).await?;
    Ok(Json(AppStatusResponse { status, containers, health_check }))
}

pub async fn get_env(State(core): State<AppState>, Path(id): Path<i64>) -> Result<impl IntoResponse> {
    let _ = repo::get_app(&core.pool, id).await?;
    let env = store::read_env(&core.home, id, &core.identity)?;
    Ok(Json(env))
}

pub async fn put_env(
    State(core): State<AppState>,
    Path(id): Path<i64>,
    Json(env): Json<store::EnvMap>,
) -> Result<impl IntoResponse> {
    let _ = repo::get_app(&core.pool, id).await?;
    store::write_env(&core.home, id, &env, &core.identity)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
