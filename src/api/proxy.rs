use std::path::Path as FsPath;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::db::repo;
use crate::error::{Error, Result};
use crate::proxy;
use crate::ssh::SshSession;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct DomainEntry {
    pub server: String,
    pub domain: String,
    pub port: u16,
}

/// Aggregates the Proxy Store across every server, skipping (and logging)
/// any that can't be reached rather than failing the whole listing — a
/// single down host must never hide the routes configured on the rest.
pub async fn list(State(core): State<AppState>) -> Result<impl IntoResponse> {
    let servers = repo::list_servers(&core.pool).await?;
    let mut out = Vec::new();
    for server in servers {
        let session = match SshSession::connect(
            &server.ssh_user,
            &server.host_address,
            Some(server.ssh_port as u16),
            server.ssh_key_path.as_deref().map(FsPath::new),
        )
        .await
        {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(server = %server.name, error = %e, "skipping unreachable server while listing domains");
                continue;
            }
        };
        let base = &core.config.remote_base_dir;
        if let Ok(domains) = proxy::list_domains(&session, &base).await {
            out.extend(domains.into_iter().map(|(domain, port)| DomainEntry { server: server.name.clone(), domain, port }));
        }
        session.close().await.ok();
    }
    Ok(Json(out))
}

#[derive(Debug, Deserialize)]
pub struct AddDomainRequest {
    pub app_id: i64,
}

pub async fn add(
    State(core): State<AppState>,
    Path(domain): Path<String>,
    Json(body): Json<AddDomainRequest>,
) -> Result<impl IntoResponse> {
    let app = repo::get_app(&core.pool, body.app_id).await?;
    let server = repo::get_server(&core.pool, app.server_id).await?;
    let session = SshSession::connect(
        &server.ssh_user,
        &server.host_address,
        Some(server.ssh_port as u16),
        server.ssh_key_path.as_deref().map(FsPath::new),
    )
    .await?;

    let port = app.container_port.unwrap_or(8080) as u16;
    let base = &core.config.remote_base_dir;
    proxy::add_domain(&session, &base, &domain, port, Some(&app.name)).await?;
    session.close().await.ok();
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RemoveDomainRequest {
    pub app_id: i64,
}

pub async fn remove(
    State(core): State<AppState>,
    Path(domain): Path<String>,
    Json(body): Json<RemoveDomainRequest>,
) -> Result<impl IntoResponse> {
    let app = repo::get_app(&core.pool, body.app_id).await?;
    let server = repo::get_server(&core.pool, app.server_id).await?;
    let session = SshSession::connect(
        &server.ssh_user,
        &server.host_address,
        Some(server.ssh_port as u16),
        server.ssh_key_path.as_deref().map(FsPath::new),
    )
    .await
    .map_err(Error::from)?;

    let base = &core.config.remote_base_dir;
    proxy::remove_domain(&session, &base, &domain).await?;
    session.close().await.ok();
    Ok(axum::http::StatusCode::NO_CONTENT)
}
