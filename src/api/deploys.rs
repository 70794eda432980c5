use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::db::models::{App, AppStatus, DeploymentStatus};
use crate::db::repo;
use crate::deploy::context::DeployContext;
use crate::error::{Error, Result};
use crate::proxy;
use crate::ssh::SshSession;

use super::{AppState, Principal};

#[derive(Debug, Deserialize, Default)]
pub struct DeployRequest {
    pub commit: Option<String>,
    pub image: Option<String>,
}

/// Creates the `Deployment` row and the broadcaster entry synchronously,
/// then hands the actual SSH work off to a background task and returns
/// immediately with the (still `in_progress`) row. This is the atomic
/// handoff the deploy endpoint promises: a caller that receives this
/// response and immediately opens the SSE log stream is guaranteed a
/// broadcaster entry already exists for that id — the worker is never
/// started before both the row and the broadcaster registration exist.
pub async fn trigger(
    State(core): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(app_id): Path<i64>,
    body: Option<Json<DeployRequest>>,
) -> Result<impl IntoResponse> {
    if !principal.can_deploy() {
        return Err(Error::Forbidden("credential is not scoped for deploy".into()));
    }
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let deployment = begin_deploy(core, app_id, body).await?;
    Ok(Json(deployment))
}

/// Re-deploys the last successful commit. Only meaningful for git apps —
/// image apps roll back by re-deploying with an explicit `image` instead.
pub async fn rollback(
    State(core): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(app_id): Path<i64>,
) -> Result<impl IntoResponse> {
    if !principal.can_deploy() {
        return Err(Error::Forbidden("credential is not scoped for deploy".into()));
    }
    let commit = repo::last_successful_commit(&core.pool, app_id)
        .await?
        .ok_or_else(|| Error::NotFound("no prior successful deployment to roll back to".into()))?;
    let body = DeployRequest { commit: Some(commit), image: None };
    let deployment = begin_deploy(core, app_id, body).await?;
    Ok(Json(deployment))
}

/// Synchronous half of an HTTP-triggered deploy: create the row, flip the
/// app to `deploying`, register the broadcaster entry, then spawn the rest
/// as a durable background task that outlives this request's cancellation.
async fn begin_deploy(
    core: AppState,
    app_id: i64,
    body: DeployRequest,
) -> Result<crate::db::models::Deployment> {
    let app = repo::get_app(&core.pool, app_id).await?;
    let deployment = repo::create_deployment(&core.pool, app.id).await?;
    repo::set_app_status(&core.pool, app.id, AppStatus::Deploying).await?;
    core.broadcaster.register(deployment.id).await;

    let deployment_for_worker = deployment.clone();
    tokio::spawn(async move {
        if let Err(e) = run_deploy(core, app, deployment_for_worker, body).await {
            tracing::warn!(error = %e, "background deploy failed");
        }
    });

    Ok(deployment)
}

/// Runs one deploy attempt for `app_id` end to end and blocks until it
/// finishes, for callers that want the outcome inline (the CLI, and the
/// push-webhook ingest path's background task). The broadcaster entry is
/// registered here since these callers never hand the deployment id to an
/// HTTP subscriber ahead of time — there is no race to avoid.
pub async fn deploy_app(
    core: AppState,
    app_id: i64,
    body: DeployRequest,
) -> Result<crate::db::models::Deployment> {
    let app = repo::get_app(&core.pool, app_id).await?;
    let deployment = repo::create_deployment(&core.pool, app.id).await?;
    repo::set_app_status(&core.pool, app.id, AppStatus::Deploying).await?;
    core.broadcaster.register(deployment.id).await;

    run_deploy(core, app, deployment, body).await
}

/// Shared worker body: builds the deploy context, runs the state machine
/// under the per-app exclusion lock, persists the outcome, flips the app's
/// status, and fires the matching outbound webhook. The broadcaster entry
/// for `deployment.id` must already be registered before this is called.
async fn run_deploy(
    core: AppState,
    app: crate::db::models::App,
    deployment: crate::db::models::Deployment,
    body: DeployRequest,
) -> Result<crate::db::models::Deployment> {
    let deployment_id = deployment.id;
    let app_id = app.id;
    let server = repo::get_server(&core.pool, app.server_id).await?;
    let source_integration = repo::get_source_integration(&core.pool).await?;

    let core_for_run = core.clone();
    let result = core
        .coordinator
        .run_exclusive(app.id, move || async move {
            let ctx = DeployContext {
                server: &server,
                app: &app,
                home: &core_for_run.home,
                config: &core_for_run.config,
                identity: &core_for_run.identity,
                requested_commit: body.commit.clone(),
                requested_image: body.image.clone(),
                source_integration: source_integration.as_ref(),
            };
            crate::deploy::execute(&ctx, &core_for_run.broadcaster, &deployment)
                .await
                .map(|outcome| (app, outcome))
        })
        .await;

    match result {
        Ok((app, outcome)) => {
            repo::finish_deployment(
                &core.pool,
                deployment_id,
                DeploymentStatus::Success,
                outcome.commit_hash.as_deref(),
                outcome.image_used.as_deref(),
                &outcome.log,
            )
            .await?;
            repo::set_app_status(&core.pool, app.id, AppStatus::Running).await?;

            if let Err(e) = sync_proxy_route(&core, &app).await {
                tracing::warn!(app_id = app.id, error = %e, "failed to update proxy route after deploy");
            }

            let webhooks = repo::list_webhooks(&core.pool).await?;
            crate::webhooks::fire(
                &core.http_client,
                &webhooks,
                "deploy.success",
                json!({"app": app.name, "deployment_id": deployment_id}),
            )
            .await;

            Ok(repo::get_deployment(&core.pool, deployment_id).await?)
        }
        Err(e) => {
            repo::finish_deployment(
                &core.pool,
                deployment_id,
                DeploymentStatus::Failed,
                None,
                None,
                &e.to_string(),
            )
            .await?;
            repo::set_app_status(&core.pool, app_id, AppStatus::Error).await?;

            let webhooks = repo::list_webhooks(&core.pool).await?;
            crate::webhooks::fire(
                &core.http_client,
                &webhooks,
                "deploy.failure",
                json!({"app_id": app_id, "deployment_id": deployment_id, "error": e.to_string()}),
            )
            .await;

            Err(Error::from(e))
        }
    }
}

/// Updates the app's reverse-proxy route after a successful deploy, per the
/// state machine's "on success, if the App has a domain, add/update that
/// domain's route" coupling. A no-op for apps with no declared domain.
async fn sync_proxy_route(core: &AppState, app: &App) -> anyhow::Result<()> {
    let (Some(domain), Some(port)) = (&app.domain, app.container_port) else {
        return Ok(());
    };
    let server = repo::get_server(&core.pool, app.server_id).await?;
    let session = SshSession::connect(
        &server.ssh_user,
        &server.host_address,
        Some(server.ssh_port as u16),
        server.ssh_key_path.as_deref().map(std::path::Path::new),
    )
    .await?;
    proxy::add_domain(&session, &core.config.remote_base_dir, domain, port as u16, Some(&app.name)).await?;
    session.close().await.ok();
    Ok(())
}

pub async fn list(State(core): State<AppState>, Path(app_id): Path<i64>) -> Result<impl IntoResponse> {
    Ok(Json(repo::list_deployments(&core.pool, app_id).await?))
}

pub async fn get(State(core): State<AppState>, Path(id): Path<i64>) -> Result<impl IntoResponse> {
    Ok(Json(repo::get_deployment(&core.pool, id).await?))
}

enum LiveState {
    Open(tokio::sync::mpsc::UnboundedReceiver<Option<String>>),
    Closed,
}

/// Streams a deployment's log lines as Server-Sent Events: the backlog
/// first, then live lines as they're published, then a terminal `done`
/// event translated from the broadcaster's `None` sentinel. The stream
/// ends as soon as `done` is sent — it never waits on the channel again,
/// since nothing further is ever published after `finish`.
pub async fn logs_sse(
    State(core): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, std::convert::Infallible>>>> {
    let _ = repo::get_deployment(&core.pool, id).await?;
    let (backlog, rx) = core.broadcaster.subscribe(id).await.map_err(|e| Error::NotFound(e.to_string()))?;

    let backlog_stream =
        stream::iter(backlog.into_iter().map(|line| Ok(Event::default().event("log").data(line))));

    let live_stream = stream::unfold(LiveState::Open(rx), |state| async move {
        let LiveState::Open(mut rx) = state else { return None };
        match rx.recv().await {
            Some(Some(line)) => Some((Ok(Event::default().event("log").data(line)), LiveState::Open(rx))),
            Some(None) => Some((Ok(Event::default().event("done").data("")), LiveState::Closed)),
            None => None,
        }
    });

    Ok(Sse::new(backlog_stream.chain(live_stream)).keep_alive(KeepAlive::default()))
}
