//! The seven steps of one deploy attempt, called in order by
//! [`super::run_steps`]: `validate`, `connect`, `ensure_dir`, `upload_env`,
//! `materialise`, `apply`, `gate_health`. Each step is a thin wrapper around
//! the SSH primitives in [`crate::ssh`] and the pure renderers in
//! [`crate::compose`] — this module owns ordering and remote side effects,
//! nothing else.

use std::time::Duration;

use tokio::time::sleep;

use crate::compose;
use crate::db::models::{AppTypeKind, DeployStrategy};
use crate::reconcile;
use crate::secrets::store;
use crate::ssh::{exec, SshSession};

use super::context::DeployContext;
use super::{DeploymentError, Emitter};

pub async fn validate(ctx: &DeployContext<'_>) -> Result<(), DeploymentError> {
    match ctx.app.app_type {
        AppTypeKind::Db => {
            let engine = ctx
                .app
                .db_engine
                .ok_or_else(|| DeploymentError::Validation("database app has no engine set".into()))?;
            let _ = compose::render_db(ctx.app, engine)?;
        }
        AppTypeKind::Git => {
            if ctx.app.source_repo.is_none() {
                return Err(DeploymentError::Validation(
                    "git app has no source_repo configured".into(),
                ));
            }
            if let Some(commit) = &ctx.requested_commit {
                crate::config::validate::commit(commit)?;
            }
            compose::validate_app(ctx.app)?;
        }
        AppTypeKind::Image => {
            if ctx.app.image.is_none() && ctx.requested_image.is_none() {
                return Err(DeploymentError::Validation(
                    "app has no image configured".into(),
                ));
            }
            compose::validate_app(ctx.app)?;
        }
        AppTypeKind::Compose => {
            if ctx.app.compose_manifest.is_none() {
                return Err(DeploymentError::Validation(
                    "compose app has no inline manifest configured".into(),
                ));
            }
            crate::config::validate::app_name(&ctx.app.name)?;
        }
    }
    Ok(())
}

pub async fn connect(ctx: &DeployContext<'_>) -> Result<SshSession, DeploymentError> {
    SshSession::connect(
        &ctx.server.ssh_user,
        &ctx.server.host_address,
        Some(ctx.server.ssh_port as u16),
        ctx.ssh_keyfile(),
    )
    .await
    .map_err(Into::into)
}

pub async fn ensure_dir(session: &SshSession, ctx: &DeployContext<'_>) -> Result<(), DeploymentError> {
    session
        .run_checked(&exec::mkdir_p(&ctx.app_dir()), Duration::from_secs(15))
        .await?;
    Ok(())
}

/// Decrypts the app's environment and uploads it as a `.env` file next to
/// the compose manifest. An app with no configured variables still gets an
/// (empty) `.env` so `env_file:` in the rendered compose never points at a
/// missing file.
pub async fn upload_env(session: &SshSession, ctx: &DeployContext<'_>) -> Result<(), DeploymentError> {
    let env = store::read_env(ctx.home, ctx.app.id, ctx.identity)
        .map_err(|e| DeploymentError::Internal(e.to_string()))?;
    let dotenv = store::render_dotenv(&env);
    session.upload_string(&dotenv, &ctx.env_path()).await?;
    Ok(())
}

pub struct MaterialisedResult {
    pub commit_hash: Option<String>,
    pub image_used: Option<String>,
}

pub async fn materialise(
    session: &SshSession,
    ctx: &DeployContext<'_>,
    out: &mut Emitter<'_>,
) -> Result<MaterialisedResult, DeploymentError> {
    match ctx.app.app_type {
        AppTypeKind::Git => materialise_git(session, ctx, out).await,
        AppTypeKind::Image => materialise_image(session, ctx, out).await,
        AppTypeKind::Compose => materialise_compose(session, ctx, out).await,
        AppTypeKind::Db => materialise_db(session, ctx, out).await,
    }
}

async fn materialise_git(
    session: &SshSession,
    ctx: &DeployContext<'_>,
    out: &mut Emitter<'_>,
) -> Result<MaterialisedResult, DeploymentError> {
    let raw_url = ctx
        .app
        .source_repo
        .as_deref()
        .ok_or_else(|| DeploymentError::Validation("git app has no source_repo configured".into()))?;
    let branch = ctx.app.branch.as_deref().unwrap_or("main");
    let repo_dir = ctx.repo_dir();
    let url = ctx
        .authenticated_repo_url(raw_url)
        .map_err(|e| DeploymentError::Internal(e.to_string()))?;

    let exists = session
        .run(&exec::test_file_exists(&format!("{}/.git/HEAD", repo_dir)), Duration::from_secs(10))
        .await?
        .2
        == 0;

    if exists {
        out.line(format!("fetching {} ({})", raw_url, branch)).await;
    } else {
        out.line(format!("cloning {} ({})", raw_url, branch)).await;
        session
            .run_checked(&exec::git_clone(&url, branch, &repo_dir), Duration::from_secs(180))
            .await?;
    }

    let target = match &ctx.requested_commit {
        Some(commit) => commit.clone(),
        None => format!("origin/{}", branch),
    };
    session
        .run_checked(&exec::git_fetch_reset(&repo_dir, &target), Duration::from_secs(120))
        .await?;

    let commit_hash = session
        .run_checked(&exec::git_rev_parse_head(&repo_dir), Duration::from_secs(15))
        .await?
        .trim()
        .to_string();
    out.line(format!("checked out {}", commit_hash)).await;

    let manifest = compose::render_app(ctx.app, None)?;
    session.upload_string(&manifest, &ctx.compose_path()).await?;

    out.line("building images").await;
    session
        .run_checked(&exec::compose_build(&ctx.app_dir()), Duration::from_secs(600))
        .await?;

    Ok(MaterialisedResult { commit_hash: Some(commit_hash), image_used: None })
}

async fn materialise_image(
    session: &SshSession,
    ctx: &DeployContext<'_>,
    out: &mut Emitter<'_>,
) -> Result<MaterialisedResult, DeploymentError> {
    let image = ctx
        .requested_image
        .clone()
        .or_else(|| ctx.app.image.clone())
        .ok_or_else(|| DeploymentError::Validation("app has no image configured".into()))?;

    out.line(format!("using image {}", image)).await;
    let manifest = compose::render_app(ctx.app, Some(&image))?;
    session.upload_string(&manifest, &ctx.compose_path()).await?;

    Ok(MaterialisedResult { commit_hash: None, image_used: Some(image) })
}

/// Writes the app's inline compose manifest verbatim — no rendering, no
/// validation beyond the app name already checked in `validate` — so an
/// operator who hand-wrote a manifest gets exactly what they wrote on the
/// remote host.
async fn materialise_compose(
    session: &SshSession,
    ctx: &DeployContext<'_>,
    out: &mut Emitter<'_>,
) -> Result<MaterialisedResult, DeploymentError> {
    let manifest = ctx
        .app
        .compose_manifest
        .as_deref()
        .ok_or_else(|| DeploymentError::Validation("compose app has no inline manifest configured".into()))?;

    out.line("writing inline compose manifest").await;
    session.upload_string(manifest, &ctx.compose_path()).await?;

    Ok(MaterialisedResult { commit_hash: None, image_used: None })
}

async fn materialise_db(
    session: &SshSession,
    ctx: &DeployContext<'_>,
    out: &mut Emitter<'_>,
) -> Result<MaterialisedResult, DeploymentError> {
    let engine = ctx
        .app
        .db_engine
        .ok_or_else(|| DeploymentError::Validation("database app has no engine set".into()))?;

    out.line(format!("rendering {} manifest", engine.as_str())).await;
    let manifest = compose::render_db(ctx.app, engine)?;
    session.upload_string(&manifest, &ctx.compose_path()).await?;

    Ok(MaterialisedResult { commit_hash: None, image_used: None })
}

fn pull_policy(app_type: AppTypeKind) -> Option<&'static str> {
    match app_type {
        AppTypeKind::Git => None,
        AppTypeKind::Image | AppTypeKind::Compose | AppTypeKind::Db => Some("always"),
    }
}

pub async fn apply(session: &SshSession, ctx: &DeployContext<'_>) -> Result<(), DeploymentError> {
    session
        .run_checked(
            &exec::compose_up(&ctx.app_dir(), pull_policy(ctx.app.app_type)),
            Duration::from_secs(300),
        )
        .await?;
    Ok(())
}

const HEALTH_CHECK_ATTEMPTS: u32 = 10;
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Rolling deploys poll the reconciler until every declared service reports
/// the running state or the attempt budget is exhausted, tearing the new
/// containers back down on failure so the old release (if any) is the one
/// left serving traffic. Restart-strategy deploys, and apps with no health
/// URL configured, skip this entirely — `docker compose up -d` already
/// replaced the container in place.
pub async fn gate_health(session: &SshSession, ctx: &DeployContext<'_>) -> Result<(), DeploymentError> {
    if ctx.app.deploy_strategy != DeployStrategy::Rolling
        || ctx.app.app_type == AppTypeKind::Db
        || ctx.app.health_check_url.is_none()
    {
        return Ok(());
    }

    for attempt in 1..=HEALTH_CHECK_ATTEMPTS {
        let status = reconcile::reconcile_app_status(session, &ctx.app_dir()).await?;
        if status == crate::db::models::AppStatus::Running {
            return Ok(());
        }
        if attempt < HEALTH_CHECK_ATTEMPTS {
            sleep(HEALTH_CHECK_INTERVAL).await;
        }
    }

    session.run(&exec::compose_down(&ctx.app_dir()), Duration::from_secs(60)).await.ok();
    Err(DeploymentError::HealthCheckFailed(format!(
        "app did not become healthy within {} attempts",
        HEALTH_CHECK_ATTEMPTS
    )))
}
