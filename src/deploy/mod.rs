pub mod context;
pub mod steps;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use crate::broadcaster::LogBroadcaster;
use crate::config::validate::ValidationError;
use crate::db::models::Deployment;
use crate::ssh::ExecError;

use context::DeployContext;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("remote failure: {0}")]
    Remote(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("health check failed: {0}")]
    HealthCheckFailed(String),
    #[error("a deployment for this app is already in progress")]
    AlreadyInProgress,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ValidationError> for DeploymentError {
    fn from(e: ValidationError) -> Self {
        DeploymentError::Validation(e.to_string())
    }
}

impl From<ExecError> for DeploymentError {
    fn from(e: ExecError) -> Self {
        DeploymentError::Remote(e.to_string())
    }
}

impl From<crate::reconcile::ReconcileError> for DeploymentError {
    fn from(e: crate::reconcile::ReconcileError) -> Self {
        DeploymentError::Remote(e.to_string())
    }
}

impl From<anyhow::Error> for DeploymentError {
    fn from(e: anyhow::Error) -> Self {
        DeploymentError::Internal(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub log: String,
    pub commit_hash: Option<String>,
    pub image_used: Option<String>,
}

/// Streams each line both into the in-memory log and the broadcaster, so a
/// live SSE subscriber and the final persisted `deployments.log` column
/// always agree.
pub struct Emitter<'a> {
    broadcaster: &'a LogBroadcaster,
    deployment_id: i64,
    lines: Vec<String>,
}

impl<'a> Emitter<'a> {
    fn new(broadcaster: &'a LogBroadcaster, deployment_id: i64) -> Self {
        Self { broadcaster, deployment_id, lines: Vec::new() }
    }

    pub async fn line(&mut self, text: impl Into<String>) {
        let text = text.into();
        tracing::info!(deployment_id = self.deployment_id, "{}", text);
        self.broadcaster.publish(self.deployment_id, text.clone()).await;
        self.lines.push(text);
    }

    fn into_log(self) -> String {
        self.lines.join("\n")
    }
}

/// Per-app exclusion: a second deploy attempt for an app already mid-deploy
/// is rejected immediately rather than queued, so a caller retrying a
/// timed-out request can never stack an unbounded backlog of attempts.
#[derive(Clone, Default)]
pub struct DeployCoordinator {
    locks: Arc<AsyncMutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
}

impl DeployCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, app_id: i64) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(app_id).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Runs `body` while holding the exclusive per-app slot, or returns
    /// `AlreadyInProgress` immediately if another attempt holds it.
    pub async fn run_exclusive<F, Fut, T>(&self, app_id: i64, body: F) -> Result<T, DeploymentError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, DeploymentError>>,
    {
        let lock = self.lock_for(app_id).await;
        let _guard = lock.try_lock().map_err(|_| DeploymentError::AlreadyInProgress)?;
        body().await
    }
}

/// Runs the full state machine for one deploy attempt: validate the app's
/// fields, ensure the remote app directory exists, upload the decrypted
/// environment, materialise the deployable (git checkout, pulled image, or
/// inline compose), apply it with `docker compose up -d`, gate on a health
/// check, and return the outcome for the caller to persist via
/// `finish_deployment`. Does not itself touch the `deployments` table or
/// the Proxy Store — callers (HTTP handler, CLI, webhook ingest) own
/// `create_deployment`/`finish_deployment` and the domain route update.
///
/// Callers must call `broadcaster.register(deployment.id)` themselves
/// before handing this off to a background worker — registering here would
/// race a subscriber that already attached using the id returned from the
/// triggering request, silently dropping it from the subscriber set.
pub async fn execute(
    ctx: &DeployContext<'_>,
    broadcaster: &LogBroadcaster,
    deployment: &Deployment,
) -> Result<DeployOutcome, DeploymentError> {
    let mut out = Emitter::new(broadcaster, deployment.id);

    let result = run_steps(ctx, &mut out).await;
    if let Err(e) = &result {
        out.line(format!("[ERROR] {e}")).await;
    }

    let log = out.into_log();
    broadcaster.finish(deployment.id).await;
    broadcaster.schedule_cleanup(deployment.id);

    match result {
        Ok((commit_hash, image_used)) => Ok(DeployOutcome { log, commit_hash, image_used }),
        Err(e) => {
            // the caller persists this error text by formatting `e`; the
            // in-progress log is still returned alongside it via the Err
            // carried here, so an HTTP handler can record exactly where it
            // stopped.
            Err(attach_log(e, log))
        }
    }
}

fn attach_log(e: DeploymentError, log: String) -> DeploymentError {
    if log.is_empty() {
        e
    } else {
        DeploymentError::Internal(format!("{e}\n--- log ---\n{log}"))
    }
}

async fn run_steps(
    ctx: &DeployContext<'_>,
    out: &mut Emitter<'_>,
) -> Result<(Option<String>, Option<String>), DeploymentError> {
    out.line(format!("Starting deployment of '{}'", ctx.app.name)).await;
    steps::validate(ctx).await?;
    out.line("validated app configuration").await;

    let session = steps::connect(ctx).await?;

    steps::ensure_dir(&session, ctx).await?;
    out.line("remote app directory ready").await;

    steps::upload_env(&session, ctx).await?;
    out.line("environment uploaded").await;

    let materialised = steps::materialise(&session, ctx, out).await?;

    steps::apply(&session, ctx).await?;
    out.line("docker compose up -d").await;

    match steps::gate_health(&session, ctx).await {
        Ok(()) => {
            out.line("health check passed").await;
        }
        Err(e) => {
            out.line(format!("health check failed: {e}")).await;
            session.close().await.ok();
            return Err(e);
        }
    }

    session.close().await.ok();
    out.line("Deployment complete").await;
    Ok((materialised.commit_hash, materialised.image_used))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Duration};

    #[tokio::test]
    async fn run_exclusive_rejects_a_concurrent_attempt_for_the_same_app() {
        let coordinator = DeployCoordinator::new();
        let c2 = coordinator.clone();

        let first = tokio::spawn(async move {
            c2.run_exclusive(1, || async {
                sleep(Duration::from_millis(50)).await;
                Ok::<_, DeploymentError>(())
            })
            .await
        });
        sleep(Duration::from_millis(10)).await;
        let second = coordinator
            .run_exclusive(1, || async { Ok::<_, DeploymentError>(()) })
            .await;

        assert!(matches!(second, Err(DeploymentError::AlreadyInProgress)));
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn run_exclusive_allows_different_apps_concurrently() {
        let coordinator = DeployCoordinator::new();
        let a = coordinator.run_exclusive(1, || async { Ok::<_, DeploymentError>(()) }).await;
        let b = coordinator.run_exclusive(2, || async { Ok::<_, DeploymentError>(()) }).await;
        assert!(a.is_ok());
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn run_exclusive_releases_the_slot_after_completion() {
        let coordinator = DeployCoordinator::new();
        coordinator.run_exclusive(1, || async { Ok::<_, DeploymentError>(()) }).await.unwrap();
        let again = coordinator.run_exclusive(1, || async { Ok::<_, DeploymentError>(()) }).await;
        assert!(again.is_ok());
    }
}
