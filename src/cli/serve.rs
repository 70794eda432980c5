//! `dockhand serve`: boots the HTTP API and the periodic metric sampler
//! under one `Core`. Both share the same broadcaster, pool, and SSH
//! credentials as the CLI — there is no separate agent process.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use crate::core::Core;
use crate::db::models::ServerStatus;
use crate::db::repo;

const METRIC_SAMPLE_INTERVAL: Duration = Duration::from_secs(60);
const METRIC_RETENTION_DAYS: i64 = 30;

pub async fn run() -> Result<()> {
    let core = Arc::new(Core::bootstrap().await?);

    tokio::spawn(metric_sampler_loop(core.clone()));

    let app = crate::api::router(core.clone());
    let listener = TcpListener::bind(&core.config.bind)
        .await
        .with_context(|| format!("failed to bind {}", core.config.bind))?;

    tracing::info!(bind = %core.config.bind, "dockhand listening");
    axum::serve(listener, app).await.context("http server exited")?;
    Ok(())
}

/// Every tick, samples every active server and persists a `ServerMetric`
/// row; a single server's SSH failure is logged and skipped rather than
/// aborting the rest of the round. Also prunes rows past the retention
/// window — see DESIGN.md.
async fn metric_sampler_loop(core: Arc<Core>) {
    let mut ticker = tokio::time::interval(METRIC_SAMPLE_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(e) = sample_round(&core).await {
            tracing::warn!(error = %e, "metric sample round failed to list servers");
        }
    }
}

async fn sample_round(core: &Core) -> anyhow::Result<()> {
    let servers = repo::list_servers(&core.pool).await?;
    for server in servers {
        if server.status != ServerStatus::Active {
            continue;
        }
        let span = tracing::info_span!("metric_sample", server = %server.name);
        let _enter = span.enter();

        let session = match crate::ssh::SshSession::connect(
            &server.ssh_user,
            &server.host_address,
            Some(server.ssh_port as u16),
            server.ssh_key_path.as_deref().map(Path::new),
        )
        .await
        {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreachable server during metric sample");
                continue;
            }
        };

        match crate::metrics::sample_server(&session).await {
            Ok(sample) => {
                if let Err(e) = repo::insert_server_metric(
                    &core.pool,
                    server.id,
                    sample.cpu_percent,
                    sample.mem_percent,
                    sample.disk_percent,
                )
                .await
                {
                    tracing::warn!(error = %e, "failed to persist server metric");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to sample server metrics"),
        }
        session.close().await.ok();
    }

    match repo::prune_server_metrics(&core.pool, METRIC_RETENTION_DAYS).await {
        Ok(n) if n > 0 => tracing::debug!(pruned = n, "pruned old server metrics"),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "failed to prune server metrics"),
    }
    Ok(())
}
