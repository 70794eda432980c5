//! `db` command group: database apps are ordinary `apps` rows with
//! `app_type = Db`, filtered into their own list and given backup/restore/
//! schedule operations instead of deploy/rollback.

use std::path::Path as FsPath;

use anyhow::Result;

use crate::backup::{self, s3::S3Target};
use crate::cli::{DbAction, EngineArg};
use crate::core::Core;
use crate::db::models::{AppTypeKind, DbEngine, DeployStrategy};
use crate::db::repo;
use crate::ssh::SshSession;

impl From<EngineArg> for DbEngine {
    fn from(value: EngineArg) -> Self {
        match value {
            EngineArg::Postgres => DbEngine::Postgres,
            EngineArg::Mysql => DbEngine::Mysql,
            EngineArg::Redis => DbEngine::Redis,
            EngineArg::Mongo => DbEngine::Mongo,
        }
    }
}

fn backup_dir(core: &Core) -> String {
    format!("{}/backups", core.config.remote_base_dir)
}

async fn connect(core: &Core, server_name: &str) -> Result<(crate::db::models::Server, SshSession)> {
    let server = repo::get_server_by_name(&core.pool, server_name).await?;
    let session = SshSession::connect(
        &server.ssh_user,
        &server.host_address,
        Some(server.ssh_port as u16),
        server.ssh_key_path.as_deref().map(FsPath::new),
    )
    .await?;
    Ok((server, session))
}

pub async fn run(action: DbAction) -> Result<()> {
    let core = Core::bootstrap().await?;

    match action {
        DbAction::Add { name, server, engine, port } => {
            let engine: DbEngine = engine.into();
            let server = repo::get_server_by_name(&core.pool, &server).await?;
            let app = repo::create_app(
                &core.pool,
                server.id,
                &name,
                None,
                Some(port.unwrap_or(engine.default_port() as i64)),
                None,
                None,
                None,
                None,
                AppTypeKind::Db,
                Some(engine),
                false,
                DeployStrategy::Restart,
            )
            .await?;
            crate::output::success(&format!("declared database app '{}' ({}) on '{}'", app.name, engine.as_str(), server.name));
        }

        DbAction::List { server } => {
            let server_id = match server {
                Some(name) => Some(repo::get_server_by_name(&core.pool, &name).await?.id),
                None => None,
            };
            let apps = repo::list_apps(&core.pool, server_id).await?;
            let apps: Vec<_> = apps.into_iter().filter(|a| a.is_database()).collect();
            if apps.is_empty() {
                crate::output::info("no database apps registered");
            }
            for a in apps {
                println!(
                    "{:<20} {:<10} {:?}",
                    a.name,
                    a.db_engine.map(|e| e.as_str()).unwrap_or("-"),
                    a.status
                );
            }
        }

        DbAction::Backup { name, server } => {
            let (srv, session) = connect(&core, &server).await?;
            let app = repo::get_app_by_name(&core.pool, srv.id, &name).await?;
            let pb = crate::output::create_spinner(&format!("backing up '{}'...", name));
            let remote_path = backup::backup_database(&session, &app, &backup_dir(&core)).await;
            let remote_path = match remote_path {
                Ok(p) => p,
                Err(e) => {
                    session.close().await.ok();
                    pb.finish_and_clear();
                    anyhow::bail!("backup failed: {e}");
                }
            };

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
                backup::s3::upload_backup_to_s3(&session, &remote_path, &target, &app.name).await?;
            }
            session.close().await.ok();
            pb.finish_and_clear();

            let webhooks = repo::list_webhooks(&core.pool).await?;
            crate::webhooks::fire(
                &core.http_client,
                &webhooks,
                "backup.complete",
                serde_json::json!({"app": app.name, "path": remote_path}),
            )
            .await;
            crate::output::success(&format!("backed up to {}", remote_path));
        }

        DbAction::Backups { name, server } => {
            let (srv, session) = connect(&core, &server).await?;
            let app = repo::get_app_by_name(&core.pool, srv.id, &name).await?;
            let backups = backup::list_backups(&session, &backup_dir(&core), &app.name).await?;
            session.close().await.ok();
            if backups.is_empty() {
                crate::output::info("no backups found");
            }
            for b in backups {
                println!("{:<40} {:>10} bytes  {}", b.filename, b.size_bytes, b.modified_at);
            }
        }

        DbAction::Restore { name, server, file } => {
            let (srv, session) = connect(&core, &server).await?;
            let app = repo::get_app_by_name(&core.pool, srv.id, &name).await?;
            let remote_path = format!("{}/{}", backup_dir(&core), file);
            let pb = crate::output::create_spinner(&format!("restoring '{}' from {}...", name, file));
            let result = backup::restore_database(&session, &app, &remote_path).await;
            session.close().await.ok();
            pb.finish_and_clear();
            result?;

            let webhooks = repo::list_webhooks(&core.pool).await?;
            crate::webhooks::fire(
                &core.http_client,
                &webhooks,
                "backup.restore",
                serde_json::json!({"app": app.name, "path": remote_path}),
            )
            .await;
            crate::output::success(&format!("restored '{}' from {}", name, file));
        }

        DbAction::Schedule { name, server, cron, retention_days } => {
            crate::config::validate::cron(&cron)?;
            let (srv, session) = connect(&core, &server).await?;
            let app = repo::get_app_by_name(&core.pool, srv.id, &name).await?;
            backup::install_backup_cron(&session, &app, &backup_dir(&core), &cron, retention_days).await?;
            session.close().await.ok();
            crate::output::success(&format!("installed backup schedule for '{}' ({})", name, cron));
        }

        DbAction::Unschedule { name, server } => {
            let (srv, session) = connect(&core, &server).await?;
            let app = repo::get_app_by_name(&core.pool, srv.id, &name).await?;
            backup::remove_backup_cron(&session, &app, &backup_dir(&core)).await?;
            session.close().await.ok();
            crate::output::success(&format!("removed backup schedule for '{}'", name));
        }
    }

    Ok(())
}
