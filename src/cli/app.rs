//! `app` command group: CRUD plus the deploy/rollback/status/logs
//! operations, all reusing the exact same helpers the HTTP handlers call
//! (`crate::api::deploys::deploy_app`, `reconcile::*`) so a CLI-triggered
//! deploy and an API-triggered one behave identically.

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::api::apps::delete_app_and_route;
use crate::api::deploys::{deploy_app, DeployRequest};
use crate::cli::{AppAction, StrategyArg};
use crate::core::Core;
use crate::db::models::{AppTypeKind, DeployStrategy};
use crate::db::repo;
use crate::reconcile;
use crate::ssh::SshSession;

impl From<StrategyArg> for DeployStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Restart => DeployStrategy::Restart,
            StrategyArg::Rolling => DeployStrategy::Rolling,
        }
    }
}

pub async fn run(action: AppAction) -> Result<()> {
    let core = Arc::new(Core::bootstrap().await?);

    match action {
        AppAction::Add {
            name,
            server,
            domain,
            port,
            image,
            repo: source_repo,
            branch,
            compose_file,
            auto_deploy,
            strategy,
        } => {
            let server = repo::get_server_by_name(&core.pool, &server).await?;
            let compose_manifest = compose_file
                .as_deref()
                .map(std::fs::read_to_string)
                .transpose()?;
            let app_type = if compose_manifest.is_some() {
                AppTypeKind::Compose
            } else if source_repo.is_some() {
                AppTypeKind::Git
            } else if image.is_some() {
                AppTypeKind::Image
            } else {
                bail!("one of --image, --repo, or --compose-file is required");
            };
            let app = repo::create_app(
                &core.pool,
                server.id,
                &name,
                domain.as_deref(),
                port,
                source_repo.as_deref(),
                Some(branch.as_str()),
                image.as_deref(),
                compose_manifest.as_deref(),
                app_type,
                None,
                auto_deploy,
                strategy.into(),
            )
            .await?;
            crate::output::success(&format!("declared app '{}' on '{}'", app.name, server.name));
        }

        AppAction::List { server } => {
            let server_id = match server {
                Some(name) => Some(repo::get_server_by_name(&core.pool, &name).await?.id),
                None => None,
            };
            let apps = repo::list_apps(&core.pool, server_id).await?;
            let apps: Vec<_> = apps.into_iter().filter(|a| !a.is_database()).collect();
            if apps.is_empty() {
                crate::output::info("no apps registered");
            }
            for a in apps {
                println!("{:<20} {:?}", a.name, a.status);
            }
        }

        AppAction::Show { name, server } => {
            let server = repo::get_server_by_name(&core.pool, &server).await?;
            let app = repo::get_app_by_name(&core.pool, server.id, &name).await?;
            println!("{:#?}", app);
        }

        AppAction::Remove { name, server } => {
            let server = repo::get_server_by_name(&core.pool, &server).await?;
            let app = repo::get_app_by_name(&core.pool, server.id, &name).await?;
            delete_app_and_route(&core, app.id).await?;
            crate::output::success(&format!("removed app '{}'", name));
        }

        AppAction::Deploy { name, server, commit, image } => {
            let server = repo::get_server_by_name(&core.pool, &server).await?;
            let app = repo::get_app_by_name(&core.pool, server.id, &name).await?;
            let pb = crate::output::create_spinner(&format!("deploying '{}'...", app.name));
            let deployment = deploy_app(core.clone(), app.id, DeployRequest { commit, image }).await;
            pb.finish_and_clear();
            match deployment {
                Ok(d) => {
                    crate::output::success(&format!(
                        "deployment #{} succeeded ({})",
                        d.id,
                        d.commit_hash.or(d.image_used).unwrap_or_default()
                    ));
                    println!("{}", d.log);
                }
                Err(e) => bail!("deploy failed: {e}"),
            }
        }

        AppAction::Rollback { name, server } => {
            let server = repo::get_server_by_name(&core.pool, &server).await?;
            let app = repo::get_app_by_name(&core.pool, server.id, &name).await?;
            let commit = repo::last_successful_commit(&core.pool, app.id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("no prior successful deployment for '{}'", name))?;
            let pb = crate::output::create_spinner(&format!("rolling back '{}' to {}...", app.name, commit));
            let deployment =
                deploy_app(core.clone(), app.id, DeployRequest { commit: Some(commit), image: None }).await;
            pb.finish_and_clear();
            match deployment {
                Ok(d) => {
                    crate::output::success(&format!("rolled back to deployment #{}", d.id));
                    println!("{}", d.log);
                }
                Err(e) => bail!("rollback failed: {e}"),
            }
        }

        AppAction::Status { name, server } => {
            let server = repo::get_server_by_name(&core.pool, &server).await?;
            let app = repo::get_app_by_name(&core.pool, server.id, &name).await?;
            let session = SshSession::connect(
                &server.ssh_user,
                &server.host_address,
                Some(server.ssh_port as u16),
                server.ssh_key_path.as_deref().map(std::path::Path::new),
            )
            .await?;
            let app_dir = format!("{}/apps/{}", core.config.remote_base_dir, app.name);
            let containers = reconcile::container_states(&session, &app_dir).await?;
            let status = reconcile::reconcile_status(&containers);
            session.close().await.ok();
            repo::set_app_status(&core.pool, app.id, status).await?;

            println!("{:?}", status);
            for c in containers {
                println!("  {:<30} {:<10} {}", c.name, c.state, c.health);
            }
        }

        AppAction::Deployments { name, server } => {
            let server = repo::get_server_by_name(&core.pool, &server).await?;
            let app = repo::get_app_by_name(&core.pool, server.id, &name).await?;
            let deployments = repo::list_deployments(&core.pool, app.id).await?;
            if deployments.is_empty() {
                crate::output::info("no deployments yet");
            }
            for d in deployments {
                println!(
                    "#{:<6} {:<10?} {}",
                    d.id,
                    d.status,
                    d.commit_hash.or(d.image_used).unwrap_or_default()
                );
            }
        }

        AppAction::Logs { deployment, name, server } => {
            let server = repo::get_server_by_name(&core.pool, &server).await?;
            let app = repo::get_app_by_name(&core.pool, server.id, &name).await?;
            let deployment = match deployment {
                Some(id) => repo::get_deployment(&core.pool, id).await?,
                None => repo::list_deployments(&core.pool, app.id)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("'{}' has no deployments", name))?,
            };
            crate::output::info(
                "this process did not run the deploy, so only the persisted log is available (no live tail)",
            );
            println!("{}", deployment.log);
        }
    }

    Ok(())
}
