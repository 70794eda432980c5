use std::path::Path;

use anyhow::{bail, Result};
use dialoguer::Confirm;

use crate::cli::ServerAction;
use crate::core::Core;
use crate::db::models::ServerStatus;
use crate::db::repo;
use crate::provision;
use crate::ssh::SshSession;

pub async fn run(action: ServerAction) -> Result<()> {
    let core = Core::bootstrap().await?;

    match action {
        ServerAction::Add { name, host, port, user, key_path, provider } => {
            let server = repo::create_server(
                &core.pool,
                &name,
                &host,
                port,
                &user,
                key_path.as_deref(),
                provider.as_deref(),
            )
            .await?;
            crate::output::success(&format!("registered server '{}' ({})", server.name, server.host_address));
        }

        ServerAction::List => {
            let servers = repo::list_servers(&core.pool).await?;
            if servers.is_empty() {
                crate::output::info("no servers registered");
            }
            for s in servers {
                println!("{:<20} {:<24} {:?}", s.name, s.host_address, s.status);
            }
        }

        ServerAction::Show { name } => {
            let server = repo::get_server_by_name(&core.pool, &name).await?;
            println!("{:#?}", server);
        }

        ServerAction::Remove { name } => {
            let server = repo::get_server_by_name(&core.pool, &name).await?;
            repo::delete_server(&core.pool, server.id).await?;
            crate::output::success(&format!("removed server '{}' and its apps", name));
        }

        ServerAction::Provision { name, acme_email } => {
            let server = repo::get_server_by_name(&core.pool, &name).await?;
            repo::set_server_status(&core.pool, server.id, ServerStatus::Provisioning).await?;

            let session = SshSession::connect(
                &server.ssh_user,
                &server.host_address,
                Some(server.ssh_port as u16),
                server.ssh_key_path.as_deref().map(Path::new),
            )
            .await?;

            let result = provision::provision_server(&session, &acme_email, |step| {
                crate::output::step(step.index + 1, step.total, &step.name);
            })
            .await;
            session.close().await.ok();

            match result {
                Ok(()) => {
                    repo::set_server_status(&core.pool, server.id, ServerStatus::Active).await?;
                    crate::output::success(&format!("'{}' provisioned and active", name));
                }
                Err(e) => {
                    repo::set_server_status(&core.pool, server.id, ServerStatus::Error).await?;
                    bail!("provisioning failed: {e}");
                }
            }
        }

        ServerAction::Wipe { name, yes } => {
            if !yes
                && !Confirm::new()
                    .with_prompt(format!(
                        "This will remove Docker, the reverse proxy, and /opt/dockhand from '{}'. Continue?",
                        name
                    ))
                    .default(false)
                    .interact()?
            {
                crate::output::info("aborted");
                return Ok(());
            }

            let server = repo::get_server_by_name(&core.pool, &name).await?;
            let session = SshSession::connect(
                &server.ssh_user,
                &server.host_address,
                Some(server.ssh_port as u16),
                server.ssh_key_path.as_deref().map(Path::new),
            )
            .await?;
            provision::wipe_server(&session, |step| {
                crate::output::step(step.index + 1, step.total, &step.name);
            })
            .await?;
            session.close().await.ok();

            repo::set_server_status(&core.pool, server.id, ServerStatus::Inactive).await?;
            crate::output::success(&format!("'{}' wiped", name));
        }

        ServerAction::Test { name } => {
            let server = repo::get_server_by_name(&core.pool, &name).await?;
            let pb = crate::output::create_spinner(&format!("connecting to {}...", server.host_address));
            let session = SshSession::connect(
                &server.ssh_user,
                &server.host_address,
                Some(server.ssh_port as u16),
                server.ssh_key_path.as_deref().map(Path::new),
            )
            .await?;
            let ok = session.test_connection().await;
            session.close().await.ok();
            pb.finish_and_clear();
            if ok {
                crate::output::success("connection ok");
            } else {
                bail!("connection test failed");
            }
        }
    }

    Ok(())
}
