//! `proxy` command group: lists and edits the Proxy Store's file-provider
//! routes, mirroring `crate::api::proxy` one for one.

use std::path::Path as FsPath;

use anyhow::Result;

use crate::cli::ProxyAction;
use crate::core::Core;
use crate::db::repo;
use crate::proxy;
use crate::ssh::SshSession;

pub async fn run(action: ProxyAction) -> Result<()> {
    let core = Core::bootstrap().await?;

    match action {
        ProxyAction::List => {
            let servers = repo::list_servers(&core.pool).await?;
            let mut any = false;
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
                        crate::output::warning(&format!("skipping '{}': {e}", server.name));
                        continue;
                    }
                };
                if let Ok(domains) = proxy::list_domains(&session, &core.config.remote_base_dir).await {
                    for (domain, port) in domains {
                        println!("{:<30} {:<20} :{}", domain, server.name, port);
                        any = true;
                    }
                }
                session.close().await.ok();
            }
            if !any {
                crate::output::info("no domain routes configured");
            }
        }

        ProxyAction::Add { domain, app, server } => {
            let server = repo::get_server_by_name(&core.pool, &server).await?;
            let app = repo::get_app_by_name(&core.pool, server.id, &app).await?;
            let session = SshSession::connect(
                &server.ssh_user,
                &server.host_address,
                Some(server.ssh_port as u16),
                server.ssh_key_path.as_deref().map(FsPath::new),
            )
            .await?;
            let port = app.container_port.unwrap_or(8080) as u16;
            proxy::add_domain(&session, &core.config.remote_base_dir, &domain, port, Some(&app.name)).await?;
            session.close().await.ok();
            crate::output::success(&format!("routed {} to '{}'", domain, app.name));
        }

        ProxyAction::Remove { domain, server } => {
            let server = repo::get_server_by_name(&core.pool, &server).await?;
            let session = SshSession::connect(
                &server.ssh_user,
                &server.host_address,
                Some(server.ssh_port as u16),
                server.ssh_key_path.as_deref().map(FsPath::new),
            )
            .await?;
            proxy::remove_domain(&session, &core.config.remote_base_dir, &domain).await?;
            session.close().await.ok();
            crate::output::success(&format!("removed route for {}", domain));
        }
    }

    Ok(())
}
