//! `env` command group: reads and writes an app's encrypted environment
//! store directly (the same `secrets::store` the deploy pipeline's
//! `upload_env` step reads from), since the CLI process already holds the
//! master identity needed to decrypt it.

use anyhow::{bail, Result};

use crate::cli::EnvAction;
use crate::core::Core;
use crate::db::repo;
use crate::secrets::store;

pub async fn run(action: EnvAction) -> Result<()> {
    let core = Core::bootstrap().await?;

    match action {
        EnvAction::Set { name, server, pairs } => {
            let server = repo::get_server_by_name(&core.pool, &server).await?;
            let app = repo::get_app_by_name(&core.pool, server.id, &name).await?;
            let mut env = store::read_env(&core.home, app.id, &core.identity)?;
            for pair in &pairs {
                let Some((key, value)) = pair.split_once('=') else {
                    bail!("'{}' is not in KEY=VALUE form", pair);
                };
                env.insert(key.to_string(), value.to_string());
            }
            store::write_env(&core.home, app.id, &env, &core.identity)?;
            crate::output::success(&format!("set {} variable(s) on '{}'", pairs.len(), name));
        }

        EnvAction::Unset { name, server, key } => {
            let server = repo::get_server_by_name(&core.pool, &server).await?;
            let app = repo::get_app_by_name(&core.pool, server.id, &name).await?;
            let mut env = store::read_env(&core.home, app.id, &core.identity)?;
            if env.remove(&key).is_none() {
                crate::output::warning(&format!("'{}' was not set", key));
            }
            store::write_env(&core.home, app.id, &env, &core.identity)?;
            crate::output::success(&format!("unset '{}' on '{}'", key, name));
        }

        EnvAction::List { name, server, reveal } => {
            let server = repo::get_server_by_name(&core.pool, &server).await?;
            let app = repo::get_app_by_name(&core.pool, server.id, &name).await?;
            let env = store::read_env(&core.home, app.id, &core.identity)?;
            if env.is_empty() {
                crate::output::info("no variables set");
            }
            for (key, value) in env {
                if reveal {
                    println!("{}={}", key, value);
                } else {
                    println!("{}=********", key);
                }
            }
        }
    }

    Ok(())
}
