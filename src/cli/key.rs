//! `key` command group: scoped deploy-key lifecycle, the credential a CI
//! runner uses with `dockhand ci` instead of the platform key.

use anyhow::Result;

use crate::auth::deploy_keys;
use crate::cli::KeyAction;
use crate::core::Core;

pub async fn run(action: KeyAction) -> Result<()> {
    let core = Core::bootstrap().await?;

    match action {
        KeyAction::Create { label } => {
            let key = deploy_keys::generate(&core.home, &label)?;
            crate::output::success(&format!("created deploy key '{}'", label));
            crate::output::info(&format!("key: {}", key));
            crate::output::warning("this is the only time the plaintext key is shown");
        }

        KeyAction::List => {
            let keys = deploy_keys::list(&core.home)?;
            if keys.is_empty() {
                crate::output::info("no deploy keys");
            }
            for k in keys {
                println!("{:<20} {} {}", k.label, k.created_at.format("%Y-%m-%d"), k.scopes.join(","));
            }
        }

        KeyAction::Revoke { label } => {
            deploy_keys::revoke(&core.home, &label)?;
            crate::output::success(&format!("revoked deploy key '{}'", label));
        }
    }

    Ok(())
}
