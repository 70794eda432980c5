//! `dockhand init`: bootstraps the control-plane home directory — the
//! sqlite database (migrated), the master encryption key, and the
//! platform API key — then prints the key exactly once, matching the
//! auth arbiter's "shown once at creation" rule for any generated secret.

use anyhow::Result;
use dialoguer::Confirm;

use crate::auth;
use crate::core::Core;

pub async fn run() -> Result<()> {
    let home = crate::config::Home::resolve()?;
    let already_initialised = home.api_key_path().exists();

    if already_initialised
        && !Confirm::new()
            .with_prompt(format!(
                "{} already has a platform key — re-run init anyway?",
                home.root().display()
            ))
            .default(false)
            .interact()?
    {
        crate::output::info("Nothing to do.");
        return Ok(());
    }

    let core = Core::bootstrap().await?;
    let api_key = auth::get_or_create_api_key(&core.home)?;

    crate::output::success(&format!("Initialised dockhand at {}", core.home.root().display()));
    crate::output::info(&format!("Platform key: {}", api_key));
    crate::output::warning("This key is also stored at ~/.dockhand/api_key.txt (mode 600) and will not be printed again.");
    crate::output::header("Next steps");
    println!("  dockhand server add <name> --host <address>");
    println!("  dockhand app add <name> --server <server> --image <image> --port <port>");
    println!("  dockhand serve   # start the HTTP API on {}", core.config.bind);

    Ok(())
}
