//! `webhook` command group: outbound subscriptions fired by
//! `crate::webhooks` on deploy and backup events.

use anyhow::{bail, Result};

use crate::cli::WebhookAction;
use crate::core::Core;
use crate::db::repo;
use crate::webhooks::VALID_EVENTS;

pub async fn run(action: WebhookAction) -> Result<()> {
    let core = Core::bootstrap().await?;

    match action {
        WebhookAction::Add { url, events, secret } => {
            let events: Vec<&str> = events.split(',').map(str::trim).collect();
            if events.is_empty() || events.iter().any(|e| e.is_empty()) {
                bail!("at least one event is required");
            }
            if let Some(bad) = events.iter().find(|e| !VALID_EVENTS.contains(e)) {
                bail!("unknown event '{}' (valid: {})", bad, VALID_EVENTS.join(", "));
            }
            let webhook = repo::create_webhook(&core.pool, &url, &events.join(","), secret.as_deref()).await?;
            crate::output::success(&format!("subscribed #{} ({}) to {}", webhook.id, webhook.url, webhook.events));
        }

        WebhookAction::List => {
            let webhooks = repo::list_webhooks(&core.pool).await?;
            if webhooks.is_empty() {
                crate::output::info("no webhook subscriptions");
            }
            for w in webhooks {
                println!("#{:<4} {:<40} {}", w.id, w.url, w.events);
            }
        }

        WebhookAction::Remove { id } => {
            repo::delete_webhook(&core.pool, id).await?;
            crate::output::success(&format!("removed webhook #{}", id));
        }
    }

    Ok(())
}
