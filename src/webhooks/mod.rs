//! Outbound webhook sender: fan-out notifications to every subscriber
//! whose `events` list matches, fired after a deploy or backup completes.
//! Distinct from the Push-Webhook Ingest handler in `crate::api::routes`,
//! which *receives* GitHub pushes to trigger a deploy — this module only
//! sends.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::auth::sign_body;
use crate::db::models::Webhook;

pub const VALID_EVENTS: &[&str] =
    &["deploy.success", "deploy.failure", "backup.complete", "backup.restore"];

#[derive(Debug, Serialize)]
struct Payload<'a> {
    event: &'a str,
    timestamp: String,
    data: Value,
}

fn build_payload(event: &str, data: Value) -> Vec<u8> {
    let payload = Payload { event, timestamp: Utc::now().to_rfc3339(), data };
    serde_json::to_vec(&payload).expect("payload is always serialisable")
}

/// POSTs the payload to `url`, signing it with `X-Webhook-Signature` when
/// a secret is configured. Failures are logged, never surfaced to the
/// caller — a subscriber's endpoint being down must never fail the
/// deploy or backup that triggered the notification.
async fn deliver(client: &reqwest::Client, url: &str, secret: Option<&str>, body: &[u8]) {
    let mut request = client
        .post(url)
        .timeout(std::time::Duration::from_secs(10))
        .header("Content-Type", "application/json")
        .header("User-Agent", "dockhand-webhooks/0.1");

    if let Some(secret) = secret {
        request = request.header("X-Webhook-Signature", sign_body(secret, body));
    }

    match request.body(body.to_vec()).send().await {
        Ok(resp) if !resp.status().is_success() => {
            tracing::warn!(url, status = %resp.status(), "webhook delivery rejected");
        }
        Err(e) => {
            tracing::warn!(url, error = %e, "webhook delivery failed");
        }
        Ok(_) => {}
    }
}

/// Fires `event` to every webhook subscribed to it, concurrently. Webhooks
/// are loaded fresh on every call rather than cached, so a newly added or
/// removed subscriber takes effect on the very next event.
pub async fn fire(client: &reqwest::Client, webhooks: &[Webhook], event: &str, data: Value) {
    let body = build_payload(event, data);
    let targets: Vec<&Webhook> = webhooks.iter().filter(|w| w.subscribes_to(event)).collect();

    let deliveries = targets
        .into_iter()
        .map(|w| deliver(client, &w.url, w.secret.as_deref(), &body));
    futures::future::join_all(deliveries).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_event_and_data() {
        let body = build_payload("deploy.success", serde_json::json!({"app": "api"}));
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["event"], "deploy.success");
        assert_eq!(parsed["data"]["app"], "api");
        assert!(parsed["timestamp"].is_string());
    }

    #[test]
    fn valid_events_list_matches_webhook_subscription_model() {
        assert!(VALID_EVENTS.contains(&"deploy.success"));
        assert!(VALID_EVENTS.contains(&"backup.complete"));
    }
}
