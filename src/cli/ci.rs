//! `ci` command group: the one part of the CLI that never touches local
//! state directly. A CI runner has neither the control plane's SSH keys
//! nor its sqlite file, so this talks to a running `dockhand serve`
//! instance over HTTP with a deploy key instead — the natural shape for a
//! scoped, hashed, revocable credential authorised only for the
//! deployment-trigger endpoint.

use std::time::Duration;

use anyhow::{bail, Result};
use futures::StreamExt;
use serde_json::{json, Value};

use crate::cli::CiAction;

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("reqwest client")
}

async fn print_sse_logs(base: &str, api_key: &str, deployment_id: i64) -> Result<()> {
    let url = format!("{}/deployments/{}/logs", base.trim_end_matches('/'), deployment_id);
    let resp = client().get(&url).header("X-API-Key", api_key).send().await?;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for line in String::from_utf8_lossy(&chunk).lines() {
            if let Some(data) = line.strip_prefix("data: ") {
                if !data.is_empty() {
                    println!("{}", data);
                }
            }
            if line.starts_with("event: done") {
                return Ok(());
            }
        }
    }
    Ok(())
}

pub async fn run(action: CiAction) -> Result<()> {
    match action {
        CiAction::Deploy { api_url, api_key, app_id, commit, image, wait } => {
            let url = format!("{}/apps/{}/deploy", api_url.trim_end_matches('/'), app_id);
            let resp = client()
                .post(&url)
                .header("X-API-Key", &api_key)
                .json(&json!({"commit": commit, "image": image}))
                .send()
                .await?;
            let status = resp.status();
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            if !status.is_success() {
                bail!("deploy request failed ({status}): {body}");
            }
            let deployment_id = body["id"].as_i64().unwrap_or_default();
            crate::output::success(&format!("deployment #{} triggered", deployment_id));
            if wait {
                print_sse_logs(&api_url, &api_key, deployment_id).await?;
                let final_status = poll_status(&api_url, &api_key, deployment_id).await?;
                if final_status["status"] == "failed" {
                    bail!("deployment #{} failed", deployment_id);
                }
            }
        }

        CiAction::Rollback { api_url, api_key, app_id, wait } => {
            let url = format!("{}/apps/{}/rollback", api_url.trim_end_matches('/'), app_id);
            let resp = client().post(&url).header("X-API-Key", &api_key).send().await?;
            let status = resp.status();
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            if !status.is_success() {
                bail!("rollback request failed ({status}): {body}");
            }
            let deployment_id = body["id"].as_i64().unwrap_or_default();
            crate::output::success(&format!("rollback deployment #{} triggered", deployment_id));
            if wait {
                print_sse_logs(&api_url, &api_key, deployment_id).await?;
                let final_status = poll_status(&api_url, &api_key, deployment_id).await?;
                if final_status["status"] == "failed" {
                    bail!("rollback #{} failed", deployment_id);
                }
            }
        }

        CiAction::Status { api_url, api_key, deployment_id } => {
            let body = poll_status(&api_url, &api_key, deployment_id).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
    }

    Ok(())
}

async fn poll_status(api_url: &str, api_key: &str, deployment_id: i64) -> Result<Value> {
    let url = format!("{}/deployments/{}", api_url.trim_end_matches('/'), deployment_id);
    let resp = client().get(&url).header("X-API-Key", api_key).send().await?;
    let status = resp.status();
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        bail!("status request failed ({status}): {body}");
    }
    Ok(body)
}
