//! Reconciler: derives an app's actual status from live container state
//! rather than trusting the `apps.status` column, which only reflects
//! what the last deploy/stop/restart call believed happened.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::db::models::AppStatus;
use crate::ssh::{quote, ExecError, SshSession};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Exec(#[from] ExecError),
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerState {
    pub name: String,
    pub state: String,
    pub status: String,
    pub image: String,
    pub health: String,
}

/// Parses `docker compose ps --format json` NDJSON (one object per line).
/// Malformed lines are skipped; a non-zero exit or empty stdout (app
/// directory missing, Docker not running) yields an empty list rather than
/// an error.
pub async fn container_states(
    session: &SshSession,
    app_dir: &str,
) -> Result<Vec<ContainerState>, ReconcileError> {
    let cmd = format!(
        "cd {} && docker compose ps --format json 2>/dev/null",
        quote(app_dir)
    );
    let (stdout, _, code) = session.run(&cmd, Duration::from_secs(15)).await?;
    if code != 0 || stdout.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(obj) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        out.push(ContainerState {
            name: obj.get("Name").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            state: obj.get("State").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            status: obj.get("Status").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            image: obj.get("Image").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            health: obj.get("Health").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        });
    }
    Ok(out)
}

/// Folds a container state list into one of the four status values:
/// no containers → stopped; any restarting → restarting; all running →
/// running; some (but not all) running → error (partial failure); else →
/// stopped.
pub fn reconcile_status(containers: &[ContainerState]) -> AppStatus {
    if containers.is_empty() {
        return AppStatus::Stopped;
    }
    if containers.iter().any(|c| c.state == "restarting") {
        return AppStatus::Restarting;
    }
    if containers.iter().all(|c| c.state == "running") {
        return AppStatus::Running;
    }
    if containers.iter().any(|c| c.state == "running") {
        return AppStatus::Error;
    }
    AppStatus::Stopped
}

pub async fn reconcile_app_status(
    session: &SshSession,
    app_dir: &str,
) -> Result<AppStatus, ReconcileError> {
    let containers = container_states(session, app_dir).await?;
    Ok(reconcile_status(&containers))
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub healthy: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<f64>,
    pub error: Option<String>,
}

/// Curls `http://127.0.0.1:{port}{path}` from the remote host itself, so
/// the check reflects what the proxy would see rather than requiring an
/// externally-routable health endpoint. Healthy iff curl exits zero and
/// the status is in `200..400`.
pub async fn check_app_health(
    session: &SshSession,
    port: u16,
    path: &str,
) -> Result<HealthCheck, ReconcileError> {
    let url = format!("http://127.0.0.1:{}{}", port, path);
    let cmd = format!(
        "curl -s -o /dev/null -w '%{{http_code}} %{{time_total}}' --max-time 10 {}",
        quote(&url)
    );
    let (stdout, stderr, code) = session.run(&cmd, Duration::from_secs(15)).await?;

    if code != 0 {
        return Ok(HealthCheck {
            healthy: false,
            status_code: None,
            response_time_ms: None,
            error: Some(if stderr.trim().is_empty() {
                format!("curl exit code {}", code)
            } else {
                stderr.trim().to_string()
            }),
        });
    }

    let mut parts = stdout.trim().split_whitespace();
    let parsed = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .zip(parts.next().and_then(|s| s.parse::<f64>().ok()));

    match parsed {
        Some((status_code, seconds)) => Ok(HealthCheck {
            healthy: (200..400).contains(&status_code),
            status_code: Some(status_code),
            response_time_ms: Some((seconds * 1000.0 * 10.0).round() / 10.0),
            error: None,
        }),
        None => Ok(HealthCheck {
            healthy: false,
            status_code: None,
            response_time_ms: None,
            error: Some(format!("unexpected curl output: {:?}", stdout.trim())),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(state: &str) -> ContainerState {
        ContainerState {
            name: "c".into(),
            state: state.into(),
            status: "Up".into(),
            image: "img".into(),
            health: String::new(),
        }
    }

    #[test]
    fn empty_is_stopped() {
        assert_eq!(reconcile_status(&[]), AppStatus::Stopped);
    }

    #[test]
    fn any_restarting_wins() {
        let states = vec![container("running"), container("restarting")];
        assert_eq!(reconcile_status(&states), AppStatus::Restarting);
    }

    #[test]
    fn all_running_is_running() {
        let states = vec![container("running"), container("running")];
        assert_eq!(reconcile_status(&states), AppStatus::Running);
    }

    #[test]
    fn partial_running_is_error() {
        let states = vec![container("running"), container("exited")];
        assert_eq!(reconcile_status(&states), AppStatus::Error);
    }

    #[test]
    fn none_running_is_stopped() {
        let states = vec![container("exited"), container("exited")];
        assert_eq!(reconcile_status(&states), AppStatus::Stopped);
    }
}
