//! Metric Sampler: periodic live stats for servers (cpu/mem/disk) and
//! database apps (engine-specific size/connections/version/uptime),
//! gathered over the same SSH session the rest of the control plane uses
//! rather than a separate agent.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::db::models::DbEngine;
use crate::ssh::{quote, ExecError, SshSession};

#[derive(Debug, Error)]
pub enum MetricError {
    #[error(transparent)]
    Exec(#[from] ExecError),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerSample {
    pub cpu_percent: Option<f64>,
    pub mem_percent: Option<f64>,
    pub disk_percent: Option<f64>,
}

/// Parses a `top`-style CPU percentage string, tolerant of surrounding
/// whitespace and unparseable input (returns `None` rather than erroring —
/// a single bad sample must not take down the whole sampler loop).
fn parse_cpu(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().parse().ok()?;
    Some((value * 10.0).round() / 10.0)
}

fn parse_mem(raw: &str) -> Option<f64> {
    let fields: Vec<&str> = raw.split_whitespace().collect();
    let total: f64 = fields.first()?.parse().ok()?;
    let used: f64 = fields.get(1)?.parse().ok()?;
    if total <= 0.0 {
        return None;
    }
    Some((used / total * 100.0 * 10.0).round() / 10.0)
}

fn parse_disk(raw: &str) -> Option<f64> {
    let fields: Vec<&str> = raw.split_whitespace().collect();
    let percent_field = fields.get(3)?;
    percent_field.trim_end_matches('%').parse::<f64>().ok()
}

/// Samples CPU, memory, and disk usage for the root filesystem over one
/// SSH session: `free -b` for memory, `df -B1 /` for disk, and a
/// single-iteration `top` for CPU. Any one metric failing to parse leaves
/// that field `None` rather than failing the whole sample.
pub async fn sample_server(session: &SshSession) -> Result<ServerSample, MetricError> {
    let mut sample = ServerSample::default();

    let (mem_out, _, mem_code) = session
        .run(
            "free -b | awk '/^Mem:/ {print $2, $3}'",
            Duration::from_secs(10),
        )
        .await?;
    if mem_code == 0 {
        sample.mem_percent = parse_mem(&mem_out);
    }

    let (disk_out, _, disk_code) = session
        .run("df -B1 / | tail -1", Duration::from_secs(10))
        .await?;
    if disk_code == 0 {
        sample.disk_percent = parse_disk(&disk_out);
    }

    let (cpu_out, _, cpu_code) = session
        .run(
            "top -bn1 | grep -i '^%Cpu' | awk '{print $2}'",
            Duration::from_secs(10),
        )
        .await?;
    if cpu_code == 0 {
        sample.cpu_percent = parse_cpu(&cpu_out);
    }

    Ok(sample)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DatabaseStats {
    pub disk_size: Option<String>,
    pub active_connections: Option<i64>,
    pub version: Option<String>,
    pub uptime: Option<String>,
}

fn parse_hours_minutes(seconds: i64) -> String {
    format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
}

/// Dispatches to per-engine `docker exec` probes. Every probe is
/// independent — a failing probe leaves its field `None` and the others
/// still get reported.
pub async fn sample_database(
    session: &SshSession,
    app_name: &str,
    engine: DbEngine,
) -> Result<DatabaseStats, MetricError> {
    let container = format!("dockhand-db-{}", app_name);
    match engine {
        DbEngine::Postgres => postgres_stats(session, &container, app_name).await,
        DbEngine::Mysql => mysql_stats(session, &container).await,
        DbEngine::Redis => redis_stats(session, &container).await,
        DbEngine::Mongo => mongo_stats(session, &container).await,
    }
}

async fn postgres_stats(
    session: &SshSession,
    container: &str,
    db_name: &str,
) -> Result<DatabaseStats, MetricError> {
    let mut stats = DatabaseStats::default();
    let q_container = quote(container);
    let q_name = quote(db_name);

    let (out, _, code) = session
        .run(
            &format!(
                "docker exec {} psql -U {} -d {} -t -c \"SELECT pg_size_pretty(pg_database_size('{}'))\"",
                q_container, q_name, q_name, db_name
            ),
            Duration::from_secs(10),
        )
        .await?;
    if code == 0 && !out.trim().is_empty() {
        stats.disk_size = Some(out.trim().to_string());
    }

    let (out, _, code) = session
        .run(
            &format!(
                "docker exec {} psql -U {} -d {} -t -c \"SELECT count(*) FROM pg_stat_activity\"",
                q_container, q_name, q_name
            ),
            Duration::from_secs(10),
        )
        .await?;
    if code == 0 {
        stats.active_connections = out.trim().parse().ok();
    }

    let (out, _, code) = session
        .run(
            &format!(
                "docker exec {} psql -U {} -d {} -t -c \"SHOW server_version\"",
                q_container, q_name, q_name
            ),
            Duration::from_secs(10),
        )
        .await?;
    if code == 0 && !out.trim().is_empty() {
        stats.version = Some(out.trim().to_string());
    }

    let (out, _, code) = session
        .run(
            &format!(
                "docker exec {} psql -U {} -d {} -t -c \"SELECT now() - pg_postmaster_start_time()\"",
                q_container, q_name, q_name
            ),
            Duration::from_secs(10),
        )
        .await?;
    if code == 0 && !out.trim().is_empty() {
        stats.uptime = Some(out.trim().to_string());
    }

    Ok(stats)
}

async fn mysql_stats(session: &SshSession, container: &str) -> Result<DatabaseStats, MetricError> {
    let mut stats = DatabaseStats::default();
    let q_container = quote(container);

    let (out, _, code) = session
        .run(
            &format!("docker exec {} mysql -u root -e \"SELECT VERSION()\" -s -N", q_container),
            Duration::from_secs(10),
        )
        .await?;
    if code == 0 && !out.trim().is_empty() {
        stats.version = Some(out.trim().to_string());
    }

    let (out, _, code) = session
        .run(
            &format!(
                "docker exec {} mysql -u root -e \"SHOW STATUS LIKE 'Threads_connected'\" -s -N",
                q_container
            ),
            Duration::from_secs(10),
        )
        .await?;
    if code == 0 {
        if let Some(v) = out.trim().split_whitespace().nth(1) {
            stats.active_connections = v.parse().ok();
        }
    }

    let (out, _, code) = session
        .run(
            &format!(
                "docker exec {} mysql -u root -e \"SHOW STATUS LIKE 'Uptime'\" -s -N",
                q_container
            ),
            Duration::from_secs(10),
        )
        .await?;
    if code == 0 {
        if let Some(v) = out.trim().split_whitespace().nth(1) {
            if let Ok(secs) = v.parse::<i64>() {
                stats.uptime = Some(parse_hours_minutes(secs));
            }
        }
    }

    Ok(stats)
}

async fn redis_stats(session: &SshSession, container: &str) -> Result<DatabaseStats, MetricError> {
    let mut stats = DatabaseStats::default();
    let q_container = quote(container);

    let (out, _, code) = session
        .run(&format!("docker exec {} redis-cli INFO memory", q_container), Duration::from_secs(10))
        .await?;
    if code == 0 {
        for line in out.lines() {
            if let Some(v) = line.strip_prefix("used_memory_human:") {
                stats.disk_size = Some(v.trim().to_string());
                break;
            }
        }
    }

    let (out, _, code) = session
        .run(&format!("docker exec {} redis-cli INFO clients", q_container), Duration::from_secs(10))
        .await?;
    if code == 0 {
        for line in out.lines() {
            if let Some(v) = line.strip_prefix("connected_clients:") {
                stats.active_connections = v.trim().parse().ok();
                break;
            }
        }
    }

    let (out, _, code) = session
        .run(&format!("docker exec {} redis-cli INFO server", q_container), Duration::from_secs(10))
        .await?;
    if code == 0 {
        for line in out.lines() {
            if let Some(v) = line.strip_prefix("redis_version:") {
                stats.version = Some(v.trim().to_string());
            } else if let Some(v) = line.strip_prefix("uptime_in_seconds:") {
                if let Ok(secs) = v.trim().parse::<i64>() {
                    stats.uptime = Some(parse_hours_minutes(secs));
                }
            }
        }
    }

    Ok(stats)
}

async fn mongo_stats(session: &SshSession, container: &str) -> Result<DatabaseStats, MetricError> {
    let mut stats = DatabaseStats::default();
    let q_container = quote(container);

    let (out, _, code) = session
        .run(
            &format!("docker exec {} mongosh --quiet --eval \"db.version()\"", q_container),
            Duration::from_secs(10),
        )
        .await?;
    if code == 0 && !out.trim().is_empty() {
        stats.version = Some(out.trim().to_string());
    }

    let (out, _, code) = session
        .run(
            &format!(
                "docker exec {} mongosh --quiet --eval \"JSON.stringify(db.serverStatus())\"",
                q_container
            ),
            Duration::from_secs(10),
        )
        .await?;
    if code == 0 && !out.trim().is_empty() {
        if let Ok(data) = serde_json::from_str::<serde_json::Value>(out.trim()) {
            stats.active_connections = data
                .get("connections")
                .and_then(|c| c.get("current"))
                .and_then(|v| v.as_i64());
            if let Some(secs) = data.get("uptime").and_then(|v| v.as_i64()) {
                stats.uptime = Some(parse_hours_minutes(secs));
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cpu_rounds_and_rejects_garbage() {
        assert_eq!(parse_cpu("45.678"), Some(45.7));
        assert_eq!(parse_cpu("  8.5  "), Some(8.5));
        assert_eq!(parse_cpu("n/a"), None);
        assert_eq!(parse_cpu(""), None);
    }

    #[test]
    fn parse_mem_computes_percent_used() {
        assert_eq!(parse_mem("8000000000 2000000000 5000000000"), Some(25.0));
    }

    #[test]
    fn parse_disk_reads_fourth_field() {
        assert_eq!(parse_disk("/dev/sda1 20000000000 5000000000 14000000000 25% /"), Some(25.0));
    }

    #[test]
    fn hours_minutes_format() {
        assert_eq!(parse_hours_minutes(3720), "1h 2m");
    }
}
