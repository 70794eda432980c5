//! Backup Engine: on-demand and scheduled dumps/restores for database
//! apps, plus optional off-host replication to an S3-compatible object
//! store. Every command is built with [`crate::ssh::quote`] around every
//! interpolated value.

use std::time::Duration;

use thiserror::Error;

use crate::db::models::{App, DbEngine};
use crate::ssh::{quote, ExecError, SshSession};

#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("app '{0}' is not a database")]
    NotADatabase(String),
    #[error("backup file not found on server: {0}")]
    MissingFile(String),
    #[error("unsupported database engine for this operation")]
    UnsupportedEngine,
}

fn container_name(app: &App) -> String {
    format!("dockhand-db-{}", app.name)
}

fn timestamp() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

async fn container_env(
    session: &SshSession,
    container: &str,
    var: &str,
) -> Result<String, BackupError> {
    let out = session
        .run_checked(
            &format!("docker exec {} printenv {}", quote(container), quote(var)),
            Duration::from_secs(10),
        )
        .await?;
    Ok(out.trim().to_string())
}

fn require_engine(app: &App) -> Result<DbEngine, BackupError> {
    app.db_engine.ok_or_else(|| BackupError::NotADatabase(app.name.clone()))
}

/// Runs a backup on the remote host and returns the absolute remote path
/// of the resulting file. Supports postgres, mysql, redis, and mongo —
/// each via the engine's own dump tool run inside the database container,
/// piped straight to the backup directory so the plaintext dump never
/// touches the control plane's own disk.
pub async fn backup_database(
    session: &SshSession,
    app: &App,
    backup_dir: &str,
) -> Result<String, BackupError> {
    let engine = require_engine(app)?;
    let container = container_name(app);
    let q_container = quote(&container);
    let q_name = quote(&app.name);
    let ts = timestamp();

    session
        .run_checked(&format!("mkdir -p {}", quote(backup_dir)), Duration::from_secs(15))
        .await?;

    let (filename, cmd) = match engine {
        DbEngine::Postgres => {
            let filename = format!("{}_{}.sql.gz", app.name, ts);
            let q_file = quote(&format!("{}/{}", backup_dir, filename));
            (
                filename,
                format!("docker exec {} pg_dump -U {} {} | gzip > {}", q_container, q_name, q_name, q_file),
            )
        }
        DbEngine::Mysql => {
            let password = container_env(session, &container, "MYSQL_PASSWORD").await?;
            let q_pass = quote(&password);
            let filename = format!("{}_{}.sql.gz", app.name, ts);
            let q_file = quote(&format!("{}/{}", backup_dir, filename));
            (
                filename,
                format!(
                    "docker exec {} mysqldump -u {} -p{} {} | gzip > {}",
                    q_container, q_name, q_pass, q_name, q_file
                ),
            )
        }
        DbEngine::Redis => {
            session
                .run_checked(&format!("docker exec {} redis-cli BGSAVE", q_container), Duration::from_secs(30))
                .await?;
            session.run("sleep 2", Duration::from_secs(5)).await?;
            let filename = format!("{}_{}.rdb", app.name, ts);
            let q_file = quote(&format!("{}/{}", backup_dir, filename));
            (filename, format!("docker cp {}:/data/dump.rdb {}", q_container, q_file))
        }
        DbEngine::Mongo => {
            let password = container_env(session, &container, "MONGO_INITDB_ROOT_PASSWORD").await?;
            let q_pass = quote(&password);
            let filename = format!("{}_{}.archive.gz", app.name, ts);
            let q_file = quote(&format!("{}/{}", backup_dir, filename));
            (
                filename,
                format!(
                    "docker exec {} mongodump --archive --gzip -u {} -p {} --authenticationDatabase admin > {}",
                    q_container, q_name, q_pass, q_file
                ),
            )
        }
    };

    session.run_checked(&cmd, Duration::from_secs(300)).await?;
    Ok(format!("{}/{}", backup_dir, filename))
}

/// Restores from an existing remote backup file. Fails with
/// [`BackupError::MissingFile`] if `remote_backup_path` does not exist —
/// the caller is expected to have listed or uploaded it first.
pub async fn restore_database(
    session: &SshSession,
    app: &App,
    remote_backup_path: &str,
) -> Result<(), BackupError> {
    let engine = require_engine(app)?;
    let container = container_name(app);
    let q_container = quote(&container);
    let q_name = quote(&app.name);
    let q_path = quote(remote_backup_path);

    let (_, _, code) = session
        .run(&format!("test -f {}", q_path), Duration::from_secs(10))
        .await?;
    if code != 0 {
        return Err(BackupError::MissingFile(remote_backup_path.to_string()));
    }

    match engine {
        DbEngine::Postgres => {
            let cmd = format!(
                "gunzip -c {} | docker exec -i {} psql -U {} -d {}",
                q_path, q_container, q_name, q_name
            );
            session.run_checked(&cmd, Duration::from_secs(300)).await?;
        }
        DbEngine::Mysql => {
            let password = container_env(session, &container, "MYSQL_PASSWORD").await?;
            let q_pass = quote(&password);
            let cmd = format!(
                "gunzip -c {} | docker exec -i {} mysql -u {} -p{} {}",
                q_path, q_container, q_name, q_pass, q_name
            );
            session.run_checked(&cmd, Duration::from_secs(300)).await?;
        }
        DbEngine::Redis => {
            let app_path = format!("/opt/dockhand/apps/{}", app.name);
            session
                .run_checked(
                    &format!("docker cp {} {}:/data/dump.rdb", q_path, q_container),
                    Duration::from_secs(30),
                )
                .await?;
            session
                .run_checked(
                    &format!("cd {} && docker compose restart", quote(&app_path)),
                    Duration::from_secs(60),
                )
                .await?;
        }
        DbEngine::Mongo => {
            let password = container_env(session, &container, "MONGO_INITDB_ROOT_PASSWORD").await?;
            let q_pass = quote(&password);
            let cmd = format!(
                "cat {} | docker exec -i {} mongorestore --archive --gzip --drop -u {} -p {} --authenticationDatabase admin",
                q_path, q_container, q_name, q_pass
            );
            session.run_checked(&cmd, Duration::from_secs(300)).await?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LocalBackup {
    pub filename: String,
    pub size_bytes: u64,
    pub modified_at: String,
}

/// Lists backup files for this app on the remote host, newest first. Uses
/// `find -printf` rather than `ls` so the timestamp comes out in a fixed,
/// parseable format regardless of the remote's locale.
pub async fn list_backups(
    session: &SshSession,
    backup_dir: &str,
    app_name: &str,
) -> Result<Vec<LocalBackup>, BackupError> {
    let name_pattern = format!("{}_*", app_name);
    let cmd = format!(
        "find {} -maxdepth 1 -type f -name {} -printf '%f %s %TY-%Tm-%TdT%TH:%TM:%TS\\n' 2>/dev/null",
        quote(backup_dir),
        quote(&name_pattern),
    );
    let (stdout, _, code) = session.run(&cmd, Duration::from_secs(15)).await?;
    if code != 0 {
        return Ok(Vec::new());
    }

    let mut out: Vec<LocalBackup> = stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let filename = fields.next()?.to_string();
            let size_bytes = fields.next()?.parse().ok()?;
            let modified_at = fields.next()?.to_string();
            Some(LocalBackup { filename, size_bytes, modified_at })
        })
        .collect();
    out.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
    Ok(out)
}

fn cron_marker(app_name: &str) -> String {
    format!("dockhand-backup:{}", app_name)
}

/// Builds the POSIX script a cron entry runs: dump the database, then
/// sweep files older than `retention_days` matching this app's prefix.
/// Pure string construction — no I/O — so it can be unit-tested without a
/// session.
pub fn generate_backup_script(app: &App, backup_dir: &str, retention_days: i64) -> Result<String, BackupError> {
    let engine = require_engine(app)?;
    let container = container_name(app);
    let name = &app.name;
    let ts_var = "$(date +%Y%m%d_%H%M%S)";

    let mut lines = vec![
        "#!/usr/bin/env bash".to_string(),
        "set -euo pipefail".to_string(),
        format!("BACKUP_DIR={}", quote(backup_dir)),
        "mkdir -p \"$BACKUP_DIR\"".to_string(),
        String::new(),
    ];

    match engine {
        DbEngine::Postgres => {
            let filename = format!("{}_{}.sql.gz", name, ts_var);
            lines.push(format!(
                "docker exec {} pg_dump -U {} {} | gzip > \"$BACKUP_DIR/{}\"",
                quote(&container), quote(name), quote(name), filename
            ));
        }
        DbEngine::Mysql => {
            lines.push(format!("MYSQL_PASS=$(docker exec {} printenv MYSQL_PASSWORD)", quote(&container)));
            let filename = format!("{}_{}.sql.gz", name, ts_var);
            lines.push(format!(
                "docker exec {} mysqldump -u {} -p\"$MYSQL_PASS\" {} | gzip > \"$BACKUP_DIR/{}\"",
                quote(&container), quote(name), quote(name), filename
            ));
        }
        DbEngine::Redis => {
            let filename = format!("{}_{}.rdb", name, ts_var);
            lines.push(format!("docker exec {} redis-cli BGSAVE", quote(&container)));
            lines.push("sleep 2".to_string());
            lines.push(format!("docker cp {}:/data/dump.rdb \"$BACKUP_DIR/{}\"", quote(&container), filename));
        }
        DbEngine::Mongo => {
            lines.push(format!(
                "MONGO_PASS=$(docker exec {} printenv MONGO_INITDB_ROOT_PASSWORD)",
                quote(&container)
            ));
            let filename = format!("{}_{}.archive.gz", name, ts_var);
            lines.push(format!(
                "docker exec {} mongodump --archive --gzip -u {} -p \"$MONGO_PASS\" --authenticationDatabase admin > \"$BACKUP_DIR/{}\"",
                quote(&container), quote(name), filename
            ));
        }
    }

    lines.push(String::new());
    lines.push("# Clean up old backups".to_string());
    lines.push(format!(
        "find \"$BACKUP_DIR\" -name {} -mtime +{} -delete",
        quote(&format!("{}_*", name)),
        retention_days
    ));

    Ok(lines.join("\n") + "\n")
}

/// Installs (or replaces) a cron entry running the generated script.
/// Idempotent via a unique marker comment on the crontab line: the
/// install always removes any prior line carrying this app's marker
/// before appending the new one, so repeated installs never duplicate.
pub async fn install_backup_cron(
    session: &SshSession,
    app: &App,
    backup_dir: &str,
    cron_expr: &str,
    retention_days: i64,
) -> Result<(), BackupError> {
    let script = generate_backup_script(app, backup_dir, retention_days)?;
    let script_path = format!("{}/backup-{}.sh", backup_dir, app.name);
    let marker = cron_marker(&app.name);

    session
        .run_checked(&format!("mkdir -p {}", quote(backup_dir)), Duration::from_secs(15))
        .await?;
    session.upload_string(&script, &script_path).await?;
    session
        .run_checked(&format!("chmod +x {}", quote(&script_path)), Duration::from_secs(10))
        .await?;

    let cron_line = format!("{} {} # {}", cron_expr, script_path, marker);
    let cmd = format!(
        "(crontab -l 2>/dev/null | grep -v {}; echo {}) | crontab -",
        quote(&marker),
        quote(&cron_line)
    );
    session.run_checked(&cmd, Duration::from_secs(15)).await?;
    Ok(())
}

pub async fn remove_backup_cron(session: &SshSession, app: &App, backup_dir: &str) -> Result<(), BackupError> {
    let marker = cron_marker(&app.name);
    let script_path = format!("{}/backup-{}.sh", backup_dir, app.name);

    session
        .run(
            &format!("crontab -l 2>/dev/null | grep -v {} | crontab -", quote(&marker)),
            Duration::from_secs(15),
        )
        .await?;
    session
        .run(&format!("rm -f {}", quote(&script_path)), Duration::from_secs(10))
        .await?;
    Ok(())
}

/// Off-host replication via the `aws` CLI against any S3-compatible
/// endpoint. Credentials are written to a throwaway file readable only by
/// the invoking user and removed immediately after, never placed on the
/// command line where they would leak into shell history or `ps`.
pub mod s3 {
    use std::time::Duration;

    use super::BackupError;
    use crate::ssh::{quote, SshSession};

    #[derive(Debug, Clone)]
    pub struct S3Target<'a> {
        pub endpoint: &'a str,
        pub bucket: &'a str,
        pub region: &'a str,
        pub access_key: &'a str,
        pub secret_key: &'a str,
        pub prefix: &'a str,
    }

    #[derive(Debug, Clone)]
    pub struct S3Object {
        pub filename: String,
        pub size_bytes: u64,
        pub last_modified: String,
    }

    fn creds_path(db_name: &str) -> String {
        format!("/tmp/.dockhand-s3-{}.env", db_name)
    }

    fn env_prefix(creds_path: &str) -> String {
        format!("env $(cat {} | xargs)", quote(creds_path))
    }

    async fn write_creds(session: &SshSession, target: &S3Target<'_>, db_name: &str) -> Result<String, BackupError> {
        let path = creds_path(db_name);
        let body = format!(
            "AWS_ACCESS_KEY_ID={}\nAWS_SECRET_ACCESS_KEY={}\n",
            target.access_key, target.secret_key
        );
        session.upload_string(&body, &path).await?;
        session
            .run_checked(&format!("chmod 600 {}", quote(&path)), Duration::from_secs(10))
            .await?;
        Ok(path)
    }

    fn key_for(prefix: &str, filename: &str) -> String {
        if prefix.is_empty() {
            filename.to_string()
        } else {
            format!("{}/{}", prefix.trim_end_matches('/'), filename)
        }
    }

    pub async fn upload_backup_to_s3(
        session: &SshSession,
        local_path: &str,
        target: &S3Target<'_>,
        db_name: &str,
    ) -> Result<(), BackupError> {
        let creds = write_creds(session, target, db_name).await?;
        let filename = local_path.rsplit('/').next().unwrap_or(local_path);
        let key = key_for(target.prefix, filename);
        let cmd = format!(
            "{} aws s3 cp {} s3://{}/{} --endpoint-url {} --region {}",
            env_prefix(&creds),
            quote(local_path),
            target.bucket,
            key,
            quote(target.endpoint),
            quote(target.region),
        );
        session.run_checked(&cmd, Duration::from_secs(300)).await?;
        session.run(&format!("rm -f {}", quote(&creds)), Duration::from_secs(10)).await?;
        Ok(())
    }

    pub async fn download_backup_from_s3(
        session: &SshSession,
        filename: &str,
        target: &S3Target<'_>,
        db_name: &str,
        backup_dir: &str,
    ) -> Result<String, BackupError> {
        let creds = write_creds(session, target, db_name).await?;
        let key = key_for(target.prefix, filename);
        let local_path = format!("{}/{}", backup_dir, filename);
        let cmd = format!(
            "{} aws s3 cp s3://{}/{} {} --endpoint-url {} --region {}",
            env_prefix(&creds),
            target.bucket,
            key,
            quote(&local_path),
            quote(target.endpoint),
            quote(target.region),
        );
        session.run_checked(&cmd, Duration::from_secs(300)).await?;
        session.run(&format!("rm -f {}", quote(&creds)), Duration::from_secs(10)).await?;
        Ok(local_path)
    }

    /// Lists objects under `<prefix>/<db_name>_` and parses `aws s3 ls`'s
    /// fixed-width `date time size filename` output. A non-zero exit (no
    /// objects, missing bucket) yields an empty list.
    pub async fn list_s3_backups(
        session: &SshSession,
        target: &S3Target<'_>,
        db_name: &str,
    ) -> Result<Vec<S3Object>, BackupError> {
        let creds = write_creds(session, target, db_name).await?;
        let key_prefix = key_for(target.prefix, &format!("{}_", db_name));
        let cmd = format!(
            "{} aws s3 ls s3://{}/{} --endpoint-url {} --region {}",
            env_prefix(&creds),
            target.bucket,
            key_prefix,
            quote(target.endpoint),
            quote(target.region),
        );
        let (stdout, _, code) = session.run(&cmd, Duration::from_secs(60)).await?;
        session.run(&format!("rm -f {}", quote(&creds)), Duration::from_secs(10)).await?;

        if code != 0 {
            return Ok(Vec::new());
        }
        Ok(parse_s3_ls(&stdout))
    }

    fn parse_s3_ls(stdout: &str) -> Vec<S3Object> {
        let mut out = Vec::new();
        for line in stdout.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                continue;
            }
            let last_modified = format!("{} {}", fields[0], fields[1]);
            let Ok(size_bytes) = fields[2].parse::<u64>() else {
                continue;
            };
            out.push(S3Object {
                filename: fields[3].to_string(),
                size_bytes,
                last_modified,
            });
        }
        out
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn parses_ls_output_newest_first() {
            let stdout = "2026-02-28 02:00:00    2516582 mydb_20260228_020000.sql.gz\n\
                           2026-02-27 02:00:00    2202009 mydb_20260227_020000.sql.gz\n";
            let objects = parse_s3_ls(stdout);
            assert_eq!(objects.len(), 2);
            assert_eq!(objects[0].filename, "mydb_20260228_020000.sql.gz");
            assert_eq!(objects[0].size_bytes, 2516582);
        }

        #[test]
        fn empty_output_is_empty_list() {
            assert!(parse_s3_ls("").is_empty());
        }

        #[test]
        fn key_joins_prefix_and_filename() {
            assert_eq!(key_for("dockhand/", "mydb_x.sql.gz"), "dockhand/mydb_x.sql.gz");
            assert_eq!(key_for("", "mydb_x.sql.gz"), "mydb_x.sql.gz");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{AppStatus, AppTypeKind, DeployStrategy};
    use chrono::Utc;

    fn db_app(engine: DbEngine) -> App {
        App {
            id: 1,
            server_id: 1,
            name: "pg".into(),
            domain: None,
            container_port: None,
            source_repo: None,
            branch: None,
            image: None,
            compose_manifest: None,
            app_type: AppTypeKind::Db,
            db_engine: Some(engine),
            status: AppStatus::Running,
            webhook_secret: None,
            auto_deploy: false,
            cpu_limit: None,
            mem_limit: None,
            health_check_url: None,
            health_check_interval: None,
            replica_count: 1,
            deploy_strategy: DeployStrategy::Restart,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn generated_script_includes_dump_and_retention_sweep() {
        let app = db_app(DbEngine::Postgres);
        let script = generate_backup_script(&app, "/opt/dockhand/backups", 7).unwrap();
        assert!(script.starts_with("#!/usr/bin/env bash"));
        assert!(script.contains("pg_dump -U pg pg"));
        assert!(script.contains("-mtime +7 -delete"));
    }

    #[test]
    fn non_database_app_is_rejected() {
        let mut app = db_app(DbEngine::Postgres);
        app.db_engine = None;
        assert!(matches!(
            generate_backup_script(&app, "/tmp", 7),
            Err(BackupError::NotADatabase(_))
        ));
    }
}
