use chrono::Utc;
use sqlx::SqlitePool;

use super::models::*;
use crate::error::{Error, Result};

// --- Server -----------------------------------------------------------

pub async fn create_server(
    pool: &SqlitePool,
    name: &str,
    host_address: &str,
    ssh_port: i64,
    ssh_user: &str,
    ssh_key_path: Option<&str>,
    provider: Option<&str>,
) -> Result<Server> {
    let now = Utc::now();
    let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM servers WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        return Err(Error::Conflict(format!("server '{}' already exists", name)));
    }

    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO servers (name, host_address, ssh_port, ssh_user, ssh_key_path, status, provider, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, 'inactive', ?, ?, ?) RETURNING id",
    )
    .bind(name)
    .bind(host_address)
    .bind(ssh_port)
    .bind(ssh_user)
    .bind(ssh_key_path)
    .bind(provider)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    get_server(pool, id).await
}

pub async fn get_server(pool: &SqlitePool, id: i64) -> Result<Server> {
    sqlx::query_as::<_, Server>("SELECT * FROM servers WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("server {}", id)))
}

pub async fn get_server_by_name(pool: &SqlitePool, name: &str) -> Result<Server> {
    sqlx::query_as::<_, Server>("SELECT * FROM servers WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("server '{}'", name)))
}

pub async fn list_servers(pool: &SqlitePool) -> Result<Vec<Server>> {
    Ok(sqlx::query_as::<_, Server>("SELECT * FROM servers ORDER BY name")
        .fetch_all(pool)
        .await?)
}

pub async fn set_server_status(pool: &SqlitePool, id: i64, status: ServerStatus) -> Result<()> {
    sqlx::query("UPDATE servers SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Deletes a server and cascades to its apps and their deployments inside
/// one transaction, so there is no window for an orphan `App` row — the
/// atomic-cascade resolution recorded in DESIGN.md for the source spec's
/// "orphan app row" open question.
pub async fn delete_server(pool: &SqlitePool, id: i64) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "DELETE FROM deployments WHERE app_id IN (SELECT id FROM apps WHERE server_id = ?)",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM apps WHERE server_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let affected = sqlx::query("DELETE FROM servers WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if affected == 0 {
        tx.rollback().await?;
        return Err(Error::NotFound(format!("server {}", id)));
    }
    tx.commit().await?;
    Ok(())
}

// --- App ----------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
pub async fn create_app(
    pool: &SqlitePool,
    server_id: i64,
    name: &str,
    domain: Option<&str>,
    container_port: Option<i64>,
    source_repo: Option<&str>,
    branch: Option<&str>,
    image: Option<&str>,
    compose_manifest: Option<&str>,
    app_type: AppTypeKind,
    db_engine: Option<DbEngine>,
    auto_deploy: bool,
    deploy_strategy: DeployStrategy,
) -> Result<App> {
    let now = Utc::now();
    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM apps WHERE server_id = ? AND name = ?",
    )
    .bind(server_id)
    .bind(name)
    .fetch_one(pool)
    .await?;
    if existing > 0 {
        return Err(Error::Conflict(format!(
            "app '{}' already exists on this server",
            name
        )));
    }

    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO apps (server_id, name, domain, container_port, source_repo, branch, image,
                            compose_manifest, app_type, db_engine, status, auto_deploy, deploy_strategy,
                            created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'stopped', ?, ?, ?, ?) RETURNING id",
    )
    .bind(server_id)
    .bind(name)
    .bind(domain)
    .bind(container_port)
    .bind(source_repo)
    .bind(branch)
    .bind(image)
    .bind(compose_manifest)
    .bind(app_type)
    .bind(db_engine)
    .bind(auto_deploy)
    .bind(deploy_strategy)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;

    get_app(pool, id).await
}

pub async fn get_app(pool: &SqlitePool, id: i64) -> Result<App> {
    sqlx::query_as::<_, App>("SELECT * FROM apps WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("app {}", id)))
}

pub async fn get_app_by_name(pool: &SqlitePool, server_id: i64, name: &str) -> Result<App> {
    sqlx::query_as::<_, App>("SELECT * FROM apps WHERE server_id = ? AND name = ?")
        .bind(server_id)
        .bind(name)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("app '{}'", name)))
}

/// Excludes `db:<engine>` rows, matching the invariant that database apps
/// are excluded from the regular app listing.
pub async fn list_apps(pool: &SqlitePool, server_id: Option<i64>) -> Result<Vec<App>> {
    let rows = match server_id {
        Some(id) => {
            sqlx::query_as::<_, App>(
                "SELECT * FROM apps WHERE app_type != 'db' AND server_id = ? ORDER BY name",
            )
            .bind(id)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, App>("SELECT * FROM apps WHERE app_type != 'db' ORDER BY name")
                .fetch_all(pool)
                .await?
        }
    };
    Ok(rows)
}

pub async fn list_apps_by_repo_branch(
    pool: &SqlitePool,
    repo: &str,
    branch: &str,
) -> Result<Vec<App>> {
    Ok(sqlx::query_as::<_, App>(
        "SELECT * FROM apps WHERE source_repo = ? AND branch = ?",
    )
    .bind(repo)
    .bind(branch)
    .fetch_all(pool)
    .await?)
}

pub async fn set_app_status(pool: &SqlitePool, id: i64, status: AppStatus) -> Result<()> {
    sqlx::query("UPDATE apps SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_app(pool: &SqlitePool, id: i64) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM deployments WHERE app_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let affected = sqlx::query("DELETE FROM apps WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if affected == 0 {
        tx.rollback().await?;
        return Err(Error::NotFound(format!("app {}", id)));
    }
    tx.commit().await?;
    Ok(())
}

// --- Deployment -----------------------------------------------------------

pub async fn create_deployment(pool: &SqlitePool, app_id: i64) -> Result<Deployment> {
    let now = Utc::now();
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO deployments (app_id, status, log, started_at) VALUES (?, 'in_progress', '', ?) RETURNING id",
    )
    .bind(app_id)
    .bind(now)
    .fetch_one(pool)
    .await?;
    get_deployment(pool, id).await
}

pub async fn get_deployment(pool: &SqlitePool, id: i64) -> Result<Deployment> {
    sqlx::query_as::<_, Deployment>("SELECT * FROM deployments WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("deployment {}", id)))
}

pub async fn list_deployments(pool: &SqlitePool, app_id: i64) -> Result<Vec<Deployment>> {
    Ok(sqlx::query_as::<_, Deployment>(
        "SELECT * FROM deployments WHERE app_id = ? ORDER BY started_at DESC",
    )
    .bind(app_id)
    .fetch_all(pool)
    .await?)
}

/// The most recent successful deployment's commit hash is the implicit
/// rollback target.
pub async fn last_successful_commit(pool: &SqlitePool, app_id: i64) -> Result<Option<String>> {
    Ok(sqlx::query_scalar::<_, Option<String>>(
        "SELECT commit_hash FROM deployments WHERE app_id = ? AND status = 'success'
         ORDER BY started_at DESC LIMIT 1",
    )
    .bind(app_id)
    .fetch_optional(pool)
    .await?
    .flatten())
}

pub async fn finish_deployment(
    pool: &SqlitePool,
    id: i64,
    status: DeploymentStatus,
    commit_hash: Option<&str>,
    image_used: Option<&str>,
    log: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE deployments SET status = ?, commit_hash = ?, image_used = ?, log = ?, finished_at = ? WHERE id = ?",
    )
    .bind(status)
    .bind(commit_hash)
    .bind(image_used)
    .bind(log)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

// --- Webhook (outbound subscriptions) --------------------------------------

pub async fn create_webhook(
    pool: &SqlitePool,
    url: &str,
    events: &str,
    secret: Option<&str>,
) -> Result<Webhook> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO webhooks (url, events, secret, created_at) VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(url)
    .bind(events)
    .bind(secret)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    get_webhook(pool, id).await
}

pub async fn get_webhook(pool: &SqlitePool, id: i64) -> Result<Webhook> {
    sqlx::query_as::<_, Webhook>("SELECT * FROM webhooks WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("webhook {}", id)))
}

pub async fn list_webhooks(pool: &SqlitePool) -> Result<Vec<Webhook>> {
    Ok(sqlx::query_as::<_, Webhook>("SELECT * FROM webhooks ORDER BY id")
        .fetch_all(pool)
        .await?)
}

pub async fn delete_webhook(pool: &SqlitePool, id: i64) -> Result<()> {
    let affected = sqlx::query("DELETE FROM webhooks WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?
        .rows_affected();
    if affected == 0 {
        return Err(Error::NotFound(format!("webhook {}", id)));
    }
    Ok(())
}

// --- SourceIntegration (singleton) -----------------------------------------

pub async fn get_source_integration(pool: &SqlitePool) -> Result<Option<SourceIntegration>> {
    Ok(sqlx::query_as::<_, SourceIntegration>(
        "SELECT * FROM source_integration WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?)
}

pub async fn upsert_source_integration(
    pool: &SqlitePool,
    username: &str,
    token_encrypted: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO source_integration (id, username, token_encrypted, updated_at) VALUES (1, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET username = excluded.username, token_encrypted = excluded.token_encrypted, updated_at = excluded.updated_at",
    )
    .bind(username)
    .bind(token_encrypted)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

// --- ObjectStoreConfig (singleton) -----------------------------------------

pub async fn get_object_store_config(pool: &SqlitePool) -> Result<Option<ObjectStoreConfig>> {
    Ok(sqlx::query_as::<_, ObjectStoreConfig>(
        "SELECT * FROM object_store_config WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?)
}

#[allow(clippy::too_many_arguments)]
pub async fn upsert_object_store_config(
    pool: &SqlitePool,
    endpoint: &str,
    bucket: &str,
    region: &str,
    access_key: &str,
    secret_key_encrypted: &str,
    key_prefix: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO object_store_config (id, endpoint, bucket, region, access_key, secret_key_encrypted, key_prefix, updated_at)
         VALUES (1, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET endpoint = excluded.endpoint, bucket = excluded.bucket,
            region = excluded.region, access_key = excluded.access_key,
            secret_key_encrypted = excluded.secret_key_encrypted, key_prefix = excluded.key_prefix,
            updated_at = excluded.updated_at",
    )
    .bind(endpoint)
    .bind(bucket)
    .bind(region)
    .bind(access_key)
    .bind(secret_key_encrypted)
    .bind(key_prefix)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

// --- ServerMetric -----------------------------------------------------------

pub async fn insert_server_metric(
    pool: &SqlitePool,
    server_id: i64,
    cpu_percent: Option<f64>,
    mem_percent: Option<f64>,
    disk_percent: Option<f64>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO server_metrics (server_id, recorded_at, cpu_percent, mem_percent, disk_percent)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(server_id)
    .bind(Utc::now())
    .bind(cpu_percent)
    .bind(mem_percent)
    .bind(disk_percent)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn recent_server_metrics(
    pool: &SqlitePool,
    server_id: i64,
    limit: i64,
) -> Result<Vec<ServerMetric>> {
    Ok(sqlx::query_as::<_, ServerMetric>(
        "SELECT * FROM server_metrics WHERE server_id = ? ORDER BY recorded_at DESC LIMIT ?",
    )
    .bind(server_id)
    .bind(limit)
    .fetch_all(pool)
    .await?)
}

/// Prunes metric rows past the retention window. Not named by the data
/// model, but present in the original and harmless to keep — see
/// DESIGN.md.
pub async fn prune_server_metrics(pool: &SqlitePool, older_than_days: i64) -> Result<u64> {
    let cutoff = Utc::now() - chrono::Duration::days(older_than_days);
    let affected = sqlx::query("DELETE FROM server_metrics WHERE recorded_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?
        .rows_affected();
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    async fn seed_server(pool: &SqlitePool) -> Server {
        create_server(pool, "prod", "10.0.0.1", 22, "deploy", None, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn duplicate_server_name_is_a_conflict() {
        let pool = test_pool().await;
        seed_server(&pool).await;
        let err = create_server(&pool, "prod", "10.0.0.2", 22, "deploy", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn duplicate_app_name_on_same_server_is_a_conflict() {
        let pool = test_pool().await;
        let server = seed_server(&pool).await;
        create_app(
            &pool, server.id, "api", None, Some(80), None, None, Some("nginx:1.25"),
            None, AppTypeKind::Image, None, false, DeployStrategy::Restart,
        )
        .await
        .unwrap();
        let err = create_app(
            &pool, server.id, "api", None, Some(81), None, None, Some("nginx:1.26"),
            None, AppTypeKind::Image, None, false, DeployStrategy::Restart,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn list_apps_excludes_database_apps() {
        let pool = test_pool().await;
        let server = seed_server(&pool).await;
        create_app(
            &pool, server.id, "api", None, Some(80), None, None, Some("nginx:1.25"),
            None, AppTypeKind::Image, None, false, DeployStrategy::Restart,
        )
        .await
        .unwrap();
        create_app(
            &pool, server.id, "pg", None, None, None, None, None,
            None, AppTypeKind::Db, Some(DbEngine::Postgres), false, DeployStrategy::Restart,
        )
        .await
        .unwrap();

        let apps = list_apps(&pool, Some(server.id)).await.unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].name, "api");
    }

    #[tokio::test]
    async fn deleting_a_server_cascades_to_apps_and_deployments() {
        let pool = test_pool().await;
        let server = seed_server(&pool).await;
        let app = create_app(
            &pool, server.id, "api", None, Some(80), None, None, Some("nginx:1.25"),
            None, AppTypeKind::Image, None, false, DeployStrategy::Restart,
        )
        .await
        .unwrap();
        create_deployment(&pool, app.id).await.unwrap();

        delete_server(&pool, server.id).await.unwrap();

        assert!(matches!(get_server(&pool, server.id).await, Err(Error::NotFound(_))));
        assert!(matches!(get_app(&pool, app.id).await, Err(Error::NotFound(_))));
        assert!(list_deployments(&pool, app.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_missing_server_is_not_found_and_leaves_other_rows_intact() {
        let pool = test_pool().await;
        let server = seed_server(&pool).await;
        assert!(matches!(delete_server(&pool, server.id + 1).await, Err(Error::NotFound(_))));
        assert!(get_server(&pool, server.id).await.is_ok());
    }

    #[tokio::test]
    async fn last_successful_commit_ignores_failed_and_in_progress_deployments() {
        let pool = test_pool().await;
        let server = seed_server(&pool).await;
        let app = create_app(
            &pool, server.id, "api", None, None, Some("https://example.com/org/repo.git"),
            Some("main"), None, None, AppTypeKind::Git, None, false, DeployStrategy::Restart,
        )
        .await
        .unwrap();

        let d1 = create_deployment(&pool, app.id).await.unwrap();
        finish_deployment(&pool, d1.id, DeploymentStatus::Success, Some("aaa111"), None, "ok")
            .await
            .unwrap();
        let d2 = create_deployment(&pool, app.id).await.unwrap();
        finish_deployment(&pool, d2.id, DeploymentStatus::Failed, None, None, "boom")
            .await
            .unwrap();
        create_deployment(&pool, app.id).await.unwrap();

        assert_eq!(last_successful_commit(&pool, app.id).await.unwrap(), Some("aaa111".to_string()));
    }

    #[tokio::test]
    async fn object_store_config_upsert_replaces_the_singleton_row() {
        let pool = test_pool().await;
        upsert_object_store_config(&pool, "https://s3.example.com", "bucket-a", "us-east-1", "AKIA", "enc1", None)
            .await
            .unwrap();
        upsert_object_store_config(&pool, "https://s3.example.com", "bucket-b", "us-east-1", "AKIA", "enc2", Some("pre/"))
            .await
            .unwrap();

        let cfg = get_object_store_config(&pool).await.unwrap().unwrap();
        assert_eq!(cfg.bucket, "bucket-b");
        assert_eq!(cfg.key_prefix.as_deref(), Some("pre/"));
    }
}
