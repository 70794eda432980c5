use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Inactive,
    Provisioning,
    Active,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    Stopped,
    Running,
    Error,
    Restarting,
    Deploying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeployStrategy {
    Restart,
    Rolling,
}

/// Deployable kind. `db:<engine>` in the source model is represented here
/// as a distinct `Db` variant carrying the engine tag in a sibling column
/// (`db_engine`), rather than smuggling it into the type string — a closed
/// enumeration in both dimensions instead of a tagged string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AppTypeKind {
    Image,
    Git,
    Compose,
    Db,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DbEngine {
    Postgres,
    Mysql,
    Redis,
    Mongo,
}

impl DbEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbEngine::Postgres => "postgres",
            DbEngine::Mysql => "mysql",
            DbEngine::Redis => "redis",
            DbEngine::Mongo => "mongo",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            DbEngine::Postgres => 5432,
            DbEngine::Mysql => 3306,
            DbEngine::Redis => 6379,
            DbEngine::Mongo => 27017,
        }
    }

    pub fn volume_path(&self) -> &'static str {
        match self {
            DbEngine::Postgres => "/var/lib/postgresql/data",
            DbEngine::Mysql => "/var/lib/mysql",
            DbEngine::Redis => "/data",
            DbEngine::Mongo => "/data/db",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    InProgress,
    Success,
    Failed,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Server {
    pub id: i64,
    pub name: String,
    pub host_address: String,
    pub ssh_port: i64,
    pub ssh_user: String,
    pub ssh_key_path: Option<String>,
    pub status: ServerStatus,
    pub provider: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct App {
    pub id: i64,
    pub server_id: i64,
    pub name: String,
    pub domain: Option<String>,
    pub container_port: Option<i64>,
    pub source_repo: Option<String>,
    pub branch: Option<String>,
    pub image: Option<String>,
    /// Verbatim compose manifest for `AppTypeKind::Compose` apps — written
    /// to the remote app directory as-is rather than rendered, per the
    /// "(inline compose)" branch of the App data model's "exactly one of
    /// (image), (source-repo), (inline compose)" invariant.
    pub compose_manifest: Option<String>,
    pub app_type: AppTypeKind,
    pub db_engine: Option<DbEngine>,
    pub status: AppStatus,
    pub webhook_secret: Option<String>,
    pub auto_deploy: bool,
    pub cpu_limit: Option<String>,
    pub mem_limit: Option<String>,
    pub health_check_url: Option<String>,
    pub health_check_interval: Option<i64>,
    pub replica_count: i64,
    pub deploy_strategy: DeployStrategy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl App {
    /// Whether this row is a database app, excluded from the regular app
    /// listing per the `db:<engine>` invariant in the data model.
    pub fn is_database(&self) -> bool {
        matches!(self.app_type, AppTypeKind::Db)
    }

    pub fn container_name(&self) -> String {
        if self.is_database() {
            format!("dockhand-db-{}", self.name)
        } else {
            format!("dockhand-{}", self.name)
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Deployment {
    pub id: i64,
    pub app_id: i64,
    pub status: DeploymentStatus,
    pub commit_hash: Option<String>,
    pub image_used: Option<String>,
    pub log: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Webhook {
    pub id: i64,
    pub url: String,
    pub events: String,
    pub secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Webhook {
    pub fn subscribes_to(&self, event: &str) -> bool {
        self.events.split(',').any(|e| e.trim() == event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_app(app_type: AppTypeKind) -> App {
        App {
            id: 1,
            server_id: 1,
            name: "api".into(),
            domain: None,
            container_port: Some(80),
            source_repo: None,
            branch: None,
            image: None,
            compose_manifest: None,
            app_type,
            db_engine: None,
            status: AppStatus::Stopped,
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
    fn container_name_is_prefixed_differently_for_database_apps() {
        assert_eq!(sample_app(AppTypeKind::Image).container_name(), "dockhand-api");
        assert_eq!(sample_app(AppTypeKind::Db).container_name(), "dockhand-db-api");
    }

    #[test]
    fn webhook_subscribes_to_matches_comma_joined_events() {
        let hook = Webhook {
            id: 1,
            url: "https://example.com/hook".into(),
            events: "deploy.success, deploy.failure".into(),
            secret: None,
            created_at: Utc::now(),
        };
        assert!(hook.subscribes_to("deploy.success"));
        assert!(hook.subscribes_to("deploy.failure"));
        assert!(!hook.subscribes_to("deploy.rollback"));
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct SourceIntegration {
    pub id: i64,
    pub username: String,
    pub token_encrypted: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ObjectStoreConfig {
    pub id: i64,
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key_encrypted: String,
    pub key_prefix: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ServerMetric {
    pub id: i64,
    pub server_id: i64,
    pub recorded_at: DateTime<Utc>,
    pub cpu_percent: Option<f64>,
    pub mem_percent: Option<f64>,
    pub disk_percent: Option<f64>,
}
