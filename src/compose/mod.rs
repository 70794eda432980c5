//! Pure function from an app descriptor to a compose manifest string.
//! Identical inputs yield byte-identical output — no I/O, no clock, no
//! randomness in this module.

use serde::Serialize;

use crate::config::validate::{self, ValidationError};
use crate::db::models::{App, AppTypeKind, DbEngine};

const NETWORK_NAME: &str = "dockhand";

#[derive(Debug, Clone, Serialize)]
pub struct ResourceLimits {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

/// Validates the subset of an App's fields the renderer interpolates,
/// before any string is built — the same rule the Deploy State Machine's
/// `validate` step relies on to guarantee no remote side effects happen on
/// bad input.
pub fn validate_app(app: &App) -> Result<(), ValidationError> {
    validate::app_name(&app.name)?;
    if let Some(branch) = &app.branch {
        validate::branch(branch)?;
    }
    if let Some(domain) = &app.domain {
        validate::domain(domain)?;
    }
    if let Some(repo) = &app.source_repo {
        validate::repo_url(repo)?;
    }
    Ok(())
}

fn env_port_var(app_name: &str) -> String {
    format!("{}_PORT", app_name.to_uppercase().replace(['-', '.'], "_"))
}

fn resources_block(cpu: &Option<String>, memory: &Option<String>) -> String {
    if cpu.is_none() && memory.is_none() {
        return String::new();
    }
    let mut limits = String::new();
    if let Some(cpu) = cpu {
        limits.push_str(&format!("          cpus: \"{}\"\n", cpu));
    }
    if let Some(memory) = memory {
        limits.push_str(&format!("          memory: {}\n", memory));
    }
    format!(
        "    deploy:\n      resources:\n        limits:\n{}",
        limits
    )
}

/// Renders the compose manifest for a regular (non-database) app. Output
/// always includes: a single service named by the app, a container named
/// `dockhand-<app>`, attachment to the shared external `dockhand` network,
/// a restart-unless-stopped policy, an `.env` reference, and the
/// `<APP>_PORT` environment variable. For image apps `image:` is set; for
/// source-repo apps `build:` is set instead — never both.
pub fn render_app(app: &App, image_used: Option<&str>) -> Result<String, ValidationError> {
    validate_app(app)?;

    let port = app.container_port.unwrap_or(8080);
    let port_var = env_port_var(&app.name);
    let resources = resources_block(&app.cpu_limit, &app.mem_limit);

    let image_or_build = match app.app_type {
        AppTypeKind::Image => {
            let image = image_used.unwrap_or_else(|| app.image.as_deref().unwrap_or("unknown"));
            format!("    image: {}\n", image)
        }
        AppTypeKind::Git => "    build:\n      context: ./repo\n".to_string(),
        AppTypeKind::Compose => unreachable!("compose apps upload their inline manifest verbatim"),
        AppTypeKind::Db => unreachable!("database apps are rendered by render_db"),
    };

    Ok(format!(
        "services:\n  {name}:\n{image_or_build}    container_name: dockhand-{name}\n    restart: unless-stopped\n    env_file:\n      - .env\n    environment:\n      {port_var}: \"{port}\"\n    ports:\n      - \"{port}:{port}\"\n    networks:\n      - {network}\n{resources}\nnetworks:\n  {network}:\n    external: true\n",
        name = app.name,
        image_or_build = image_or_build,
        port_var = port_var,
        port = port,
        network = NETWORK_NAME,
        resources = resources,
    ))
}

/// Database manifests follow the same shape with an additional volume
/// declaration and engine-specific environment variables. The password
/// variables the Backup Engine reads back with `docker exec printenv` (never
/// rendered into the manifest itself, per the spec's dump/restore command
/// table) are left to flow through from the app's own `.env` upload — the
/// `environment:` block here only ever declares the non-secret database
/// name/user so it can't collide with whatever `.env` sets.
pub fn render_db(app: &App, engine: DbEngine) -> Result<String, ValidationError> {
    validate::app_name(&app.name)?;

    let port = engine.default_port();
    let volume = engine.volume_path();
    let image = match engine {
        DbEngine::Postgres => "postgres:16-alpine",
        DbEngine::Mysql => "mysql:8",
        DbEngine::Redis => "redis:7-alpine",
        DbEngine::Mongo => "mongo:7",
    };
    let env = match engine {
        DbEngine::Postgres => format!(
            "      POSTGRES_DB: {name}\n      POSTGRES_USER: {name}\n",
            name = app.name
        ),
        DbEngine::Mysql => format!(
            "      MYSQL_DATABASE: {name}\n      MYSQL_USER: {name}\n",
            name = app.name
        ),
        DbEngine::Redis => String::new(),
        DbEngine::Mongo => format!(
            "      MONGO_INITDB_DATABASE: {name}\n",
            name = app.name
        ),
    };

    let environment_block = if env.is_empty() { String::new() } else { format!("    environment:\n{}", env) };

    Ok(format!(
        "services:\n  {name}:\n    image: {image}\n    container_name: dockhand-db-{name}\n    restart: unless-stopped\n    env_file:\n      - .env\n{environment_block}    volumes:\n      - {name}_data:{volume}\n    networks:\n      - {network}\n\nvolumes:\n  {name}_data:\n\nnetworks:\n  {network}:\n    external: true\n",
        name = app.name,
        image = image,
        environment_block = environment_block,
        volume = volume,
        network = NETWORK_NAME,
        port = port,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{AppStatus, DeployStrategy};
    use chrono::Utc;

    fn sample_app(app_type: AppTypeKind) -> App {
        App {
            id: 1,
            server_id: 1,
            name: "api".into(),
            domain: Some("api.example.com".into()),
            container_port: Some(80),
            source_repo: None,
            branch: None,
            image: Some("nginx:1.25".into()),
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
    fn render_is_deterministic() {
        let app = sample_app(AppTypeKind::Image);
        let a = render_app(&app, Some("nginx:1.25")).unwrap();
        let b = render_app(&app, Some("nginx:1.25")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn image_app_sets_image_not_build() {
        let app = sample_app(AppTypeKind::Image);
        let rendered = render_app(&app, Some("nginx:1.25")).unwrap();
        assert!(rendered.contains("image: nginx:1.25"));
        assert!(!rendered.contains("build:"));
        let doc: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
        let services = doc.get("services").unwrap().as_mapping().unwrap();
        assert_eq!(services.len(), 1);
        assert!(rendered.contains("container_name: dockhand-api"));
        assert!(rendered.contains("external: true"));
    }

    #[test]
    fn git_app_sets_build_not_image() {
        let app = sample_app(AppTypeKind::Git);
        let rendered = render_app(&app, None).unwrap();
        assert!(rendered.contains("build:"));
        assert!(!rendered.contains("image:"));
    }

    #[test]
    fn rejects_invalid_app_name() {
        let mut app = sample_app(AppTypeKind::Image);
        app.name = "-bad".into();
        assert!(render_app(&app, None).is_err());
    }

    #[test]
    fn db_render_includes_volume_and_engine_env() {
        let mut app = sample_app(AppTypeKind::Db);
        app.name = "pg".into();
        let rendered = render_db(&app, DbEngine::Postgres).unwrap();
        assert!(rendered.contains("POSTGRES_DB: pg"));
        assert!(rendered.contains("pg_data:/var/lib/postgresql/data"));
    }
}
