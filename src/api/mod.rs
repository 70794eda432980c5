//! HTTP API: one axum router, mounted by `dockhand serve`. Every route
//! except the two webhook-ingest endpoints requires either the platform
//! key or a scoped deploy key in `X-API-Key`; the webhook endpoints
//! authenticate the request body itself via HMAC instead.

pub mod apps;
pub mod backups;
pub mod deploy_keys;
pub mod deploys;
pub mod proxy;
pub mod push;
pub mod selfupdate;
pub mod servers;
pub mod webhooks;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::core::Core;

pub type AppState = Arc<Core>;

/// The credential a request authenticated with, attached to
/// [`axum::http::Request`] extensions so a handler can tell a full
/// platform-key caller apart from a deploy key scoped to `deploy` only.
#[derive(Debug, Clone)]
pub enum Principal {
    Platform,
    DeployKey { label: String, scopes: Vec<String> },
}

impl Principal {
    pub fn can_deploy(&self) -> bool {
        match self {
            Principal::Platform => true,
            Principal::DeployKey { scopes, .. } => scopes.iter().any(|s| s == "deploy"),
        }
    }
}

async fn require_api_key(State(core): State<AppState>, mut req: Request, next: Next) -> Response {
    let presented = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let Some(presented) = presented else {
        return (StatusCode::UNAUTHORIZED, "missing X-API-Key header").into_response();
    };

    let platform_key = match auth::get_or_create_api_key(&core.home) {
        Ok(k) => k,
        Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, "auth unavailable").into_response(),
    };

    if auth::verify_api_key(&presented, &platform_key) {
        req.extensions_mut().insert(Principal::Platform);
        return next.run(req).await;
    }

    match auth::deploy_keys::validate(&core.home, &presented) {
        Ok(Some(record)) => {
            req.extensions_mut()
                .insert(Principal::DeployKey { label: record.label, scopes: record.scopes });
            next.run(req).await
        }
        _ => (StatusCode::UNAUTHORIZED, "invalid API key").into_response(),
    }
}

/// Every management endpoint except the deploy-trigger pair accepts only
/// the platform key — a scoped deploy key that authenticates fine against
/// `require_api_key` must still be rejected here. Must run after
/// `require_api_key` so `Principal` is already in the request extensions.
async fn require_platform(req: Request, next: Next) -> Response {
    let is_platform = matches!(req.extensions().get::<Principal>(), Some(Principal::Platform));
    if !is_platform {
        return (StatusCode::FORBIDDEN, "this endpoint requires the platform key").into_response();
    }
    next.run(req).await
}

fn cors_layer(config: &crate::config::PlatformConfig) -> CorsLayer {
    if config.cors_origins.is_empty() {
        CorsLayer::new().allow_origin(AllowOrigin::mirror_request())
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    }
    .allow_methods(tower_http::cors::Any)
    .allow_headers(tower_http::cors::Any)
}

pub fn router(core: AppState) -> Router {
    // Accepts the platform key OR any non-revoked deploy key scoped `deploy`
    // (the handlers themselves check `Principal::can_deploy`).
    let deploy_triggerable = Router::new()
        .route("/apps/:id/deploy", post(deploys::trigger))
        .route("/apps/:id/rollback", post(deploys::rollback));

    // Everything else is a management operation and accepts only the
    // platform key, even though `require_api_key` would happily authenticate
    // a deploy key too — `require_platform` is what actually enforces the
    // narrower scope here.
    let platform_only = Router::new()
        .route("/servers", get(servers::list).post(servers::create))
        .route("/servers/:id", get(servers::get).delete(servers::delete))
        .route("/servers/:id/provision", post(servers::provision))
        .route("/servers/:id/wipe", post(servers::wipe))
        .route("/apps", get(apps::list).post(apps::create))
        .route("/apps/:id", get(apps::get).delete(apps::delete))
        .route("/apps/:id/status", get(apps::status))
        .route("/apps/:id/deployments", get(deploys::list))
        .route("/deployments/:id", get(deploys::get))
        .route("/deployments/:id/logs", get(deploys::logs_sse))
        .route("/apps/:id/env", get(apps::get_env).put(apps::put_env))
        .route("/proxy/domains", get(proxy::list))
        .route("/proxy/domains/:domain", post(proxy::add).delete(proxy::remove))
        .route("/apps/:id/backups", get(backups::list).post(backups::trigger))
        .route("/apps/:app_id/backups/:name/restore", post(backups::restore))
        .route("/apps/:id/backup-schedule", post(backups::install_schedule).delete(backups::remove_schedule))
        .route("/webhooks", get(webhooks::list).post(webhooks::create))
        .route("/webhooks/:id", delete(webhooks::delete))
        .route("/deploy-keys", get(deploy_keys::list).post(deploy_keys::create))
        .route("/deploy-keys/:label", delete(deploy_keys::revoke))
        .route_layer(middleware::from_fn(require_platform));

    let protected = deploy_triggerable
        .merge(platform_only)
        .route_layer(middleware::from_fn_with_state(core.clone(), require_api_key));

    let public = Router::new()
        .route("/webhooks/push", post(push::ingest))
        .route("/webhooks/self-update", post(selfupdate::ingest))
        .route("/healthz", get(|| async { "ok" }));

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(cors_layer(&core.config))
        .layer(TraceLayer::new_for_http())
        .with_state(core)
}
