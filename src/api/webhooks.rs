use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::db::repo;
use crate::error::{Error, Result};
use crate::webhooks::VALID_EVENTS;

use super::AppState;

pub async fn list(State(core): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(repo::list_webhooks(&core.pool).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    pub url: String,
    pub events: Vec<String>,
    pub secret: Option<String>,
}

pub async fn create(State(core): State<AppState>, Json(body): Json<CreateWebhookRequest>) -> Result<impl IntoResponse> {
    if body.events.is_empty() {
        return Err(Error::Validation("webhook must subscribe to at least one event".into()));
    }
    if let Some(bad) = body.events.iter().find(|e| !VALID_EVENTS.contains(&e.as_str())) {
        return Err(Error::Validation(format!("unknown event '{}'", bad)));
    }
    let webhook = repo::create_webhook(&core.pool, &body.url, &body.events.join(","), body.secret.as_deref()).await?;
    Ok(Json(webhook))
}

pub async fn delete(State(core): State<AppState>, Path(id): Path<i64>) -> Result<impl IntoResponse> {
    repo::delete_webhook(&core.pool, id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
