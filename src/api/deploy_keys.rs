use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::auth::deploy_keys;
use crate::error::Result;

use super::AppState;

pub async fn list(State(core): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(deploy_keys::list(&core.home)?))
}

#[derive(Debug, Deserialize)]
pub struct CreateDeployKeyRequest {
    pub label: String,
}

/// Returns the plaintext key exactly once — only its hash is ever
/// persisted, so a caller that loses this response has to revoke and
/// re-generate rather than retrieve it again.
pub async fn create(State(core): State<AppState>, Json(body): Json<CreateDeployKeyRequest>) -> Result<impl IntoResponse> {
    let key = deploy_keys::generate(&core.home, &body.label)?;
    Ok(Json(serde_json::json!({"label": body.label, "key": key})))
}

pub async fn revoke(State(core): State<AppState>, Path(label): Path<String>) -> Result<impl IntoResponse> {
    deploy_keys::revoke(&core.home, &label)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
