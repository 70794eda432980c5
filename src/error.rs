use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Top-level error kind, matching the taxonomy every module's local
/// `thiserror` enum is mapped into at the API boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("remote failure: {0}")]
    Remote(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Remote(_) => StatusCode::BAD_GATEWAY,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if matches!(status, StatusCode::INTERNAL_SERVER_ERROR | StatusCode::BAD_GATEWAY) {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(ErrorBody { detail: self.to_string() })).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Error::NotFound("record not found".into()),
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<crate::ssh::ExecError> for Error {
    fn from(e: crate::ssh::ExecError) -> Self {
        Error::Remote(e.to_string())
    }
}

impl From<crate::reconcile::ReconcileError> for Error {
    fn from(e: crate::reconcile::ReconcileError) -> Self {
        Error::Remote(e.to_string())
    }
}

impl From<crate::backup::BackupError> for Error {
    fn from(e: crate::backup::BackupError) -> Self {
        Error::Remote(e.to_string())
    }
}

impl From<crate::proxy::ProxyError> for Error {
    fn from(e: crate::proxy::ProxyError) -> Self {
        match e {
            crate::proxy::ProxyError::Validation(v) => Error::Validation(v.to_string()),
            other => Error::Remote(other.to_string()),
        }
    }
}

impl From<crate::auth::deploy_keys::DeployKeyError> for Error {
    fn from(e: crate::auth::deploy_keys::DeployKeyError) -> Self {
        use crate::auth::deploy_keys::DeployKeyError as D;
        match e {
            D::LabelTaken(l) => Error::Conflict(format!("deploy key '{}' already exists", l)),
            D::NotFound(l) => Error::NotFound(format!("deploy key '{}'", l)),
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<crate::deploy::DeploymentError> for Error {
    fn from(e: crate::deploy::DeploymentError) -> Self {
        use crate::deploy::DeploymentError as D;
        let msg = e.to_string();
        match e {
            D::Validation(m) => Error::Validation(m),
            D::AlreadyInProgress => Error::Conflict(msg),
            D::Remote(_) | D::Timeout(_) | D::HealthCheckFailed(_) => Error::Remote(msg),
            D::Internal(m) => Error::Internal(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
