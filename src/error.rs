//! API error taxonomy and its HTTP rendering.
//!
//! Every handler returns `Result<_, ApiError>`. The `IntoResponse` impl is
//! the single place where internal failures are mapped to wire responses,
//! so detail never leaks by accident: auth sub-reasons are logged but the
//! client always sees the same generic 401, and ownership mismatches render
//! as the exact same 404 as a missing row.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Field-level detail carried by a 422 response.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed input — 422 with per-field detail.
    #[error("validation failed")]
    Validation(Vec<FieldError>),

    /// Duplicate unique key — 409.
    #[error("{0}")]
    Conflict(String),

    /// Bad credentials or an invalid/expired token — 401. The reason stays
    /// server-side; exposing it would let callers enumerate accounts or
    /// distinguish expired from forged tokens.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Authenticated but not the owner of the addressed sighting.
    /// Rendered identically to a missing sighting (404) so non-owners
    /// cannot probe which ids exist.
    #[error("ownership denied")]
    OwnershipDenied,

    /// No such record — 404.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// External classifier unreachable or returned garbage — 502, never
    /// retried within the request.
    #[error("upstream classifier failure: {0}")]
    Upstream(String),

    /// Anything unexpected — 500 with no internal detail in the body.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Single-field validation failure.
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ApiError::Validation(vec![FieldError {
            field,
            message: message.into(),
        }])
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<r2d2::Error> for ApiError {
    fn from(e: r2d2::Error) -> Self {
        ApiError::Internal(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(fields) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": "validation failed", "fields": fields })),
            )
                .into_response(),
            ApiError::Conflict(msg) => {
                (StatusCode::CONFLICT, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::Auth(reason) => {
                tracing::debug!(reason = %reason, "authentication rejected");
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "error": "invalid credentials or token" })),
                )
                    .into_response()
            }
            // Byte-identical to NotFound("sighting") below.
            ApiError::OwnershipDenied => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "sighting not found" })),
            )
                .into_response(),
            ApiError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("{what} not found") })),
            )
                .into_response(),
            ApiError::Upstream(msg) => {
                let correlation_id = uuid::Uuid::new_v4();
                tracing::error!(%correlation_id, error = %msg, "classifier call failed");
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({
                        "error": "species identification service unavailable",
                        "correlation_id": correlation_id.to_string(),
                    })),
                )
                    .into_response()
            }
            ApiError::Internal(e) => {
                tracing::error!(error = ?e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
