use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    extract::multipart::MultipartRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Request-level error. Internal details are logged, never returned to the client.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Internal(anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

/// A write lost a race against another request: a unique key taken or a
/// referenced row in use. Repos raise it; the HTTP edge answers 409.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConstraintViolation(pub String);

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

pub fn is_constraint_code(code: &str) -> bool {
    code == UNIQUE_VIOLATION || code == FOREIGN_KEY_VIOLATION
}

/// Maps unique and foreign key violations to [`ConstraintViolation`] carrying
/// `conflict`; anything else keeps `context`.
pub fn map_constraint(e: sqlx::Error, conflict: &str, context: &'static str) -> anyhow::Error {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref().is_some_and(is_constraint_code) {
            return ConstraintViolation(conflict.to_string()).into();
        }
    }
    anyhow::Error::new(e).context(context)
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast_ref::<ConstraintViolation>() {
            Some(violation) => Self::Conflict(violation.0.clone()),
            None => Self::Internal(e),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Internal(e) => {
                error!(error = ?e, "internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn internal_errors_do_not_leak_details() {
        let err = AppError::from(anyhow::anyhow!("connection refused to 10.0.0.3:5432"));
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_of(resp).await;
        assert_eq!(body["error"], "Internal server error");
    }

    #[tokio::test]
    async fn client_errors_keep_their_message() {
        let resp = AppError::not_found("Try-on session not found").into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_of(resp).await["error"], "Try-on session not found");
    }

    #[tokio::test]
    async fn constraint_violations_become_conflicts() {
        let err = anyhow::Error::from(ConstraintViolation("Image is in use".into()));
        let err = AppError::from(err.context("delete image"));
        assert!(matches!(err, AppError::Conflict(ref m) if m == "Image is in use"));

        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(body_of(resp).await["error"], "Image is in use");
    }

    #[test]
    fn only_integrity_codes_count_as_constraints() {
        assert!(is_constraint_code("23505"));
        assert!(is_constraint_code("23503"));
        assert!(!is_constraint_code("23502"));
        assert!(!is_constraint_code("40001"));

        let other = map_constraint(sqlx::Error::RowNotFound, "taken", "insert user");
        assert!(other.downcast_ref::<ConstraintViolation>().is_none());
        assert!(matches!(AppError::from(other), AppError::Internal(_)));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(AppError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::unauthorized("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::ServiceUnavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
