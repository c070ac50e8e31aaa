use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    /// Business-rule rejection. `code` is a stable machine-readable tag and
    /// `details` carries the identities or amounts the caller needs to act.
    #[error("Conflict: {message}")]
    Conflict {
        code: &'static str,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("Service unavailable")]
    ServiceUnavailable {
        correlation_id: Option<Uuid>,
        retry_after: Option<u64>,
    },

    /// Unexpected failure. The cause is logged by whoever raised it; only the
    /// correlation id reaches the caller.
    #[error("Internal server error ({correlation_id}): {cause}")]
    InternalError {
        correlation_id: Uuid,
        cause: anyhow::Error,
    },

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    /// Wrap an unexpected error under a fresh correlation id.
    pub fn internal(cause: impl Into<anyhow::Error>) -> Self {
        AppError::InternalError {
            correlation_id: Uuid::new_v4(),
            cause: cause.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::InvalidField { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalError { .. }
            | AppError::DatabaseError(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::internal(err)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let (body, retry_after) = match self {
            AppError::ValidationError(err) => (
                ErrorResponse {
                    error: "Validation error".to_string(),
                    code: "validation_error",
                    details: serde_json::to_value(&err).ok(),
                    correlation_id: None,
                },
                None,
            ),
            AppError::InvalidField { field, message } => (
                ErrorResponse {
                    error: message,
                    code: "validation_error",
                    details: Some(serde_json::json!({ "field": field })),
                    correlation_id: None,
                },
                None,
            ),
            AppError::BadRequest(err) => (simple(err.to_string(), "bad_request"), None),
            AppError::NotFound(err) => (simple(err.to_string(), "not_found"), None),
            AppError::Unauthorized(err) => (simple(err.to_string(), "unauthorized"), None),
            AppError::Forbidden(err) => (simple(err.to_string(), "forbidden"), None),
            AppError::Conflict {
                code,
                message,
                details,
            } => (
                ErrorResponse {
                    error: message,
                    code,
                    details,
                    correlation_id: None,
                },
                None,
            ),
            AppError::ServiceUnavailable {
                correlation_id,
                retry_after,
            } => (
                ErrorResponse {
                    error: "Service temporarily unavailable, please retry".to_string(),
                    code: "transient_failure",
                    details: None,
                    correlation_id: correlation_id.map(|id| id.to_string()),
                },
                retry_after,
            ),
            AppError::InternalError { correlation_id, .. } => (
                ErrorResponse {
                    error: "Internal server error".to_string(),
                    code: "internal_error",
                    details: None,
                    correlation_id: Some(correlation_id.to_string()),
                },
                None,
            ),
            AppError::DatabaseError(_) => (simple("Database error".to_string(), "database_error"), None),
            AppError::ConfigError(_) => (
                simple("Configuration error".to_string(), "configuration_error"),
                None,
            ),
        };

        let mut res = (status, Json(body)).into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.into());
        }

        res
    }
}

fn simple(error: String, code: &'static str) -> ErrorResponse {
    ErrorResponse {
        error,
        code,
        details: None,
        correlation_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn internal_error_hides_cause() {
        let err = AppError::internal(anyhow::anyhow!("relation \"fee_collections\" does not exist"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["code"], "internal_error");
        assert!(body["correlation_id"].is_string());
        assert!(!body.to_string().contains("fee_collections"));
    }

    #[tokio::test]
    async fn database_error_is_generic() {
        let response =
            AppError::DatabaseError(anyhow::anyhow!("connection refused")).into_response();
        let body = body_json(response).await;
        assert_eq!(body["error"], "Database error");
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn conflict_carries_details() {
        let response = AppError::Conflict {
            code: "insufficient_balance",
            message: "Insufficient wallet balance".to_string(),
            details: Some(serde_json::json!({ "available": "800.00" })),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = body_json(response).await;
        assert_eq!(body["code"], "insufficient_balance");
        assert_eq!(body["details"]["available"], "800.00");
    }

    #[tokio::test]
    async fn service_unavailable_sets_retry_after() {
        let response = AppError::ServiceUnavailable {
            correlation_id: Some(Uuid::new_v4()),
            retry_after: Some(1),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(axum::http::header::RETRY_AFTER).unwrap(),
            "1"
        );
    }

    #[tokio::test]
    async fn invalid_field_names_the_field() {
        let response = AppError::InvalidField {
            field: "amount".to_string(),
            message: "amount must be greater than zero".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = body_json(response).await;
        assert_eq!(body["details"]["field"], "amount");
    }
}
