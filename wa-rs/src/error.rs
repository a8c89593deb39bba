use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Maximum session limit reached ({max})")]
    SessionLimit { max: u32 },

    #[error("API call limit exceeded")]
    RateLimit {
        limit: i64,
        used: i64,
        reset_date: Option<String>,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::SessionLimit { .. } | ApiError::RateLimit { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            ApiError::RateLimit {
                limit,
                used,
                reset_date,
            } => json!({
                "success": false,
                "error": self.to_string(),
                "limit": limit,
                "used": used,
                "resetDate": reset_date,
            }),
            ApiError::SessionLimit { max } => json!({
                "success": false,
                "error": self.to_string(),
                "limit": max,
            }),
            // Internal detail is logged server-side, never sent to the caller
            ApiError::Database(e) => {
                error!("Database error while handling request: {}", e);
                json!({ "success": false, "error": "Internal server error" })
            }
            ApiError::Internal(msg) => {
                error!("Internal error while handling request: {}", msg);
                json!({ "success": false, "error": "Internal server error" })
            }
            _ => json!({ "success": false, "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthorized("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ApiError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::SessionLimit { max: 5 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::RateLimit {
                limit: 10,
                used: 10,
                reset_date: None
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_rate_limit_message() {
        let err = ApiError::RateLimit {
            limit: 100,
            used: 100,
            reset_date: Some("2024-05-01".into()),
        };
        assert_eq!(err.to_string(), "API call limit exceeded");
    }

    #[test]
    fn test_session_limit_message_carries_max() {
        let err = ApiError::SessionLimit { max: 5 };
        assert_eq!(err.to_string(), "Maximum session limit reached (5)");
    }
}
