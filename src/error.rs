// src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("Internal server error")]
    Internal,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(e) if is_unique_violation(e) => StatusCode::CONFLICT,
            AppError::Database(_) | AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        // 23505 = unique_violation
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

// 核心逻辑：将我们的错误转换为 HTTP 响应，统一为 { state: false, message }
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match self {
            AppError::Database(ref e) => {
                // 后台记录详细错误，对外只返回概要
                tracing::error!("Database Error: {:?}", e);
                if is_unique_violation(e) {
                    "Record already exists".to_string()
                } else {
                    "Database operation failed".to_string()
                }
            }
            AppError::Upstream(ref msg) => {
                tracing::error!("Upstream Error: {}", msg);
                "External service unavailable".to_string()
            }
            AppError::Auth(msg)
            | AppError::NotFound(msg)
            | AppError::Forbidden(msg)
            | AppError::Conflict(msg)
            | AppError::BadRequest(msg) => msg,
            AppError::Internal => "Internal server error".to_string(),
            AppError::ValidationError(ref e) => format!("Invalid input: {}", e),
        };

        let body = Json(json!({
            "state": false,
            "message": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct NameForm {
        #[validate(length(min = 3, message = "too short"))]
        name: String,
    }

    #[test]
    fn status_codes_follow_variant() {
        assert_eq!(AppError::Auth("x".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Conflict("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::Upstream("x".into()).status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            AppError::Database(sqlx::Error::RowNotFound).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn validation_errors_become_bad_request() {
        let err: AppError = NameForm { name: "ab".into() }.validate().unwrap_err().into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn response_uses_state_false_envelope() {
        let response = AppError::NotFound("Task not found".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
