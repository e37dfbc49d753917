// src/validation.rs
use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationError};
use crate::task::{Priority, TaskStatus};
use crate::AppError;

pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: Validate + DeserializeOwned + 'static,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        // 1. 利用 Axum 原生的 Json 提取器解析 Body
        let Json(value) = Json::<T>::from_request(req, state).await
            .map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;

        // 2. 执行 validator 的校验逻辑
        value.validate()?;

        Ok(ValidatedJson(value))
    }
}

// 路径参数和查询字符串解析失败时同样返回 { state: false, message }

pub struct AppPath<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for AppPath<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
        Ok(AppPath(value))
    }
}

pub struct AppQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for AppQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
        Ok(AppQuery(value))
    }
}

// --- 自定义字段校验 (配合 #[validate(custom(function = ...))]) ---

pub fn validate_priority(value: &str) -> Result<(), ValidationError> {
    value
        .parse::<Priority>()
        .map(|_| ())
        .map_err(|_| message("priority", "priority must be high, medium or low"))
}

pub fn validate_status(value: &str) -> Result<(), ValidationError> {
    value
        .parse::<TaskStatus>()
        .map(|_| ())
        .map_err(|_| message("status", "status must be To Do, In Progress, Done or Cancelled"))
}

pub fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(message("blank", "value must not be blank"));
    }
    Ok(())
}

fn message(code: &'static str, text: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(text.into());
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_accepts_known_levels_in_any_case() {
        assert!(validate_priority("HIGH").is_ok());
        assert!(validate_priority("low").is_ok());
        assert!(validate_priority("critical").is_err());
    }

    #[test]
    fn status_accepts_legacy_spellings() {
        assert!(validate_status("Cancled").is_ok());
        assert!(validate_status("in-progress").is_ok());
        assert!(validate_status("archived").is_err());
    }

    #[test]
    fn blank_strings_are_rejected() {
        let err = validate_not_blank("   ").unwrap_err();
        assert_eq!(err.message.as_deref(), Some("value must not be blank"));
        assert!(validate_not_blank("x").is_ok());
    }
}
