// src/handlers/auth.rs
use axum::{extract::State, http::StatusCode, Json};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::auth::{generate_opaque_token, hash_password, verify_password};
use crate::mailer::password_reset_body;
use crate::models::{
    AuthResponse, ForgotPasswordSchema, LoginSchema, RefreshRequest, RegisterSchema,
    ResetPasswordSchema, User,
};
use crate::notify::{notify, NotificationKind, PASSWORD_CHANGED};
use crate::validation::ValidatedJson;
use crate::{AppError, AppState};

const RESET_TOKEN_MINUTES: i64 = 60;

pub(crate) fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// 签发一对新的 Access Token + Refresh Token
pub(crate) async fn issue_tokens(state: &AppState, user: &User) -> Result<(String, String), AppError> {
    let token = state.keys.create_jwt(user.id, &user.email)?;
    let refresh_token = generate_opaque_token();
    let expires_at = Utc::now() + Duration::days(state.config.refresh_token_days);

    sqlx::query("INSERT INTO refresh_tokens (token, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(&refresh_token)
        .bind(user.id)
        .bind(expires_at)
        .execute(&state.db)
        .await?;

    Ok((token, refresh_token))
}

/// 修改/重置密码后让所有设备重新登录
pub(crate) async fn revoke_refresh_tokens(db: &PgPool, user_id: i32) -> Result<(), AppError> {
    sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(())
}

// --- 1. 用户注册 (POST /api/auth/register) ---
pub async fn register_handler(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RegisterSchema>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let email = normalize_email(&payload.email);

    let exists: Option<i32> = sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_some() {
        return Err(AppError::Conflict("Email is already registered".into()));
    }

    let password_hash = hash_password(&payload.password)?;

    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (name, email, password_hash) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(&payload.name)
    .bind(&email)
    .bind(password_hash)
    .fetch_one(&state.db)
    .await?;

    tracing::info!("新用户注册: id={}", user.id);

    let (token, refresh_token) = issue_tokens(&state, &user).await?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            state: true,
            message: "Account created successfully".into(),
            token,
            refresh_token,
            user,
        }),
    ))
}

// --- 2. 用户登录 (POST /api/auth/login) ---
pub async fn login_handler(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<LoginSchema>,
) -> Result<Json<AuthResponse>, AppError> {
    // 用户不存在和密码错误返回同一条消息
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(normalize_email(&payload.email))
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::Auth("Invalid email or password".into()))?;

    if !verify_password(&payload.password, &user.password_hash) {
        return Err(AppError::Auth("Invalid email or password".into()));
    }

    let (token, refresh_token) = issue_tokens(&state, &user).await?;
    Ok(Json(AuthResponse {
        state: true,
        message: "Logged in successfully".into(),
        token,
        refresh_token,
        user,
    }))
}

// --- 3. 刷新 Token (POST /api/auth/refresh) ---
pub async fn refresh_handler(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RefreshRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    // 旧 Refresh Token 一次性使用：先删除再签发
    let user_id: i32 = sqlx::query_scalar(
        "DELETE FROM refresh_tokens WHERE token = $1 AND expires_at > NOW() RETURNING user_id",
    )
    .bind(&payload.refresh_token)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::Auth("Refresh token expired or invalid".into()))?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::Auth("Refresh token expired or invalid".into()))?;

    let (token, refresh_token) = issue_tokens(&state, &user).await?;
    Ok(Json(AuthResponse {
        state: true,
        message: "Token refreshed".into(),
        token,
        refresh_token,
        user,
    }))
}

// --- 4. 忘记密码 (POST /api/auth/forgot-password) ---
pub async fn forgot_password_handler(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<ForgotPasswordSchema>,
) -> Result<Json<Value>, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(normalize_email(&payload.email))
        .fetch_optional(&state.db)
        .await?;

    // 无论邮箱是否存在都返回同样的结果
    if let Some(user) = user {
        let token = generate_opaque_token();
        let expires_at = Utc::now() + Duration::minutes(RESET_TOKEN_MINUTES);

        sqlx::query("INSERT INTO password_resets (token, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(&token)
            .bind(user.id)
            .bind(expires_at)
            .execute(&state.db)
            .await?;

        let link = format!(
            "{}/reset-password/{}",
            state.config.client_url.trim_end_matches('/'),
            token
        );
        if let Err(e) = state
            .mailer
            .send(&user.email, "Reset your password", &password_reset_body(&user.name, &link))
            .await
        {
            tracing::error!("重置密码邮件发送失败 user_id={}: {}", user.id, e);
        }
    }

    Ok(Json(json!({
        "state": true,
        "message": "If that email is registered, a reset link has been sent",
    })))
}

// --- 5. 重置密码 (POST /api/auth/reset-password) ---
pub async fn reset_password_handler(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<ResetPasswordSchema>,
) -> Result<Json<Value>, AppError> {
    let user_id: i32 = sqlx::query_scalar(
        "DELETE FROM password_resets WHERE token = $1 AND expires_at > NOW() RETURNING user_id",
    )
    .bind(&payload.token)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::BadRequest("Reset link is invalid or has expired".into()))?;

    let password_hash = hash_password(&payload.password)?;
    sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
        .bind(password_hash)
        .bind(user_id)
        .execute(&state.db)
        .await?;

    revoke_refresh_tokens(&state.db, user_id).await?;
    notify(&state, user_id, NotificationKind::System, PASSWORD_CHANGED).await;
    tracing::info!("用户 {} 重置了密码", user_id);

    Ok(Json(json!({
        "state": true,
        "message": "Password has been reset, please log in again",
    })))
}
