// src/handlers/users.rs
use axum::{extract::State, Json};
use serde_json::{json, Value};

use super::auth::{normalize_email, revoke_refresh_tokens};
use crate::auth::{hash_password, verify_password, AuthUser};
use crate::models::{UpdatePasswordSchema, UpdatePreferencesSchema, UpdateProfileSchema, User};
use crate::notify::{notify, NotificationKind, PASSWORD_CHANGED};
use crate::validation::ValidatedJson;
use crate::{AppError, AppState};

async fn load_user(state: &AppState, id: i32) -> Result<User, AppError> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))
}

// --- 1. 当前用户 (GET /api/users/me) ---
pub async fn get_me_handler(
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let user = load_user(&state, user.id).await?;
    Ok(Json(json!({ "state": true, "user": user })))
}

// --- 2. 修改资料 (PATCH /api/users/me) ---
pub async fn update_profile_handler(
    auth: AuthUser,
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<UpdateProfileSchema>,
) -> Result<Json<Value>, AppError> {
    let email = body.email.as_deref().map(normalize_email);

    if let Some(email) = &email {
        let taken: Option<i32> =
            sqlx::query_scalar("SELECT id FROM users WHERE email = $1 AND id <> $2")
                .bind(email)
                .bind(auth.id)
                .fetch_optional(&state.db)
                .await?;
        if taken.is_some() {
            return Err(AppError::Conflict("Email is already in use".into()));
        }
    }

    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET
            name = COALESCE($1, name),
            email = COALESCE($2, email),
            avatar = COALESCE($3, avatar),
            bio = COALESCE($4, bio),
            updated_at = NOW()
         WHERE id = $5
         RETURNING *",
    )
    .bind(body.name)
    .bind(email)
    .bind(body.avatar)
    .bind(body.bio)
    .bind(auth.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    Ok(Json(json!({
        "state": true,
        "message": "Profile updated",
        "user": user,
    })))
}

// --- 3. 修改密码 (PATCH /api/users/me/password) ---
pub async fn update_password_handler(
    auth: AuthUser,
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<UpdatePasswordSchema>,
) -> Result<Json<Value>, AppError> {
    let user = load_user(&state, auth.id).await?;
    if !verify_password(&body.current_password, &user.password_hash) {
        return Err(AppError::Auth("Current password is incorrect".into()));
    }

    let password_hash = hash_password(&body.new_password)?;
    sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
        .bind(password_hash)
        .bind(user.id)
        .execute(&state.db)
        .await?;
    revoke_refresh_tokens(&state.db, user.id).await?;
    notify(&state, user.id, NotificationKind::System, PASSWORD_CHANGED).await;

    Ok(Json(json!({
        "state": true,
        "message": "Password updated",
    })))
}

// --- 4. 通知偏好 (PATCH /api/users/me/preferences) ---
pub async fn update_preferences_handler(
    auth: AuthUser,
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<UpdatePreferencesSchema>,
) -> Result<Json<Value>, AppError> {
    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET
            notify_on_create = COALESCE($1, notify_on_create),
            notify_on_update = COALESCE($2, notify_on_update),
            notify_on_delete = COALESCE($3, notify_on_delete),
            email_notifications = COALESCE($4, email_notifications),
            updated_at = NOW()
         WHERE id = $5
         RETURNING *",
    )
    .bind(body.notify_on_create)
    .bind(body.notify_on_update)
    .bind(body.notify_on_delete)
    .bind(body.email_notifications)
    .bind(auth.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    Ok(Json(json!({
        "state": true,
        "message": "Preferences updated",
        "user": user,
    })))
}

// --- 5. 注销账号 (DELETE /api/users/me) ---
pub async fn delete_account_handler(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    // 任务、通知、聊天记录、Token 都通过 ON DELETE CASCADE 一并删除
    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(auth.id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".into()));
    }

    state.drafts.remove(auth.id);
    tracing::info!("用户 {} 注销了账号", auth.id);

    Ok(Json(json!({
        "state": true,
        "message": "Account deleted",
    })))
}
