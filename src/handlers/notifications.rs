// src/handlers/notifications.rs
use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::models::{Notification, NotificationQuery};
use crate::validation::{AppPath, AppQuery};
use crate::{AppError, AppState};

// GET /api/notifications?unread=true
pub async fn get_notifications_handler(
    user: AuthUser,
    State(state): State<AppState>,
    AppQuery(query): AppQuery<NotificationQuery>,
) -> Result<Json<Value>, AppError> {
    let only_unread = query.unread.unwrap_or(false);

    let notifications = sqlx::query_as::<_, Notification>(
        "SELECT * FROM notifications
         WHERE user_id = $1 AND (NOT $2 OR read = FALSE)
         ORDER BY created_at DESC, id DESC",
    )
    .bind(user.id)
    .bind(only_unread)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(json!({
        "state": true,
        "count": notifications.len(),
        "notifications": notifications,
    })))
}

// GET /api/notifications/unread-count
pub async fn unread_count_handler(
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND read = FALSE")
            .bind(user.id)
            .fetch_one(&state.db)
            .await?;

    Ok(Json(json!({ "state": true, "count": count })))
}

// PATCH /api/notifications/:id/read
pub async fn mark_read_handler(
    AppPath(id): AppPath<i32>,
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let notification = sqlx::query_as::<_, Notification>(
        "UPDATE notifications SET read = TRUE WHERE id = $1 AND user_id = $2 RETURNING *",
    )
    .bind(id)
    .bind(user.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("Notification not found".into()))?;

    Ok(Json(json!({ "state": true, "notification": notification })))
}

// PATCH /api/notifications/read-all
pub async fn mark_all_read_handler(
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let result = sqlx::query("UPDATE notifications SET read = TRUE WHERE user_id = $1 AND read = FALSE")
        .bind(user.id)
        .execute(&state.db)
        .await?;

    Ok(Json(json!({
        "state": true,
        "message": "All notifications marked as read",
        "updated": result.rows_affected(),
    })))
}

// DELETE /api/notifications/:id
pub async fn delete_notification_handler(
    AppPath(id): AppPath<i32>,
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user.id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Notification not found".into()));
    }

    Ok(Json(json!({ "state": true, "message": "Notification deleted" })))
}

// DELETE /api/notifications
pub async fn clear_notifications_handler(
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let result = sqlx::query("DELETE FROM notifications WHERE user_id = $1")
        .bind(user.id)
        .execute(&state.db)
        .await?;

    Ok(Json(json!({
        "state": true,
        "message": "Notifications cleared",
        "deleted": result.rows_affected(),
    })))
}
