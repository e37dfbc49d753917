// src/notify.rs
//! 任务变更时的通知副作用。尽力而为：失败只记日志，不影响主请求。

use crate::models::{Notification, User};
use crate::AppState;

pub const PASSWORD_CHANGED: &str =
    "Your password was changed. If this wasn't you, reset it right away.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    TaskCompleted,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::TaskCreated => "task_created",
            NotificationKind::TaskUpdated => "task_updated",
            NotificationKind::TaskDeleted => "task_deleted",
            NotificationKind::TaskCompleted => "task_completed",
            NotificationKind::System => "system",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            NotificationKind::TaskCreated => "Task created",
            NotificationKind::TaskUpdated => "Task updated",
            NotificationKind::TaskDeleted => "Task deleted",
            NotificationKind::TaskCompleted => "Task completed",
            NotificationKind::System => "Notice",
        }
    }

    pub fn message_for(&self, task_title: &str) -> String {
        match self {
            NotificationKind::TaskCreated => format!("\"{}\" was added to your tasks.", task_title),
            NotificationKind::TaskUpdated => format!("\"{}\" was updated.", task_title),
            NotificationKind::TaskDeleted => format!("\"{}\" was deleted.", task_title),
            NotificationKind::TaskCompleted => format!("Nice work! \"{}\" is done.", task_title),
            NotificationKind::System => task_title.to_string(),
        }
    }

    /// 根据用户的通知偏好决定是否生成通知
    pub fn enabled_for(&self, user: &User) -> bool {
        match self {
            NotificationKind::TaskCreated => user.notify_on_create,
            NotificationKind::TaskUpdated | NotificationKind::TaskCompleted => user.notify_on_update,
            NotificationKind::TaskDeleted => user.notify_on_delete,
            NotificationKind::System => true,
        }
    }
}

pub async fn notify(state: &AppState, user_id: i32, kind: NotificationKind, task_title: &str) {
    if let Err(e) = try_notify(state, user_id, kind, task_title).await {
        tracing::warn!("创建通知失败 user_id={} kind={}: {}", user_id, kind.as_str(), e);
    }
}

async fn try_notify(
    state: &AppState,
    user_id: i32,
    kind: NotificationKind,
    task_title: &str,
) -> Result<(), sqlx::Error> {
    let Some(user) = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
    else {
        return Ok(());
    };

    if !kind.enabled_for(&user) {
        return Ok(());
    }

    let notification = sqlx::query_as::<_, Notification>(
        "INSERT INTO notifications (user_id, title, message, type)
         VALUES ($1, $2, $3, $4)
         RETURNING *",
    )
    .bind(user_id)
    .bind(kind.title())
    .bind(kind.message_for(task_title))
    .bind(kind.as_str())
    .fetch_one(&state.db)
    .await?;

    if user.email_notifications && state.mailer.is_enabled() {
        // 邮件发送放到后台，不阻塞请求
        let mailer = state.mailer.clone();
        tokio::spawn(async move {
            if let Err(e) = mailer
                .send(&user.email, &notification.title, &notification.message)
                .await
            {
                tracing::warn!("通知邮件发送失败 to={}: {}", user.email, e);
            }
        });
    }

    Ok(())
}
