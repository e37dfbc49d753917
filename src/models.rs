// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::task::{Priority, TaskStatus};
use crate::validation::{validate_not_blank, validate_priority, validate_status};

// 校验前先去掉首尾空白，长度限制按去空白后的值计算
fn trimmed<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw.trim().to_string())
}

fn trimmed_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.map(|s| s.trim().to_string()))
}

// --- 1. Task 模型 ---
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Task {
    pub id: i32,
    pub user_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: String,
    pub status: String,
    pub pinned: bool,
    pub favorite: bool,
    pub validation: bool,
    pub cancelled: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    // 数据库有 CHECK 约束，解析失败只可能来自旧数据，按默认值处理
    pub fn status(&self) -> TaskStatus {
        self.status.parse().unwrap_or(TaskStatus::Todo)
    }

    pub fn priority(&self) -> Priority {
        self.priority.parse().unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTaskSchema {
    #[validate(
        length(min = 1, max = 200, message = "Title must be 1-200 characters"),
        custom(function = "validate_not_blank")
    )]
    #[serde(deserialize_with = "trimmed")]
    pub title: String,
    pub description: Option<String>,
    #[validate(length(max = 50, message = "Category is too long"))]
    pub category: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    #[validate(custom(function = "validate_priority"))]
    pub priority: Option<String>,
    #[validate(custom(function = "validate_status"))]
    pub status: Option<String>,
    pub pinned: Option<bool>,
    pub favorite: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateTaskSchema {
    #[validate(
        length(min = 1, max = 200, message = "Title must be 1-200 characters"),
        custom(function = "validate_not_blank")
    )]
    #[serde(default, deserialize_with = "trimmed_opt")]
    pub title: Option<String>,
    pub description: Option<String>,
    #[validate(length(max = 50, message = "Category is too long"))]
    pub category: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    #[validate(custom(function = "validate_priority"))]
    pub priority: Option<String>,
    #[validate(custom(function = "validate_status"))]
    pub status: Option<String>,
    pub pinned: Option<bool>,
    pub favorite: Option<bool>,
    pub validation: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct MoveTaskSchema {
    #[validate(custom(function = "validate_not_blank"))]
    pub column: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub q: Option<String>,
    pub pinned: Option<bool>,
    pub favorite: Option<bool>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

// --- 2. 用户与认证模型 ---
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub notify_on_create: bool,
    pub notify_on_update: bool,
    pub notify_on_delete: bool,
    pub email_notifications: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterSchema {
    #[validate(length(min = 2, max = 50, message = "Name must be 2-50 characters"))]
    #[serde(deserialize_with = "trimmed")]
    pub name: String,
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginSchema {
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub state: bool,
    pub message: String,
    pub token: String,
    pub refresh_token: String,
    pub user: User,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordSchema {
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordSchema {
    #[validate(length(min = 1, message = "Reset token is required"))]
    pub token: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileSchema {
    #[validate(length(min = 2, max = 50, message = "Name must be 2-50 characters"))]
    #[serde(default, deserialize_with = "trimmed_opt")]
    pub name: Option<String>,
    #[validate(email(message = "A valid email is required"))]
    pub email: Option<String>,
    pub avatar: Option<String>,
    #[validate(length(max = 500, message = "Bio is too long"))]
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePasswordSchema {
    pub current_password: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePreferencesSchema {
    pub notify_on_create: Option<bool>,
    pub notify_on_update: Option<bool>,
    pub notify_on_delete: Option<bool>,
    pub email_notifications: Option<bool>,
}

// --- 3. 通知 ---
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Notification {
    pub id: i32,
    pub user_id: i32,
    pub title: String,
    pub message: String,
    pub r#type: String,
    pub read: bool,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    pub unread: Option<bool>,
}

// --- 4. 聊天记录 ---
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ConversationMessage {
    pub id: i32,
    pub conversation_id: i32,
    pub sender: String,
    pub message: String,
    #[serde(rename = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ConversationMessage {
    pub fn sender(&self) -> Sender {
        if self.sender == Sender::Bot.as_str() {
            Sender::Bot
        } else {
            Sender::User
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "bot",
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChatMessageSchema {
    #[validate(
        length(min = 1, max = 2000, message = "Message must be 1-2000 characters"),
        custom(function = "validate_not_blank")
    )]
    pub message: String,
}
