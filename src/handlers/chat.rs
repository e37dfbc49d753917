// src/handlers/chat.rs
use axum::{extract::State, Json};
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::auth::AuthUser;
use crate::chatbot;
use crate::models::{ChatMessageSchema, ConversationMessage, Sender};
use crate::validation::ValidatedJson;
use crate::{AppError, AppState};

/// 每个用户一条会话记录，不存在时创建
async fn ensure_conversation(db: &PgPool, user_id: i32) -> Result<i32, AppError> {
    let id: i32 = sqlx::query_scalar(
        "INSERT INTO conversations (user_id) VALUES ($1)
         ON CONFLICT (user_id) DO UPDATE SET updated_at = NOW()
         RETURNING id",
    )
    .bind(user_id)
    .fetch_one(db)
    .await?;
    Ok(id)
}

async fn load_messages(db: &PgPool, conversation_id: i32) -> Result<Vec<ConversationMessage>, AppError> {
    let messages = sqlx::query_as::<_, ConversationMessage>(
        "SELECT * FROM conversation_messages WHERE conversation_id = $1 ORDER BY created_at ASC, id ASC",
    )
    .bind(conversation_id)
    .fetch_all(db)
    .await?;
    Ok(messages)
}

async fn append_message(
    db: &PgPool,
    conversation_id: i32,
    sender: Sender,
    message: &str,
) -> Result<ConversationMessage, AppError> {
    let saved = sqlx::query_as::<_, ConversationMessage>(
        "INSERT INTO conversation_messages (conversation_id, sender, message)
         VALUES ($1, $2, $3)
         RETURNING *",
    )
    .bind(conversation_id)
    .bind(sender.as_str())
    .bind(message)
    .fetch_one(db)
    .await?;
    Ok(saved)
}

// GET /api/conversation
pub async fn get_conversation_handler(
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let conversation_id = ensure_conversation(&state.db, user.id).await?;
    let messages = load_messages(&state.db, conversation_id).await?;

    Ok(Json(json!({ "state": true, "messages": messages })))
}

// DELETE /api/conversation
pub async fn clear_conversation_handler(
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    sqlx::query(
        "DELETE FROM conversation_messages
         WHERE conversation_id IN (SELECT id FROM conversations WHERE user_id = $1)",
    )
    .bind(user.id)
    .execute(&state.db)
    .await?;

    // 清空对话时一并丢弃未确认的草稿
    state.drafts.remove(user.id);

    Ok(Json(json!({ "state": true, "message": "Conversation cleared" })))
}

// POST /api/chatbot/message
pub async fn chatbot_message_handler(
    user: AuthUser,
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<ChatMessageSchema>,
) -> Result<Json<Value>, AppError> {
    let text = body.message.trim();
    let conversation_id = ensure_conversation(&state.db, user.id).await?;
    let history = load_messages(&state.db, conversation_id).await?;

    // 先得到回复再落库，失败时对话里不会留下没有回复的消息
    let bot = chatbot::respond(&state, user.id, text, &history).await?;
    append_message(&state.db, conversation_id, Sender::User, text).await?;
    append_message(&state.db, conversation_id, Sender::Bot, &bot.reply).await?;

    tracing::debug!("chatbot user={} intent={}", user.id, bot.intent.as_str());

    Ok(Json(json!({
        "state": true,
        "reply": bot.reply,
        "intent": bot.intent,
        "task": bot.task,
        "pending": bot.pending,
    })))
}
