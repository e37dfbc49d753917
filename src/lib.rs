// src/lib.rs
use std::sync::Arc;

use axum::{
    http::Method,
    routing::{delete, get, patch, post},
    Router,
};
use sqlx::PgPool;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod chatbot;
pub mod config;
pub mod error;
pub mod handlers;
pub mod mailer;
pub mod models;
pub mod notify;
pub mod task;
pub mod validation;

pub use error::AppError;

use auth::JwtKeys;
use chatbot::drafts::DraftStore;
use chatbot::gemini::{GeminiClient, LanguageModel, LlmError};
use config::{Config, ConfigError};
use handlers::{auth as auth_h, chat, notifications, tasks, users};
use mailer::{MailError, Mailer};

/// 启动阶段的错误，main 直接返回它
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("mailer setup failed: {0}")]
    Mail(#[from] MailError),

    #[error("Gemini client setup failed: {0}")]
    Llm(#[from] LlmError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub keys: JwtKeys,
    pub drafts: Arc<DraftStore>,
    pub llm: Option<Arc<dyn LanguageModel>>,
    pub mailer: Arc<Mailer>,
}

impl AppState {
    pub fn new(db: PgPool, config: Config) -> Result<Self, StartupError> {
        let llm: Option<Arc<dyn LanguageModel>> = match &config.gemini_api_key {
            Some(key) => {
                let mut client = GeminiClient::new(key.clone(), config.gemini_model.clone())?;
                if let Some(base_url) = &config.gemini_base_url {
                    tracing::info!("Gemini 接口地址: {}", base_url);
                    client = client.with_base_url(base_url.clone());
                }
                Some(Arc::new(client) as Arc<dyn LanguageModel>)
            }
            None => {
                tracing::warn!("未配置 GEMINI_API_KEY，聊天机器人只使用规则识别");
                None
            }
        };
        let mailer = Mailer::from_config(config.smtp.as_ref())?;

        Ok(Self {
            db,
            keys: JwtKeys::new(&config.jwt_secret, config.access_token_minutes),
            drafts: Arc::new(DraftStore::new(config.draft_ttl)),
            llm,
            mailer: Arc::new(mailer),
            config: Arc::new(config),
        })
    }

    /// 替换语言模型 (测试用固定回复)
    pub fn with_llm(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.llm = Some(llm);
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(handlers::health_handler))
        // 认证
        .route("/api/auth/register", post(auth_h::register_handler))
        .route("/api/auth/login", post(auth_h::login_handler))
        .route("/api/auth/refresh", post(auth_h::refresh_handler))
        .route("/api/auth/forgot-password", post(auth_h::forgot_password_handler))
        .route("/api/auth/reset-password", post(auth_h::reset_password_handler))
        // 用户
        .route(
            "/api/users/me",
            get(users::get_me_handler)
                .patch(users::update_profile_handler)
                .delete(users::delete_account_handler),
        )
        .route("/api/users/me/password", patch(users::update_password_handler))
        .route("/api/users/me/preferences", patch(users::update_preferences_handler))
        // 任务
        .route(
            "/api/tasks",
            get(tasks::get_tasks_handler).post(tasks::create_task_handler),
        )
        .route("/api/tasks/board", get(tasks::board_handler))
        .route("/api/tasks/stats", get(tasks::stats_handler))
        .route(
            "/api/tasks/:id",
            get(tasks::get_task_handler)
                .patch(tasks::update_task_handler)
                .delete(tasks::delete_task_handler),
        )
        .route("/api/tasks/:id/move", patch(tasks::move_task_handler))
        .route("/api/tasks/:id/pin", patch(tasks::toggle_pin_handler))
        .route("/api/tasks/:id/favorite", patch(tasks::toggle_favorite_handler))
        // 通知
        .route(
            "/api/notifications",
            get(notifications::get_notifications_handler)
                .delete(notifications::clear_notifications_handler),
        )
        .route("/api/notifications/unread-count", get(notifications::unread_count_handler))
        .route("/api/notifications/read-all", patch(notifications::mark_all_read_handler))
        .route("/api/notifications/:id", delete(notifications::delete_notification_handler))
        .route("/api/notifications/:id/read", patch(notifications::mark_read_handler))
        // 聊天
        .route(
            "/api/conversation",
            get(chat::get_conversation_handler).delete(chat::clear_conversation_handler),
        )
        .route("/api/chatbot/message", post(chat::chatbot_message_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
