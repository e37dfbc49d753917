// src/main.rs
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use task_planner::chatbot::drafts::spawn_sweeper;
use task_planner::config::Config;
use task_planner::{build_router, AppState, StartupError};

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    tracing::info!("✅ 数据库连接成功!");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("数据库迁移完成");

    let addr = config.bind_addr;
    let state = AppState::new(pool, config)?;
    spawn_sweeper(state.drafts.clone(), Duration::from_secs(60));
    tracing::info!("聊天草稿有效期: {}s", state.drafts.ttl().as_secs());

    let app = build_router(state);

    tracing::info!("🚀 服务器运行在: {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
