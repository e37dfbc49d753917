// src/handlers/tasks.rs
use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::str::FromStr;

use crate::auth::AuthUser;
use crate::chatbot::drafts::{TaskDraft, TaskPatch};
use crate::models::{CreateTaskSchema, MoveTaskSchema, Task, TaskQuery, UpdateTaskSchema};
use crate::notify::{notify, NotificationKind};
use crate::task::{
    build_board, check_dates, compute_stats, normalize_category, BoardColumn, Priority, SortOrder,
    TaskSort, TaskStatus,
};
use crate::validation::{AppPath, AppQuery, ValidatedJson};
use crate::{AppError, AppState};

// --- 1. 规范化后的写入参数 ---

#[derive(Debug)]
pub(crate) struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub pinned: bool,
    pub favorite: bool,
}

impl NewTask {
    fn from_schema(body: CreateTaskSchema) -> Result<Self, AppError> {
        check_dates(body.start_date, body.due_date)?;
        Ok(NewTask {
            title: body.title.trim().to_string(),
            description: body.description,
            category: normalize_category(body.category.as_deref().unwrap_or_default()),
            start_date: body.start_date,
            due_date: body.due_date,
            priority: parse_opt(body.priority, "priority")?.unwrap_or_default(),
            status: parse_opt(body.status, "status")?.unwrap_or(TaskStatus::Todo),
            pinned: body.pinned.unwrap_or(false),
            favorite: body.favorite.unwrap_or(false),
        })
    }

    pub(crate) fn from_draft(draft: &TaskDraft) -> Self {
        NewTask {
            title: draft.title.clone(),
            description: None,
            category: draft.category.clone(),
            start_date: None,
            due_date: draft.due_date,
            priority: draft.priority,
            status: draft.status,
            pinned: false,
            favorite: false,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    pub pinned: Option<bool>,
    pub favorite: Option<bool>,
    pub validation: Option<bool>,
}

impl TaskChanges {
    fn from_schema(body: UpdateTaskSchema) -> Result<Self, AppError> {
        Ok(TaskChanges {
            title: body.title.map(|t| t.trim().to_string()),
            description: body.description,
            category: body.category.as_deref().map(normalize_category),
            start_date: body.start_date,
            due_date: body.due_date,
            priority: parse_opt(body.priority, "priority")?,
            status: parse_opt(body.status, "status")?,
            pinned: body.pinned,
            favorite: body.favorite,
            validation: body.validation,
        })
    }

    pub(crate) fn from_patch(patch: &TaskPatch) -> Self {
        TaskChanges {
            title: patch.title.clone(),
            category: patch.category.clone(),
            due_date: patch.due_date,
            priority: patch.priority,
            status: patch.status,
            ..TaskChanges::default()
        }
    }

    fn for_column(column: BoardColumn) -> Self {
        match column {
            BoardColumn::Pinned => TaskChanges {
                pinned: Some(true),
                ..TaskChanges::default()
            },
            BoardColumn::Status(status) => TaskChanges {
                status: Some(status),
                pinned: Some(false),
                ..TaskChanges::default()
            },
        }
    }
}

fn parse_opt<T: FromStr>(raw: Option<String>, field: &str) -> Result<Option<T>, AppError> {
    raw.map(|value| {
        value
            .parse()
            .map_err(|_| AppError::BadRequest(format!("Invalid {}: {}", field, value)))
    })
    .transpose()
}

/// 列表查询条件，非法的枚举值直接 400
#[derive(Debug, Default)]
pub(crate) struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub category: Option<String>,
    pub q: Option<String>,
    pub pinned: Option<bool>,
    pub favorite: Option<bool>,
    pub sort: TaskSort,
    pub order: SortOrder,
}

impl TryFrom<TaskQuery> for TaskFilter {
    type Error = AppError;

    fn try_from(query: TaskQuery) -> Result<Self, Self::Error> {
        Ok(TaskFilter {
            status: parse_opt(query.status, "status")?,
            priority: parse_opt(query.priority, "priority")?,
            category: query.category.as_deref().map(normalize_category),
            q: query.q.map(|q| q.trim().to_string()).filter(|q| !q.is_empty()),
            pinned: query.pinned,
            favorite: query.favorite,
            sort: parse_opt(query.sort, "sort")?.unwrap_or_default(),
            order: parse_opt(query.order, "order")?.unwrap_or_default(),
        })
    }
}

/// 已完成的状态切换单独发 task_completed 通知
pub(crate) fn change_kind(before: &Task, after: &Task) -> NotificationKind {
    if after.status() == TaskStatus::Done && before.status() != TaskStatus::Done {
        NotificationKind::TaskCompleted
    } else {
        NotificationKind::TaskUpdated
    }
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

// --- 2. 数据库操作 (Handler 与聊天机器人共用) ---

pub(crate) async fn insert_task(db: &PgPool, user_id: i32, new: &NewTask) -> Result<Task, AppError> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (user_id, title, description, category, start_date, due_date, priority, status, pinned, favorite, cancelled)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         RETURNING *",
    )
    .bind(user_id)
    .bind(&new.title)
    .bind(&new.description)
    .bind(&new.category)
    .bind(new.start_date)
    .bind(new.due_date)
    .bind(new.priority.as_str())
    .bind(new.status.as_str())
    .bind(new.pinned)
    .bind(new.favorite)
    .bind(new.status == TaskStatus::Cancelled)
    .fetch_one(db)
    .await?;

    Ok(task)
}

pub(crate) async fn fetch_task(db: &PgPool, user_id: i32, id: i32) -> Result<Task, AppError> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| AppError::NotFound("Task not found".to_string()))
}

pub(crate) async fn apply_changes(
    db: &PgPool,
    user_id: i32,
    existing: &Task,
    changes: TaskChanges,
) -> Result<Task, AppError> {
    check_dates(
        changes.start_date.or(existing.start_date),
        changes.due_date.or(existing.due_date),
    )?;

    // COALESCE：未提供的字段保持原值；cancelled 始终跟随 status
    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks SET
            title = COALESCE($1, title),
            description = COALESCE($2, description),
            category = COALESCE($3, category),
            start_date = COALESCE($4, start_date),
            due_date = COALESCE($5, due_date),
            priority = COALESCE($6, priority),
            status = COALESCE($7, status),
            cancelled = COALESCE($8, cancelled),
            pinned = COALESCE($9, pinned),
            favorite = COALESCE($10, favorite),
            validation = COALESCE($11, validation),
            updated_at = NOW()
         WHERE id = $12 AND user_id = $13
         RETURNING *",
    )
    .bind(changes.title)
    .bind(changes.description)
    .bind(changes.category)
    .bind(changes.start_date)
    .bind(changes.due_date)
    .bind(changes.priority.map(|p| p.as_str()))
    .bind(changes.status.map(|s| s.as_str()))
    .bind(changes.status.map(|s| s == TaskStatus::Cancelled))
    .bind(changes.pinned)
    .bind(changes.favorite)
    .bind(changes.validation)
    .bind(existing.id)
    .bind(user_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| AppError::NotFound("Task not found".to_string()))?;

    Ok(task)
}

pub(crate) async fn remove_task(db: &PgPool, user_id: i32, id: i32) -> Result<Task, AppError> {
    sqlx::query_as::<_, Task>("DELETE FROM tasks WHERE id = $1 AND user_id = $2 RETURNING *")
        .bind(id)
        .bind(user_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| AppError::NotFound("Task not found".to_string()))
}

pub(crate) async fn query_tasks(
    db: &PgPool,
    user_id: i32,
    filter: &TaskFilter,
) -> Result<Vec<Task>, AppError> {
    let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM tasks WHERE user_id = ");
    qb.push_bind(user_id);

    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(priority) = filter.priority {
        qb.push(" AND priority = ").push_bind(priority.as_str());
    }
    if let Some(category) = &filter.category {
        qb.push(" AND LOWER(category) = LOWER(").push_bind(category.clone()).push(")");
    }
    if let Some(pinned) = filter.pinned {
        qb.push(" AND pinned = ").push_bind(pinned);
    }
    if let Some(favorite) = filter.favorite {
        qb.push(" AND favorite = ").push_bind(favorite);
    }
    if let Some(q) = &filter.q {
        let pattern = format!("%{}%", escape_like(q));
        qb.push(" AND (title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }

    // 置顶任务永远排在最前
    qb.push(" ORDER BY pinned DESC, ")
        .push(filter.sort.sql())
        .push(" ")
        .push(filter.order.sql())
        .push(" NULLS LAST, id DESC");

    let tasks = qb.build_query_as::<Task>().fetch_all(db).await?;
    Ok(tasks)
}

/// 按标题定位任务：先精确匹配 (忽略大小写)，再模糊匹配最近更新的一条
pub(crate) async fn find_by_title(
    db: &PgPool,
    user_id: i32,
    title: &str,
) -> Result<Option<Task>, AppError> {
    let exact = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE user_id = $1 AND LOWER(title) = LOWER($2)
         ORDER BY updated_at DESC LIMIT 1",
    )
    .bind(user_id)
    .bind(title)
    .fetch_optional(db)
    .await?;
    if exact.is_some() {
        return Ok(exact);
    }

    let fuzzy = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE user_id = $1 AND title ILIKE $2
         ORDER BY updated_at DESC LIMIT 1",
    )
    .bind(user_id)
    .bind(format!("%{}%", escape_like(title)))
    .fetch_optional(db)
    .await?;

    Ok(fuzzy)
}

// --- 3. Handlers ---

// GET /api/tasks
pub async fn get_tasks_handler(
    user: AuthUser,
    State(state): State<AppState>,
    AppQuery(query): AppQuery<TaskQuery>,
) -> Result<Json<Value>, AppError> {
    let filter = TaskFilter::try_from(query)?;
    let tasks = query_tasks(&state.db, user.id, &filter).await?;

    Ok(Json(json!({
        "state": true,
        "count": tasks.len(),
        "tasks": tasks,
    })))
}

// POST /api/tasks
pub async fn create_task_handler(
    user: AuthUser,
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<CreateTaskSchema>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let new = NewTask::from_schema(body)?;
    let task = insert_task(&state.db, user.id, &new).await?;
    tracing::info!("用户 {} 创建任务 {}", user.id, task.id);

    notify(&state, user.id, NotificationKind::TaskCreated, &task.title).await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "state": true,
            "message": "Task created successfully",
            "task": task,
        })),
    ))
}

// GET /api/tasks/:id
pub async fn get_task_handler(
    AppPath(id): AppPath<i32>,
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let task = fetch_task(&state.db, user.id, id).await?;
    Ok(Json(json!({ "state": true, "task": task })))
}

// PATCH /api/tasks/:id
pub async fn update_task_handler(
    AppPath(id): AppPath<i32>,
    user: AuthUser,
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<UpdateTaskSchema>,
) -> Result<Json<Value>, AppError> {
    let changes = TaskChanges::from_schema(body)?;
    let existing = fetch_task(&state.db, user.id, id).await?;
    let task = apply_changes(&state.db, user.id, &existing, changes).await?;

    notify(&state, user.id, change_kind(&existing, &task), &task.title).await;

    Ok(Json(json!({
        "state": true,
        "message": "Task updated successfully",
        "task": task,
    })))
}

// DELETE /api/tasks/:id
pub async fn delete_task_handler(
    AppPath(id): AppPath<i32>,
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let task = remove_task(&state.db, user.id, id).await?;
    tracing::info!("用户 {} 删除任务 {}", user.id, task.id);

    notify(&state, user.id, NotificationKind::TaskDeleted, &task.title).await;

    Ok(Json(json!({
        "state": true,
        "message": "Task deleted successfully",
    })))
}

// PATCH /api/tasks/:id/move (看板拖拽)
pub async fn move_task_handler(
    AppPath(id): AppPath<i32>,
    user: AuthUser,
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<MoveTaskSchema>,
) -> Result<Json<Value>, AppError> {
    let column: BoardColumn = body
        .column
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Unknown board column: {}", body.column)))?;

    let existing = fetch_task(&state.db, user.id, id).await?;
    let task = apply_changes(&state.db, user.id, &existing, TaskChanges::for_column(column)).await?;

    notify(&state, user.id, change_kind(&existing, &task), &task.title).await;

    Ok(Json(json!({
        "state": true,
        "message": format!("Task moved to {}", column.name()),
        "task": task,
    })))
}

async fn toggle_flag(state: &AppState, user_id: i32, id: i32, column: &str) -> Result<Task, AppError> {
    // column 只会是下面两个 Handler 传入的常量
    let sql = format!(
        "UPDATE tasks SET {col} = NOT {col}, updated_at = NOW()
         WHERE id = $1 AND user_id = $2
         RETURNING *",
        col = column
    );
    sqlx::query_as::<_, Task>(&sql)
        .bind(id)
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Task not found".to_string()))
}

// PATCH /api/tasks/:id/pin
pub async fn toggle_pin_handler(
    AppPath(id): AppPath<i32>,
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let task = toggle_flag(&state, user.id, id, "pinned").await?;
    let message = if task.pinned { "Task pinned" } else { "Task unpinned" };
    Ok(Json(json!({ "state": true, "message": message, "task": task })))
}

// PATCH /api/tasks/:id/favorite
pub async fn toggle_favorite_handler(
    AppPath(id): AppPath<i32>,
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let task = toggle_flag(&state, user.id, id, "favorite").await?;
    let message = if task.favorite { "Added to favorites" } else { "Removed from favorites" };
    Ok(Json(json!({ "state": true, "message": message, "task": task })))
}

// GET /api/tasks/board
pub async fn board_handler(
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let tasks = query_tasks(&state.db, user.id, &TaskFilter::default()).await?;
    Ok(Json(json!({ "state": true, "columns": build_board(tasks) })))
}

// GET /api/tasks/stats
pub async fn stats_handler(
    user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, AppError> {
    let tasks = query_tasks(&state.db, user.id, &TaskFilter::default()).await?;
    Ok(Json(json!({ "state": true, "stats": compute_stats(&tasks, Utc::now()) })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::tests::sample_task;

    #[test]
    fn filter_rejects_unknown_enum_values() {
        let err = TaskFilter::try_from(TaskQuery {
            status: Some("archived".into()),
            ..TaskQuery::default()
        })
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = TaskFilter::try_from(TaskQuery {
            sort: Some("password_hash".into()),
            ..TaskQuery::default()
        })
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn filter_normalizes_values() {
        let filter = TaskFilter::try_from(TaskQuery {
            status: Some("cancled".into()),
            category: Some("work".into()),
            q: Some("   ".into()),
            order: Some("asc".into()),
            ..TaskQuery::default()
        })
        .unwrap();
        assert_eq!(filter.status, Some(TaskStatus::Cancelled));
        assert_eq!(filter.category.as_deref(), Some("Work"));
        assert_eq!(filter.q, None);
        assert_eq!(filter.sort, TaskSort::CreatedAt);
        assert_eq!(filter.order, SortOrder::Asc);
    }

    #[test]
    fn create_schema_gets_defaults() {
        let new = NewTask::from_schema(CreateTaskSchema {
            title: "  Buy milk ".into(),
            description: None,
            category: None,
            start_date: None,
            due_date: None,
            priority: None,
            status: Some("to-do".into()),
            pinned: None,
            favorite: Some(true),
        })
        .unwrap();
        assert_eq!(new.title, "Buy milk");
        assert_eq!(new.category, "Other");
        assert_eq!(new.priority, Priority::Medium);
        assert_eq!(new.status, TaskStatus::Todo);
        assert!(new.favorite);
        assert!(!new.pinned);
    }

    #[test]
    fn moving_to_a_status_column_unpins() {
        let changes = TaskChanges::for_column(BoardColumn::Status(TaskStatus::Done));
        assert_eq!(changes.status, Some(TaskStatus::Done));
        assert_eq!(changes.pinned, Some(false));

        let changes = TaskChanges::for_column(BoardColumn::Pinned);
        assert_eq!(changes.status, None);
        assert_eq!(changes.pinned, Some(true));
    }

    #[test]
    fn completion_is_reported_once() {
        let before = sample_task(1, "report");
        let mut after = before.clone();
        after.status = "Done".into();
        assert_eq!(change_kind(&before, &after), NotificationKind::TaskCompleted);
        assert_eq!(change_kind(&after, &after), NotificationKind::TaskUpdated);
    }

    #[test]
    fn like_patterns_are_escaped() {
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
    }
}
