// src/chatbot/mod.rs
//! 聊天机器人：正则意图识别 + 字段抽取 + 待确认草稿。
//! 创建/修改/删除都先生成草稿，用户回复确认后才真正写库；完成任务直接生效。

pub mod drafts;
pub mod extract;
pub mod gemini;
pub mod intent;

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::Serialize;

use self::drafts::{PendingAction, TaskDraft, TaskPatch};
use self::extract::{extract_fields, extract_target, extract_title, Fields};
use self::intent::{classification_prompt, classify, parse_label, Intent};
use crate::handlers::tasks::{
    apply_changes, change_kind, fetch_task, find_by_title, insert_task, query_tasks, remove_task,
    NewTask, TaskChanges, TaskFilter,
};
use crate::models::{ConversationMessage, Sender, Task};
use crate::notify::{notify, NotificationKind};
use crate::task::{compute_stats, TaskStats, TaskStatus, CATEGORY_MAX, TITLE_MAX};
use crate::{AppError, AppState};

const LIST_LIMIT: usize = 10;
const HISTORY_LIMIT: usize = 10;

const GREETING: &str = "Hi! I'm your task assistant. Tell me what you need to get done, \
     or ask me to show your tasks.";

const HELP: &str = "Here's what I can do:\n\
     • Create a task: \"add a task to buy milk tomorrow with high priority\"\n\
     • Update a task: \"change the priority of buy milk to low\", \"rename buy milk to buy oat milk\"\n\
     • Complete a task: \"mark buy milk as done\"\n\
     • Delete a task: \"delete buy milk\"\n\
     • List tasks: \"show my tasks\", \"what's due today?\", \"show overdue tasks\"\n\
     • Stats: \"how am I doing?\"\n\
     I'll ask you to confirm before creating, changing or deleting anything.";

/// 一条消息的处理方式
#[derive(Debug, PartialEq)]
pub enum Step {
    Confirm,
    Cancel,
    Amend(Fields),
    Intent(Intent),
    Unclassified,
}

fn draft_title(action: &PendingAction) -> Option<&str> {
    match action {
        PendingAction::Create(draft) => Some(&draft.title),
        PendingAction::Update { title, .. } => Some(title),
        PendingAction::Delete { .. } => None,
    }
}

/// 决定如何处理消息；不访问数据库和 LLM。
/// 有可修改的草稿时，带字段修改且没有指向别的任务的消息视为修改草稿。
pub fn plan(text: &str, pending: Option<&PendingAction>, today: NaiveDate) -> Step {
    let classified = classify(text, pending.is_some());
    match classified {
        Some(Intent::Confirm) => return Step::Confirm,
        Some(Intent::Cancel) => return Step::Cancel,
        _ => {}
    }

    if let Some(title) = pending.and_then(draft_title) {
        let refers_to_draft = match classified {
            None => true,
            Some(Intent::UpdateTask) => match extract_target(text) {
                None => true,
                Some(target) => {
                    matches!(target.to_lowercase().as_str(), "it" | "this" | "that")
                        || target.eq_ignore_ascii_case(title)
                }
            },
            Some(_) => false,
        };
        if refers_to_draft {
            let fields = extract_fields(text, today);
            if fields.has_edits() {
                return Step::Amend(fields);
            }
        }
    }

    match classified {
        Some(intent) => Step::Intent(intent),
        None => Step::Unclassified,
    }
}

#[derive(Debug, Serialize)]
pub struct BotReply {
    pub reply: String,
    pub intent: Intent,
    pub task: Option<Task>,
    pub pending: Option<PendingAction>,
}

impl BotReply {
    fn text(intent: Intent, reply: impl Into<String>) -> Self {
        BotReply {
            reply: reply.into(),
            intent,
            task: None,
            pending: None,
        }
    }

    fn with_task(mut self, task: Task) -> Self {
        self.task = Some(task);
        self
    }

    fn with_pending(mut self, pending: PendingAction) -> Self {
        self.pending = Some(pending);
        self
    }
}

// --- 1. 入口 ---

/// history 为本条消息之前的对话，按时间正序
pub async fn respond(
    state: &AppState,
    user_id: i32,
    text: &str,
    history: &[ConversationMessage],
) -> Result<BotReply, AppError> {
    let now = Utc::now();
    let pending = state.drafts.get(user_id);

    match plan(text, pending.as_ref(), now.date_naive()) {
        Step::Confirm => confirm(state, user_id).await,
        Step::Cancel => {
            state.drafts.remove(user_id);
            Ok(BotReply::text(Intent::Cancel, "Okay, I've discarded that."))
        }
        Step::Amend(fields) => match pending {
            Some(action) => Ok(amend(state, user_id, action, &fields)),
            None => dispatch(state, user_id, Intent::UpdateTask, text, now, history).await,
        },
        Step::Intent(intent) => dispatch(state, user_id, intent, text, now, history).await,
        Step::Unclassified => {
            let intent = classify_with_llm(state, text).await;
            tracing::debug!("LLM 意图识别结果: {}", intent.as_str());
            dispatch(state, user_id, intent, text, now, history).await
        }
    }
}

async fn classify_with_llm(state: &AppState, text: &str) -> Intent {
    let Some(llm) = &state.llm else {
        return Intent::General;
    };
    match llm.generate(&classification_prompt(text)).await {
        Ok(raw) => parse_label(&raw),
        Err(e) => {
            tracing::warn!("LLM 意图识别失败: {}", e);
            Intent::General
        }
    }
}

async fn dispatch(
    state: &AppState,
    user_id: i32,
    intent: Intent,
    text: &str,
    now: DateTime<Utc>,
    history: &[ConversationMessage],
) -> Result<BotReply, AppError> {
    match intent {
        Intent::Greeting => Ok(BotReply::text(intent, GREETING)),
        Intent::Help => Ok(BotReply::text(intent, HELP)),
        Intent::CreateTask => Ok(start_create(state, user_id, text, now.date_naive())),
        Intent::UpdateTask => start_update(state, user_id, text, now.date_naive()).await,
        Intent::DeleteTask => start_delete(state, user_id, text).await,
        Intent::CompleteTask => complete(state, user_id, text).await,
        Intent::ListTasks => list(state, user_id, text, now).await,
        Intent::Stats => {
            let tasks = query_tasks(&state.db, user_id, &TaskFilter::default()).await?;
            Ok(BotReply::text(intent, format_stats(&compute_stats(&tasks, now))))
        }
        Intent::Confirm | Intent::Cancel | Intent::General => Ok(general(state, text, history).await),
    }
}

// --- 2. 草稿：确认 / 修改 ---

async fn confirm(state: &AppState, user_id: i32) -> Result<BotReply, AppError> {
    let Some(action) = state.drafts.take(user_id) else {
        return Ok(BotReply::text(
            Intent::Confirm,
            "There's nothing waiting for confirmation. It may have expired, please ask again.",
        ));
    };

    match action {
        PendingAction::Create(draft) => {
            let task = match insert_task(&state.db, user_id, &NewTask::from_draft(&draft)).await {
                Ok(task) => task,
                Err(e) => {
                    // 写库失败时保留草稿，用户可以再次确认
                    state.drafts.put(user_id, PendingAction::Create(draft));
                    return Err(e);
                }
            };
            notify(state, user_id, NotificationKind::TaskCreated, &task.title).await;
            let reply = format!("Done! I've created {}.", draft.summary());
            Ok(BotReply::text(Intent::Confirm, reply).with_task(task))
        }
        PendingAction::Update { task_id, title, patch } => {
            if patch.is_empty() {
                return Ok(BotReply::text(
                    Intent::Confirm,
                    format!("There was nothing to change on \"{}\".", title),
                ));
            }
            let existing = match fetch_task(&state.db, user_id, task_id).await {
                Ok(task) => task,
                Err(AppError::NotFound(_)) => return Ok(gone(&title)),
                Err(e) => return Err(e),
            };
            let task = apply_changes(&state.db, user_id, &existing, TaskChanges::from_patch(&patch)).await?;
            notify(state, user_id, change_kind(&existing, &task), &task.title).await;
            let reply = format!("Updated \"{}\": {}.", title, patch.describe());
            Ok(BotReply::text(Intent::Confirm, reply).with_task(task))
        }
        PendingAction::Delete { task_id, title } => {
            let task = match remove_task(&state.db, user_id, task_id).await {
                Ok(task) => task,
                Err(AppError::NotFound(_)) => return Ok(gone(&title)),
                Err(e) => return Err(e),
            };
            notify(state, user_id, NotificationKind::TaskDeleted, &task.title).await;
            Ok(BotReply::text(Intent::Confirm, format!("Deleted \"{}\".", task.title)))
        }
    }
}

fn gone(title: &str) -> BotReply {
    BotReply::text(
        Intent::Confirm,
        format!("\"{}\" no longer exists, so there was nothing to do.", title),
    )
}

/// 标题/分类超过列长度时给出提示，草稿不会被保存
pub(crate) fn field_problem(title: Option<&str>, category: Option<&str>) -> Option<String> {
    if title.is_some_and(|t| t.chars().count() > TITLE_MAX) {
        return Some(format!(
            "That title is too long. Please keep it under {} characters.",
            TITLE_MAX
        ));
    }
    if category.is_some_and(|c| c.chars().count() > CATEGORY_MAX) {
        return Some(format!(
            "That category is too long. Please keep it under {} characters.",
            CATEGORY_MAX
        ));
    }
    None
}

fn amend(state: &AppState, user_id: i32, mut action: PendingAction, fields: &Fields) -> BotReply {
    if let Some(problem) = field_problem(fields.new_title.as_deref(), fields.category.as_deref()) {
        return BotReply::text(Intent::UpdateTask, problem).with_pending(action);
    }
    let reply = match &mut action {
        PendingAction::Create(draft) => {
            draft.amend(fields);
            format!("Updated the draft: {}. Shall I save it?", draft.summary())
        }
        PendingAction::Update { title, patch, .. } => {
            patch.amend(fields);
            format!("I'll update \"{}\": {}. Shall I go ahead?", title, patch.describe())
        }
        PendingAction::Delete { title, .. } => {
            format!("Delete \"{}\"? Please answer yes or no.", title)
        }
    };
    state.drafts.replace(user_id, action.clone());
    BotReply::text(Intent::UpdateTask, reply).with_pending(action)
}

// --- 3. 各意图 ---

fn start_create(state: &AppState, user_id: i32, text: &str, today: NaiveDate) -> BotReply {
    let Some(title) = extract_title(text) else {
        return BotReply::text(
            Intent::CreateTask,
            "What should the task be called? For example: add a task called \"Buy milk\" tomorrow.",
        );
    };

    // 新建时 "rename to" 之类的说法没有意义
    let fields = Fields {
        new_title: None,
        ..extract_fields(text, today)
    };
    if let Some(problem) = field_problem(Some(title.as_str()), fields.category.as_deref()) {
        return BotReply::text(Intent::CreateTask, problem);
    }
    let draft = TaskDraft::new(title, &fields);
    let reply = format!(
        "I'll create {}. Shall I save it? You can also tell me what to change.",
        draft.summary()
    );
    let action = PendingAction::Create(draft);
    state.drafts.put(user_id, action.clone());
    BotReply::text(Intent::CreateTask, reply).with_pending(action)
}

/// 定位目标任务；找不到时直接给出回复
async fn locate(
    state: &AppState,
    user_id: i32,
    text: &str,
    intent: Intent,
    verb: &str,
) -> Result<Result<Task, BotReply>, AppError> {
    let Some(target) = extract_target(text) else {
        return Ok(Err(BotReply::text(
            intent,
            format!("Which task should I {}? Tell me its title.", verb),
        )));
    };
    match find_by_title(&state.db, user_id, &target).await? {
        Some(task) => Ok(Ok(task)),
        None => Ok(Err(BotReply::text(
            intent,
            format!("I couldn't find a task matching \"{}\".", target),
        ))),
    }
}

async fn start_update(
    state: &AppState,
    user_id: i32,
    text: &str,
    today: NaiveDate,
) -> Result<BotReply, AppError> {
    let intent = Intent::UpdateTask;
    let task = match locate(state, user_id, text, intent, "update").await? {
        Ok(task) => task,
        Err(reply) => return Ok(reply),
    };

    let fields = extract_fields(text, today);
    if let Some(problem) = field_problem(fields.new_title.as_deref(), fields.category.as_deref()) {
        return Ok(BotReply::text(intent, problem).with_task(task));
    }
    let mut patch = TaskPatch::default();
    patch.amend(&fields);
    let reply = if patch.is_empty() {
        format!(
            "What should I change about \"{}\"? You can set the priority, due date, category or status, or rename it.",
            task.title
        )
    } else {
        format!("I'll update \"{}\": {}. Shall I go ahead?", task.title, patch.describe())
    };

    let action = PendingAction::Update {
        task_id: task.id,
        title: task.title.clone(),
        patch,
    };
    state.drafts.put(user_id, action.clone());
    Ok(BotReply::text(intent, reply).with_task(task).with_pending(action))
}

async fn start_delete(state: &AppState, user_id: i32, text: &str) -> Result<BotReply, AppError> {
    let intent = Intent::DeleteTask;
    let task = match locate(state, user_id, text, intent, "delete").await? {
        Ok(task) => task,
        Err(reply) => return Ok(reply),
    };

    let action = PendingAction::Delete {
        task_id: task.id,
        title: task.title.clone(),
    };
    state.drafts.put(user_id, action.clone());
    let reply = format!("Delete \"{}\"? This can't be undone. (yes / no)", task.title);
    Ok(BotReply::text(intent, reply).with_task(task).with_pending(action))
}

async fn complete(state: &AppState, user_id: i32, text: &str) -> Result<BotReply, AppError> {
    let intent = Intent::CompleteTask;
    let task = match locate(state, user_id, text, intent, "mark as done").await? {
        Ok(task) => task,
        Err(reply) => return Ok(reply),
    };

    if task.status() == TaskStatus::Done {
        let reply = format!("\"{}\" is already done.", task.title);
        return Ok(BotReply::text(intent, reply).with_task(task));
    }

    let changes = TaskChanges {
        status: Some(TaskStatus::Done),
        ..TaskChanges::default()
    };
    let updated = apply_changes(&state.db, user_id, &task, changes).await?;
    notify(state, user_id, NotificationKind::TaskCompleted, &updated.title).await;

    let reply = format!("Marked \"{}\" as done. Nice work!", updated.title);
    Ok(BotReply::text(intent, reply).with_task(updated))
}

static LIST_STATUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(to[ -]?do|pending|in[ -]?progress|doing|done|completed?|finished|cancell?ed|canceled|cancled)\b")
        .expect("list status regex")
});
static LIST_TODAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:today|tonight)\b").expect("list today regex"));
static LIST_OVERDUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:overdue|late|past due)\b").expect("list overdue regex"));

#[derive(Debug, Default, PartialEq)]
pub(crate) struct ListScope {
    pub status: Option<TaskStatus>,
    pub due_today: bool,
    pub overdue: bool,
}

pub(crate) fn list_scope(text: &str) -> ListScope {
    let status = LIST_STATUS.captures(text).and_then(|c| {
        let word = c[1].to_lowercase();
        if word == "finished" {
            Some(TaskStatus::Done)
        } else {
            word.parse().ok()
        }
    });
    ListScope {
        status,
        due_today: LIST_TODAY.is_match(text),
        overdue: LIST_OVERDUE.is_match(text),
    }
}

impl ListScope {
    fn matches(&self, task: &Task, now: DateTime<Utc>) -> bool {
        if let Some(status) = self.status {
            if task.status() != status {
                return false;
            }
        }
        if self.due_today && task.due_date.map(|d| d.date_naive()) != Some(now.date_naive()) {
            return false;
        }
        if self.overdue {
            let late = task.due_date.is_some_and(|d| d < now) && !task.status().is_closed();
            if !late {
                return false;
            }
        }
        true
    }

    fn describe(&self) -> String {
        let mut label = String::from("tasks");
        if let Some(status) = self.status {
            label = format!("\"{}\" {}", status, label);
        }
        if self.overdue {
            label = format!("overdue {}", label);
        }
        if self.due_today {
            label.push_str(" due today");
        }
        label
    }
}

async fn list(
    state: &AppState,
    user_id: i32,
    text: &str,
    now: DateTime<Utc>,
) -> Result<BotReply, AppError> {
    let scope = list_scope(text);
    let tasks = query_tasks(&state.db, user_id, &TaskFilter::default()).await?;
    let selected: Vec<&Task> = tasks.iter().filter(|t| scope.matches(t, now)).collect();

    if selected.is_empty() {
        return Ok(BotReply::text(
            Intent::ListTasks,
            format!("You have no {}.", scope.describe()),
        ));
    }

    let mut lines = vec![format!("Here are your {}:", scope.describe())];
    lines.extend(selected.iter().take(LIST_LIMIT).map(|t| format_task_line(t)));
    if selected.len() > LIST_LIMIT {
        lines.push(format!("…and {} more.", selected.len() - LIST_LIMIT));
    }
    Ok(BotReply::text(Intent::ListTasks, lines.join("\n")))
}

pub(crate) fn format_task_line(task: &Task) -> String {
    let mut line = format!("• {} [{}, {} priority", task.title, task.status(), task.priority());
    if let Some(due) = task.due_date {
        line.push_str(&format!(", due {}", due.format("%Y-%m-%d")));
    }
    line.push(']');
    if task.pinned {
        line.push_str(" 📌");
    }
    line
}

pub(crate) fn format_stats(stats: &TaskStats) -> String {
    if stats.total == 0 {
        return "You don't have any tasks yet. Want to add one?".to_string();
    }
    let count = |status: TaskStatus| stats.by_status.get(status.as_str()).copied().unwrap_or(0);
    format!(
        "You have {} tasks: {} to do, {} in progress, {} done and {} cancelled.\n\
         Overdue: {}. Due today: {}. Due this week: {}.\n\
         Completion rate: {}%.",
        stats.total,
        count(TaskStatus::Todo),
        count(TaskStatus::InProgress),
        count(TaskStatus::Done),
        count(TaskStatus::Cancelled),
        stats.overdue,
        stats.due_today,
        stats.due_this_week,
        stats.completion_rate,
    )
}

// --- 4. 闲聊 (LLM) ---

pub(crate) fn build_chat_prompt(history: &[ConversationMessage], text: &str) -> String {
    let mut prompt = String::from(
        "You are a friendly assistant inside a task-management app. \
         Keep answers short. If the user seems to want to manage tasks, \
         suggest phrases like \"add a task to ...\" or \"show my tasks\".\n\n",
    );
    let start = history.len().saturating_sub(HISTORY_LIMIT);
    for message in &history[start..] {
        let speaker = match message.sender() {
            Sender::User => "User",
            Sender::Bot => "Assistant",
        };
        prompt.push_str(&format!("{}: {}\n", speaker, message.message));
    }
    prompt.push_str(&format!("User: {}\nAssistant:", text));
    prompt
}

async fn general(state: &AppState, text: &str, history: &[ConversationMessage]) -> BotReply {
    let fallback = || {
        BotReply::text(
            Intent::General,
            format!("I'm not sure how to help with that.\n\n{}", HELP),
        )
    };
    let Some(llm) = &state.llm else {
        return fallback();
    };
    match llm.generate(&build_chat_prompt(history, text)).await {
        Ok(reply) => BotReply::text(Intent::General, reply),
        Err(e) => {
            tracing::warn!("LLM 回复失败: {}", e);
            fallback()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::task::tests::sample_task;
    use crate::task::Priority;
    use axum::async_trait;
    use chrono::TimeZone;
    use super::gemini::{LanguageModel, LlmError};
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;

    struct Canned(Result<&'static str, ()>);

    #[async_trait]
    impl LanguageModel for Canned {
        async fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
            self.0.map(String::from).map_err(|_| LlmError::EmptyResponse)
        }
    }

    // 连接池是惰性的；下面的流程都不会访问数据库
    fn state(llm: Option<Canned>) -> AppState {
        let config = Config::from_lookup(|key: &str| match key {
            "DATABASE_URL" => Some("postgres://postgres@127.0.0.1:1/unused".to_string()),
            "JWT_SECRET" => Some("secret".to_string()),
            _ => None,
        })
        .unwrap();
        let pool = PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_secs(1))
            .connect_lazy(&config.database_url)
            .unwrap();
        let state = AppState::new(pool, config).unwrap();
        match llm {
            Some(llm) => state.with_llm(Arc::new(llm)),
            None => state,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn create_draft(title: &str) -> PendingAction {
        PendingAction::Create(TaskDraft::new(title.into(), &Fields::default()))
    }

    #[test]
    fn yes_confirms_only_with_a_draft() {
        let pending = create_draft("Buy milk");
        assert_eq!(plan("yes please", Some(&pending), today()), Step::Confirm);
        assert_eq!(plan("nope", Some(&pending), today()), Step::Cancel);
        assert_eq!(plan("yes", None, today()), Step::Unclassified);
    }

    #[test]
    fn edits_amend_the_pending_draft() {
        let pending = create_draft("Buy milk");
        match plan("make it high priority", Some(&pending), today()) {
            Step::Amend(fields) => assert_eq!(fields.priority, Some(Priority::High)),
            other => panic!("unexpected step {:?}", other),
        }
        assert!(matches!(
            plan("change it to tomorrow", Some(&pending), today()),
            Step::Amend(_)
        ));
    }

    #[test]
    fn commands_about_other_tasks_are_not_amendments() {
        let pending = create_draft("Buy milk");
        assert_eq!(
            plan("change the priority of write report to high", Some(&pending), today()),
            Step::Intent(Intent::UpdateTask)
        );
        assert_eq!(
            plan("add a task to call mom tomorrow", Some(&pending), today()),
            Step::Intent(Intent::CreateTask)
        );
    }

    #[test]
    fn delete_drafts_cannot_be_amended() {
        let pending = PendingAction::Delete { task_id: 1, title: "Buy milk".into() };
        assert_eq!(plan("high priority", Some(&pending), today()), Step::Unclassified);
    }

    #[test]
    fn list_scope_reads_filters() {
        assert_eq!(list_scope("show my tasks"), ListScope::default());
        assert_eq!(
            list_scope("show my done tasks"),
            ListScope { status: Some(TaskStatus::Done), ..ListScope::default() }
        );
        assert_eq!(
            list_scope("what's due today?"),
            ListScope { due_today: true, ..ListScope::default() }
        );
        assert!(list_scope("list overdue tasks").overdue);
    }

    #[test]
    fn overdue_scope_skips_closed_tasks() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        let yesterday = Utc.with_ymd_and_hms(2026, 10, 15, 23, 59, 59).unwrap();
        let scope = ListScope { overdue: true, ..ListScope::default() };

        let mut late = sample_task(1, "late");
        late.due_date = Some(yesterday);
        let mut done = late.clone();
        done.status = "Done".into();

        assert!(scope.matches(&late, now));
        assert!(!scope.matches(&done, now));
        assert!(!scope.matches(&sample_task(2, "undated"), now));
    }

    #[test]
    fn task_lines_show_status_priority_and_due() {
        let mut task = sample_task(1, "Buy milk");
        task.due_date = Some(Utc.with_ymd_and_hms(2026, 10, 17, 23, 59, 59).unwrap());
        assert_eq!(format_task_line(&task), "• Buy milk [To Do, medium priority, due 2026-10-17]");
    }

    #[test]
    fn stats_summary_mentions_counts() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        let mut done = sample_task(1, "a");
        done.status = "Done".into();
        let tasks = vec![done, sample_task(2, "b")];
        let text = format_stats(&compute_stats(&tasks, now));
        assert!(text.starts_with("You have 2 tasks: 1 to do, 0 in progress, 1 done"));
        assert!(text.contains("Completion rate: 50%"));

        assert!(format_stats(&compute_stats(&[], now)).contains("don't have any tasks"));
    }

    #[test]
    fn chat_prompt_keeps_recent_history() {
        let history: Vec<ConversationMessage> = (0..12)
            .map(|i| ConversationMessage {
                id: i,
                conversation_id: 1,
                sender: if i % 2 == 0 { "user" } else { "bot" }.into(),
                message: format!("message {}", i),
                created_at: None,
            })
            .collect();
        let prompt = build_chat_prompt(&history, "what now?");
        assert!(!prompt.contains("message 1\n"));
        assert!(prompt.contains("User: message 2\n"));
        assert!(prompt.contains("Assistant: message 11\n"));
        assert!(prompt.ends_with("User: what now?\nAssistant:"));
    }

    #[tokio::test]
    async fn create_request_stores_a_draft() {
        let state = state(None);
        let bot = respond(&state, 1, "add a task to buy milk tomorrow for shopping", &[])
            .await
            .unwrap();
        assert_eq!(bot.intent, Intent::CreateTask);
        assert!(bot.reply.contains("\"Buy milk\""));
        match state.drafts.get(1) {
            Some(PendingAction::Create(draft)) => {
                assert_eq!(draft.title, "Buy milk");
                assert_eq!(draft.category, "Shopping");
                assert!(draft.due_date.is_some());
            }
            other => panic!("unexpected draft {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_title_asks_for_one() {
        let state = state(None);
        let bot = respond(&state, 1, "add a task", &[]).await.unwrap();
        assert_eq!(bot.intent, Intent::CreateTask);
        assert!(bot.pending.is_none());
        assert!(state.drafts.is_empty());
    }

    #[tokio::test]
    async fn follow_up_edits_amend_the_draft() {
        let state = state(None);
        state.drafts.put(1, create_draft("Buy milk"));

        let bot = respond(&state, 1, "make it high priority", &[]).await.unwrap();
        assert!(bot.reply.contains("high priority"));
        match state.drafts.get(1) {
            Some(PendingAction::Create(draft)) => assert_eq!(draft.priority, Priority::High),
            other => panic!("unexpected draft {:?}", other),
        }
    }

    #[test]
    fn over_long_fields_are_reported() {
        assert!(field_problem(Some("Buy milk"), Some("Shopping")).is_none());
        assert!(field_problem(Some("a".repeat(TITLE_MAX).as_str()), None).is_none());
        assert!(field_problem(Some("a".repeat(TITLE_MAX + 1).as_str()), None)
            .unwrap()
            .contains("title is too long"));
        assert!(field_problem(None, Some("c".repeat(CATEGORY_MAX + 1).as_str()))
            .unwrap()
            .contains("category is too long"));
    }

    #[tokio::test]
    async fn over_long_title_is_not_drafted() {
        let state = state(None);
        let text = format!("add a task called {}", "a".repeat(300));
        let bot = respond(&state, 1, &text, &[]).await.unwrap();
        assert_eq!(bot.intent, Intent::CreateTask);
        assert!(bot.reply.contains("too long"));
        assert!(bot.pending.is_none());
        assert!(state.drafts.is_empty());
    }

    #[tokio::test]
    async fn over_long_category_is_not_drafted() {
        let state = state(None);
        let text = format!("add a task to water plants category: {}", "g".repeat(80));
        let bot = respond(&state, 1, &text, &[]).await.unwrap();
        assert!(bot.reply.contains("category is too long"));
        assert!(state.drafts.is_empty());
    }

    #[tokio::test]
    async fn over_long_rename_leaves_the_draft_alone() {
        let state = state(None);
        state.drafts.put(1, create_draft("Buy milk"));

        let text = format!("call it {}", "b".repeat(400));
        let bot = respond(&state, 1, &text, &[]).await.unwrap();
        assert!(bot.reply.contains("too long"));
        match state.drafts.get(1) {
            Some(PendingAction::Create(draft)) => assert_eq!(draft.title, "Buy milk"),
            other => panic!("unexpected draft {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_save_keeps_the_draft() {
        // 端口 1 上没有数据库，插入必然失败
        let state = state(None);
        state.drafts.put(1, create_draft("Buy milk"));

        assert!(respond(&state, 1, "yes", &[]).await.is_err());
        match state.drafts.get(1) {
            Some(PendingAction::Create(draft)) => assert_eq!(draft.title, "Buy milk"),
            other => panic!("unexpected draft {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancel_discards_the_draft() {
        let state = state(None);
        state.drafts.put(1, create_draft("Buy milk"));
        let bot = respond(&state, 1, "never mind", &[]).await.unwrap();
        assert_eq!(bot.intent, Intent::Cancel);
        assert!(state.drafts.get(1).is_none());
    }

    #[tokio::test]
    async fn greeting_and_help_are_canned() {
        let state = state(None);
        assert_eq!(respond(&state, 1, "hello", &[]).await.unwrap().reply, GREETING);
        assert_eq!(respond(&state, 1, "what can you do?", &[]).await.unwrap().reply, HELP);
    }

    #[tokio::test]
    async fn unclassified_text_without_llm_gets_help() {
        let state = state(None);
        let bot = respond(&state, 1, "what is the capital of France", &[]).await.unwrap();
        assert_eq!(bot.intent, Intent::General);
        assert!(bot.reply.ends_with(HELP));
    }

    #[tokio::test]
    async fn llm_labels_and_replies_are_used() {
        let state = state(Some(Canned(Ok("greeting"))));
        assert_eq!(classify_with_llm(&state, "yo what's good").await, Intent::Greeting);

        let state = self::state(Some(Canned(Ok("Paris."))));
        let bot = respond(&state, 1, "what is the capital of France", &[]).await.unwrap();
        // 分类标签解析失败按 General 处理，回复直接来自模型
        assert_eq!(bot.intent, Intent::General);
        assert_eq!(bot.reply, "Paris.");
    }

    #[tokio::test]
    async fn llm_failures_fall_back() {
        let state = state(Some(Canned(Err(()))));
        assert_eq!(classify_with_llm(&state, "anything").await, Intent::General);
        let bot = respond(&state, 1, "what is the capital of France", &[]).await.unwrap();
        assert!(bot.reply.ends_with(HELP));
    }
}
