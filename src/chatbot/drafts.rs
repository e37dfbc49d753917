// src/chatbot/drafts.rs
//! 待用户确认的临时任务 (chatbot temp task)。
//! 进程内存储，每个用户最多一条；读取时检查过期，后台任务定期清理。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use super::extract::Fields;
use crate::task::{Priority, TaskStatus, DEFAULT_CATEGORY};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskDraft {
    pub title: String,
    pub category: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub due_date: Option<DateTime<Utc>>,
}

impl TaskDraft {
    pub fn new(title: String, fields: &Fields) -> Self {
        let mut draft = TaskDraft {
            title,
            category: DEFAULT_CATEGORY.to_string(),
            priority: Priority::default(),
            status: TaskStatus::Todo,
            due_date: None,
        };
        draft.amend(fields);
        draft
    }

    pub fn amend(&mut self, fields: &Fields) {
        if let Some(title) = &fields.new_title {
            self.title = title.clone();
        }
        if let Some(category) = &fields.category {
            self.category = category.clone();
        }
        if let Some(priority) = fields.priority {
            self.priority = priority;
        }
        if let Some(status) = fields.status {
            self.status = status;
        }
        if let Some(due) = fields.due_date {
            self.due_date = Some(due);
        }
    }

    pub fn summary(&self) -> String {
        let due = self
            .due_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "no due date".to_string());
        format!(
            "\"{}\" ({} priority, {}, {}, {})",
            self.title, self.priority, self.category, self.status, due
        )
    }
}

/// 对已有任务的修改；None 表示不变
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub category: Option<String>,
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    pub due_date: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn amend(&mut self, fields: &Fields) {
        if fields.new_title.is_some() {
            self.title = fields.new_title.clone();
        }
        if fields.category.is_some() {
            self.category = fields.category.clone();
        }
        if fields.priority.is_some() {
            self.priority = fields.priority;
        }
        if fields.status.is_some() {
            self.status = fields.status;
        }
        if fields.due_date.is_some() {
            self.due_date = fields.due_date;
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == TaskPatch::default()
    }

    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(title) = &self.title {
            parts.push(format!("title → \"{}\"", title));
        }
        if let Some(priority) = self.priority {
            parts.push(format!("priority → {}", priority));
        }
        if let Some(status) = self.status {
            parts.push(format!("status → {}", status));
        }
        if let Some(category) = &self.category {
            parts.push(format!("category → {}", category));
        }
        if let Some(due) = self.due_date {
            parts.push(format!("due → {}", due.format("%Y-%m-%d")));
        }
        parts.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PendingAction {
    Create(TaskDraft),
    Update { task_id: i32, title: String, patch: TaskPatch },
    Delete { task_id: i32, title: String },
}

struct Entry {
    created: Instant,
    action: PendingAction,
}

pub struct DraftStore {
    ttl: Duration,
    entries: Mutex<HashMap<i32, Entry>>,
}

impl DraftStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // 锁只在同步代码里持有，不会跨 await；中毒时继续使用内部数据
    fn lock(&self) -> MutexGuard<'_, HashMap<i32, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 新草稿覆盖旧草稿
    pub fn put(&self, user_id: i32, action: PendingAction) {
        self.put_at(user_id, action, Instant::now());
    }

    pub fn get(&self, user_id: i32) -> Option<PendingAction> {
        self.get_at(user_id, Instant::now())
    }

    /// 取出并删除 (确认或取消时使用)
    pub fn take(&self, user_id: i32) -> Option<PendingAction> {
        self.take_at(user_id, Instant::now())
    }

    pub fn remove(&self, user_id: i32) {
        self.lock().remove(&user_id);
    }

    /// 保留原创建时间，修改草稿内容
    pub fn replace(&self, user_id: i32, action: PendingAction) {
        let mut entries = self.lock();
        match entries.get_mut(&user_id) {
            Some(entry) => entry.action = action,
            None => {
                entries.insert(user_id, Entry { created: Instant::now(), action });
            }
        }
    }

    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        now.saturating_duration_since(entry.created) >= self.ttl
    }

    fn put_at(&self, user_id: i32, action: PendingAction, now: Instant) {
        self.lock().insert(user_id, Entry { created: now, action });
    }

    fn get_at(&self, user_id: i32, now: Instant) -> Option<PendingAction> {
        let mut entries = self.lock();
        let expired = self.is_expired(entries.get(&user_id)?, now);
        if expired {
            entries.remove(&user_id);
            return None;
        }
        entries.get(&user_id).map(|entry| entry.action.clone())
    }

    fn take_at(&self, user_id: i32, now: Instant) -> Option<PendingAction> {
        let entry = self.lock().remove(&user_id)?;
        if self.is_expired(&entry, now) {
            return None;
        }
        Some(entry.action)
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        before - entries.len()
    }
}

/// 定期清理过期草稿
pub fn spawn_sweeper(store: Arc<DraftStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                tracing::debug!("清理过期草稿 {} 条", purged);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn draft(title: &str) -> PendingAction {
        PendingAction::Create(TaskDraft::new(title.to_string(), &Fields::default()))
    }

    #[test]
    fn drafts_start_with_defaults_and_take_fields() {
        let fields = Fields {
            priority: Some(Priority::High),
            category: Some("Work".into()),
            ..Fields::default()
        };
        let d = TaskDraft::new("Ship release".into(), &fields);
        assert_eq!(d.priority, Priority::High);
        assert_eq!(d.category, "Work");
        assert_eq!(d.status, TaskStatus::Todo);
        assert_eq!(d.due_date, None);
    }

    #[test]
    fn amending_keeps_untouched_fields() {
        let mut d = TaskDraft::new("Buy milk".into(), &Fields::default());
        d.amend(&Fields { new_title: Some("Buy oat milk".into()), ..Fields::default() });
        assert_eq!(d.title, "Buy oat milk");
        assert_eq!(d.priority, Priority::Medium);
        assert_eq!(d.category, "Other");
    }

    #[test]
    fn summary_mentions_every_field() {
        let due = Utc.with_ymd_and_hms(2026, 10, 17, 23, 59, 59).unwrap();
        let d = TaskDraft {
            title: "Buy milk".into(),
            category: "Shopping".into(),
            priority: Priority::Low,
            status: TaskStatus::Todo,
            due_date: Some(due),
        };
        assert_eq!(d.summary(), "\"Buy milk\" (low priority, Shopping, To Do, 2026-10-17)");
    }

    #[test]
    fn patch_describes_changes() {
        let mut patch = TaskPatch::default();
        assert!(patch.is_empty());
        patch.amend(&Fields {
            priority: Some(Priority::High),
            status: Some(TaskStatus::Done),
            ..Fields::default()
        });
        assert!(!patch.is_empty());
        assert_eq!(patch.describe(), "priority → high, status → Done");
    }

    #[test]
    fn entries_expire_on_read() {
        let store = DraftStore::new(Duration::from_secs(600));
        let start = Instant::now();
        store.put_at(1, draft("Buy milk"), start);

        assert!(store.get_at(1, start + Duration::from_secs(599)).is_some());
        assert!(store.get_at(1, start + Duration::from_secs(600)).is_none());
        // 过期读取会顺带删除
        assert!(store.is_empty());
    }

    #[test]
    fn take_removes_and_ignores_expired() {
        let store = DraftStore::new(Duration::from_secs(60));
        let start = Instant::now();
        store.put_at(1, draft("a"), start);
        store.put_at(2, draft("b"), start);

        assert_eq!(store.take_at(1, start), Some(draft("a")));
        assert_eq!(store.take_at(1, start), None);
        assert_eq!(store.take_at(2, start + Duration::from_secs(61)), None);
        assert!(store.is_empty());
    }

    #[test]
    fn new_draft_replaces_previous_one() {
        let store = DraftStore::new(Duration::from_secs(60));
        store.put(7, draft("first"));
        store.put(7, draft("second"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(7), Some(draft("second")));
    }

    #[test]
    fn replace_keeps_the_original_clock() {
        let store = DraftStore::new(Duration::from_secs(60));
        let start = Instant::now();
        store.put_at(3, draft("old"), start);
        store.replace(3, draft("new"));
        assert!(store.get_at(3, start + Duration::from_secs(61)).is_none());
    }

    #[test]
    fn purge_drops_only_expired_entries() {
        let store = DraftStore::new(Duration::from_secs(60));
        let start = Instant::now();
        store.put_at(1, draft("stale"), start);
        store.put_at(2, draft("fresh"), start + Duration::from_secs(50));

        assert_eq!(store.purge_expired_at(start + Duration::from_secs(70)), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get_at(2, start + Duration::from_secs(70)).is_some());
    }

    #[tokio::test]
    async fn sweeper_purges_in_the_background() {
        let store = Arc::new(DraftStore::new(Duration::from_millis(10)));
        store.put(1, draft("gone soon"));
        let handle = spawn_sweeper(store.clone(), Duration::from_millis(5));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.is_empty());
        handle.abort();
    }
}
