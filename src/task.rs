// src/task.rs
//! 任务领域逻辑：状态/优先级/分类的规范化，看板分组与仪表盘统计。
//! 这里都是纯函数，Handler 负责读写数据库后调用。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Serializer};

use crate::models::Task;
use crate::AppError;

// --- 1. 状态 ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Todo,
        TaskStatus::InProgress,
        TaskStatus::Done,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "To Do",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Done => "Done",
            TaskStatus::Cancelled => "Cancelled",
        }
    }

    /// 已完成或已取消的任务不再计入逾期
    pub fn is_closed(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TaskStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownValue(pub String);

impl fmt::Display for UnknownValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value: {}", self.0)
    }
}

impl FromStr for TaskStatus {
    type Err = UnknownValue;

    // 历史数据里存在 "Cancled" / "cancelled" 等多种拼写，这里统一收敛
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        match key.as_str() {
            "todo" | "pending" => Ok(TaskStatus::Todo),
            "inprogress" | "doing" => Ok(TaskStatus::InProgress),
            "done" | "completed" | "complete" => Ok(TaskStatus::Done),
            "cancelled" | "canceled" | "cancled" => Ok(TaskStatus::Cancelled),
            _ => Err(UnknownValue(s.to_string())),
        }
    }
}

// --- 2. 优先级 ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Priority {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            _ => Err(UnknownValue(s.to_string())),
        }
    }
}

// --- 3. 分类：内置分类 + 自定义 ---

pub const KNOWN_CATEGORIES: [&str; 7] = [
    "Work",
    "Personal",
    "Shopping",
    "Health",
    "Finance",
    "Education",
    "Other",
];

pub const DEFAULT_CATEGORY: &str = "Other";

// 与 tasks 表的 VARCHAR 长度一致
pub const TITLE_MAX: usize = 200;
pub const CATEGORY_MAX: usize = 50;

/// 内置分类按大小写不敏感匹配后返回规范写法；其它非空值原样保留为自定义分类
pub fn normalize_category(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return DEFAULT_CATEGORY.to_string();
    }
    KNOWN_CATEGORIES
        .iter()
        .find(|known| known.eq_ignore_ascii_case(trimmed))
        .map(|known| known.to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

pub fn check_dates(
    start_date: Option<DateTime<Utc>>,
    due_date: Option<DateTime<Utc>>,
) -> Result<(), AppError> {
    if let (Some(start), Some(due)) = (start_date, due_date) {
        if start > due {
            return Err(AppError::BadRequest(
                "Start date must be before the due date".into(),
            ));
        }
    }
    Ok(())
}

// --- 4. 列表排序 (白名单，直接拼进 ORDER BY) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskSort {
    #[default]
    CreatedAt,
    UpdatedAt,
    DueDate,
    StartDate,
    Title,
    Priority,
}

impl TaskSort {
    pub fn sql(&self) -> &'static str {
        match self {
            TaskSort::CreatedAt => "created_at",
            TaskSort::UpdatedAt => "updated_at",
            TaskSort::DueDate => "due_date",
            TaskSort::StartDate => "start_date",
            TaskSort::Title => "LOWER(title)",
            TaskSort::Priority => {
                "CASE priority WHEN 'high' THEN 3 WHEN 'medium' THEN 2 ELSE 1 END"
            }
        }
    }
}

impl FromStr for TaskSort {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "created_at" | "createdat" | "created" => Ok(TaskSort::CreatedAt),
            "updated_at" | "updatedat" | "updated" => Ok(TaskSort::UpdatedAt),
            "due_date" | "duedate" | "due" => Ok(TaskSort::DueDate),
            "start_date" | "startdate" | "start" => Ok(TaskSort::StartDate),
            "title" => Ok(TaskSort::Title),
            "priority" => Ok(TaskSort::Priority),
            _ => Err(UnknownValue(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Asc),
            "desc" | "descending" => Ok(SortOrder::Desc),
            _ => Err(UnknownValue(s.to_string())),
        }
    }
}

// --- 5. 看板 ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardColumn {
    Pinned,
    Status(TaskStatus),
}

impl BoardColumn {
    pub const ORDER: [BoardColumn; 5] = [
        BoardColumn::Pinned,
        BoardColumn::Status(TaskStatus::Todo),
        BoardColumn::Status(TaskStatus::InProgress),
        BoardColumn::Status(TaskStatus::Done),
        BoardColumn::Status(TaskStatus::Cancelled),
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BoardColumn::Pinned => "Pinned",
            BoardColumn::Status(status) => status.as_str(),
        }
    }

    pub fn of(task: &Task) -> BoardColumn {
        if task.pinned {
            BoardColumn::Pinned
        } else {
            BoardColumn::Status(task.status())
        }
    }
}

impl FromStr for BoardColumn {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("pinned") {
            return Ok(BoardColumn::Pinned);
        }
        s.parse().map(BoardColumn::Status)
    }
}

#[derive(Debug, Serialize)]
pub struct Column {
    pub name: &'static str,
    pub count: usize,
    pub tasks: Vec<Task>,
}

/// 按列分组；置顶任务只出现在 Pinned 列。
/// 列内按截止日期升序 (无截止日期排最后)，再按创建时间倒序。
pub fn build_board(tasks: Vec<Task>) -> Vec<Column> {
    let mut columns: Vec<Column> = BoardColumn::ORDER
        .iter()
        .map(|col| Column { name: col.name(), count: 0, tasks: Vec::new() })
        .collect();

    for task in tasks {
        let target = BoardColumn::of(&task);
        if let Some(idx) = BoardColumn::ORDER.iter().position(|c| *c == target) {
            columns[idx].tasks.push(task);
        }
    }

    for column in &mut columns {
        column.tasks.sort_by(|a, b| {
            let by_due = match (a.due_date, b.due_date) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            };
            by_due.then_with(|| b.created_at.cmp(&a.created_at))
        });
        column.count = column.tasks.len();
    }

    columns
}

// --- 6. 仪表盘统计 ---

#[derive(Debug, Serialize, PartialEq)]
pub struct TaskStats {
    pub total: usize,
    pub by_status: BTreeMap<&'static str, usize>,
    pub by_priority: BTreeMap<&'static str, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub overdue: usize,
    pub due_today: usize,
    pub due_this_week: usize,
    pub pinned: usize,
    pub favorites: usize,
    pub completion_rate: f64,
}

pub fn compute_stats(tasks: &[Task], now: DateTime<Utc>) -> TaskStats {
    let mut by_status: BTreeMap<&'static str, usize> =
        TaskStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();
    let mut by_priority: BTreeMap<&'static str, usize> =
        Priority::ALL.iter().map(|p| (p.as_str(), 0)).collect();
    let mut by_category: BTreeMap<String, usize> = BTreeMap::new();

    let today = now.date_naive();
    let week_end = now + Duration::days(7);
    let (mut overdue, mut due_today, mut due_this_week) = (0, 0, 0);

    for task in tasks {
        let status = task.status();
        *by_status.entry(status.as_str()).or_default() += 1;
        *by_priority.entry(task.priority().as_str()).or_default() += 1;
        *by_category.entry(task.category.clone()).or_default() += 1;

        if status.is_closed() {
            continue;
        }
        if let Some(due) = task.due_date {
            if due < now {
                overdue += 1;
            }
            if due.date_naive() == today {
                due_today += 1;
            }
            if due >= now && due <= week_end {
                due_this_week += 1;
            }
        }
    }

    let done = by_status[TaskStatus::Done.as_str()];
    let active = tasks.len() - by_status[TaskStatus::Cancelled.as_str()];
    let completion_rate = if active == 0 {
        0.0
    } else {
        (done as f64 * 1000.0 / active as f64).round() / 10.0
    };

    TaskStats {
        total: tasks.len(),
        by_status,
        by_priority,
        by_category,
        overdue,
        due_today,
        due_this_week,
        pinned: tasks.iter().filter(|t| t.pinned).count(),
        favorites: tasks.iter().filter(|t| t.favorite).count(),
        completion_rate,
    }
}
