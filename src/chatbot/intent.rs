// src/chatbot/intent.rs
//! 意图识别：按顺序尝试一组正则，第一个命中的为准；都不命中时交给 LLM 分类。

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Confirm,
    Cancel,
    Greeting,
    Help,
    CompleteTask,
    DeleteTask,
    CreateTask,
    UpdateTask,
    ListTasks,
    Stats,
    General,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Confirm => "confirm",
            Intent::Cancel => "cancel",
            Intent::Greeting => "greeting",
            Intent::Help => "help",
            Intent::CompleteTask => "complete_task",
            Intent::DeleteTask => "delete_task",
            Intent::CreateTask => "create_task",
            Intent::UpdateTask => "update_task",
            Intent::ListTasks => "list_tasks",
            Intent::Stats => "stats",
            Intent::General => "general",
        }
    }
}

/// 礼貌用语前缀，允许 "please can you add ..." 之类的说法
pub(crate) const POLITE: &str =
    r"^\s*(?:(?:please|pls|hey|hi|ok|okay|can you|could you|would you|i want to|i'd like to|i would like to|i need you to)[\s,]+)*";

fn anchored(body: &str) -> Regex {
    // 所有规则大小写不敏感
    Regex::new(&format!("(?i){}{}", POLITE, body)).expect("intent regex")
}

fn loose(body: &str) -> Regex {
    Regex::new(&format!("(?i){}", body)).expect("intent regex")
}

static CONFIRM: LazyLock<Regex> = LazyLock::new(|| {
    loose(r"^\s*(?:yes|yep|yeah|y|sure|ok|okay|confirm(?:ed)?|save(?: it)?|do it|go ahead|looks good|correct|create it)\s*(?:please)?\s*[.!]*\s*$")
});

static CANCEL: LazyLock<Regex> = LazyLock::new(|| {
    loose(r"^\s*(?:no|nope|n|cancel|discard|never\s*mind|forget it|stop|abort|don't)\b")
});

static CASCADE: LazyLock<Vec<(Intent, Regex)>> = LazyLock::new(|| {
    vec![
        (
            Intent::Greeting,
            loose(r"^\s*(?:hi|hello|hey|hiya|greetings|good (?:morning|afternoon|evening))(?: there)?[\s!.,]*$"),
        ),
        (
            Intent::Help,
            anchored(r"(?:help(?: me)?|what can you do|how does this work|commands)[\s?!.]*$"),
        ),
        (
            Intent::CompleteTask,
            anchored(r"(?:complete|finish|tick off|check off|i(?:\s+have|'ve)?\s+(?:finished|completed|done with))\b"),
        ),
        (
            Intent::CompleteTask,
            loose(r"\bmark\b.+\bas\s+(?:done|complete|completed|finished)\b"),
        ),
        (
            Intent::DeleteTask,
            anchored(r"(?:delete|remove|erase|trash|get rid of)\b"),
        ),
        (
            Intent::CreateTask,
            anchored(r"(?:create|add|new|schedule|remind me|set a reminder|make (?:a |an )?(?:new )?(?:task|todo|reminder))\b"),
        ),
        (
            Intent::CreateTask,
            loose(r"\b(?:add|create)\s+(?:a\s+|an\s+)?(?:new\s+)?(?:task|todo|to-do|reminder)\b"),
        ),
        (
            Intent::UpdateTask,
            anchored(r"(?:update|edit|change|modify|rename|reschedule|postpone|move|set|mark)\b"),
        ),
        (
            Intent::ListTasks,
            loose(r"\b(?:list|show|display|view|see|what are|what's|whats|what do i have)\b.*\b(?:tasks?|todos?|to-dos?|agenda|schedule|due|overdue)\b"),
        ),
        (
            Intent::ListTasks,
            anchored(r"(?:my\s+)?(?:tasks|todos|to-dos)\s*\??\s*$"),
        ),
        (
            Intent::Stats,
            loose(r"\b(?:how many|progress|statistics|stats|summary|overview|how am i doing)\b"),
        ),
    ]
});

/// 只有存在待确认草稿时才识别 Confirm / Cancel，避免 "ok" 之类被误判
pub fn classify(text: &str, has_pending: bool) -> Option<Intent> {
    if has_pending {
        if CONFIRM.is_match(text) {
            return Some(Intent::Confirm);
        }
        if CANCEL.is_match(text) {
            return Some(Intent::Cancel);
        }
    }
    CASCADE
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(intent, _)| *intent)
}

const LLM_LABELS: [Intent; 9] = [
    Intent::CreateTask,
    Intent::UpdateTask,
    Intent::DeleteTask,
    Intent::CompleteTask,
    Intent::ListTasks,
    Intent::Stats,
    Intent::Greeting,
    Intent::Help,
    Intent::General,
];

pub fn classification_prompt(text: &str) -> String {
    let labels: Vec<&str> = LLM_LABELS.iter().map(|i| i.as_str()).collect();
    format!(
        "You classify messages sent to a task-management assistant.\n\
         Answer with exactly one label from this list and nothing else: {}.\n\
         Message: \"{}\"\n\
         Label:",
        labels.join(", "),
        text.replace('"', "'")
    )
}

/// 解析 LLM 返回的标签；容忍大小写、空格、反引号和多余的句子
pub fn parse_label(raw: &str) -> Intent {
    let normalized = raw.trim().to_lowercase().replace([' ', '-'], "_");
    LLM_LABELS
        .iter()
        .find(|intent| normalized.contains(intent.as_str()))
        .copied()
        .unwrap_or(Intent::General)
}
