// src/chatbot/extract.rs
//! 从自然语言里抽取任务字段：标题、优先级、截止日期、分类、状态。
//! 所有日期都相对于调用方传入的 today 计算，方便测试。

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use regex::{Captures, Regex};

use super::intent::POLITE;
use crate::task::{normalize_category, Priority, TaskStatus, KNOWN_CATEGORIES};

fn re(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){}", pattern)).expect("extract regex")
}

// 单引号只在前后是空白/标点时才算引号，避免把 "Tom's" 当成引用
static QUOTED: LazyLock<Regex> = LazyLock::new(|| {
    re(r#""([^"]{1,200})"|“([^”]{1,200})”|(?:^|\s)'([^']{1,200})'(?:$|[\s.,!?])"#)
});

static CALLED: LazyLock<Regex> = LazyLock::new(|| re(r"\b(?:called|named|titled)\s+(.+)$"));

static COMMAND_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    re(&format!(
        r"{}(?:i(?:\s+have|'ve)?\s+(?:finished|completed|done with)|i\s+need\s+to\s+add|remind me to|remind me|set a reminder to|create|add|new|schedule|make|complete|finish|mark|tick off|check off|delete|remove|erase|trash|get rid of|update|edit|change|modify|rename|reschedule|postpone|move|set)\b\s*(?:(?:a|an|the|my|new)\s+)*(?:(?:task|todo|to-do|reminder)\b\s*)?(?:(?:to|for|:)\s+|:\s*)?",
        POLITE
    ))
});

static FIELD_OF: LazyLock<Regex> = LazyLock::new(|| {
    re(r"^(?:the\s+)?(?:priority|due date|deadline|status|category|title|name|date)\s+(?:of|for|on)\s+(?:(?:the|my)\s+)?(?:(?:task|todo)\s+)?")
});

const WEEKDAYS: &str =
    "monday|tuesday|wednesday|thursday|friday|saturday|sunday|mon|tue|tues|wed|thu|thur|thurs|fri|sat|sun";

// 能被 extract_due_date 识别的日期写法
fn date_phrase() -> String {
    format!(
        r"\d{{4}}-\d{{1,2}}-\d{{1,2}}|today|tonight|tomorrow|day after tomorrow|next week|in\s+\d{{1,3}}\s+(?:days?|weeks?)|(?:next\s+)?(?:{})",
        WEEKDAYS
    )
}

// "on"/"by" 等只有后面跟着日期时才截断标题，"turn on the lights" 保持完整
static TRAILING_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    let categories = KNOWN_CATEGORIES.join("|");
    re(&format!(
        r"\s+(?:(?:with\s+|at\s+)?(?:a\s+)?(?:high|medium|low|normal|urgent)\s+priority\b|(?:with\s+)?priority\b|(?:due\s+(?:(?:on|by|before)\s+)?|(?:on|by|before|until)\s+)(?:the\s+)?(?:{})\b|(?:today|tonight|tomorrow|next week|day after tomorrow)\b|in\s+\d+\s+(?:days?|weeks?)\b|(?:for|in|under|category)\s+(?:the\s+)?(?:{})\b|(?:to|as|into)\s+(?:to ?do|in[ -]?progress|done|completed?|cancell?ed|canceled|cancled|high|medium|low)\b|it'?s\s+(?:urgent|important)\b|asap\b)",
        date_phrase(),
        categories
    ))
});

static TRAILING_CONNECTOR: LazyLock<Regex> =
    LazyLock::new(|| re(r"\s+(?:to|as|into|by|on|for|with|at|due)\s*$"));

static TRAILING_NOUN: LazyLock<Regex> = LazyLock::new(|| re(r"\s+(?:task|todo|to-do|reminder)\s*$"));

static RENAME_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"^\s*(?:please\s+)?rename\s+(?:the\s+)?(?:task\s+)?["“']?(.+?)["”']?\s+to\s+["“']?(.+?)["”']?\s*[.!]?\s*$"#)
});

static RENAME_IT: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"\b(?:rename(?:\s+it)?\s+to|call it|name it|change (?:the\s+)?(?:title|name) to)\s+["“']?(.+?)["”']?\s*[.!]?\s*$"#)
});

static PRIORITY: LazyLock<Regex> = LazyLock::new(|| {
    re(r"\b(high|medium|normal|low)\s+priority\b|\bpriority\s*(?:to|of|is|as|:|=)?\s*(high|medium|normal|low)\b|\bpriority\s+(?:of|for|on)\s+.+?\s+to\s+(high|medium|normal|low)\b|\b(urgent|asap|important)\b")
});

static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| re(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b"));
static DAY_AFTER_TOMORROW: LazyLock<Regex> = LazyLock::new(|| re(r"\bday after tomorrow\b"));
static TOMORROW: LazyLock<Regex> = LazyLock::new(|| re(r"\btomorrow\b"));
static TODAY: LazyLock<Regex> = LazyLock::new(|| re(r"\b(?:today|tonight)\b"));
static NEXT_WEEK: LazyLock<Regex> = LazyLock::new(|| re(r"\bnext week\b"));
static IN_N: LazyLock<Regex> = LazyLock::new(|| re(r"\bin\s+(\d{1,3})\s+(days?|weeks?)\b"));
// 星期几必须带 on/by/next/due 等前缀，"buy a sun hat" 不是日期
static WEEKDAY: LazyLock<Regex> = LazyLock::new(|| {
    re(&format!(
        r"\b(?:on|by|next|due|until|before)\s+(?:next\s+)?({})\b",
        WEEKDAYS
    ))
});

static CATEGORY: LazyLock<Regex> = LazyLock::new(|| {
    re(&format!(
        r"\b(?:for|in|under|as)\s+(?:the\s+)?({})\b|\bcategory\s*(?:to|is|as|:|=)?\s*([\w-]+)",
        KNOWN_CATEGORIES.join("|")
    ))
});

static STATUS: LazyLock<Regex> = LazyLock::new(|| {
    re(r"\b(?:to|as|into)\s+(to[ -]?do|in[ -]?progress|done|completed?|cancell?ed|canceled|cancled)\b")
});

/// 从一句话里识别出的可修改字段
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Fields {
    pub new_title: Option<String>,
    pub priority: Option<Priority>,
    pub due_date: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub status: Option<TaskStatus>,
}

impl Fields {
    pub fn has_edits(&self) -> bool {
        self.new_title.is_some()
            || self.priority.is_some()
            || self.due_date.is_some()
            || self.category.is_some()
            || self.status.is_some()
    }
}

pub fn extract_fields(text: &str, today: NaiveDate) -> Fields {
    let new_title = RENAME_TARGET
        .captures(text)
        .map(|c| c[2].to_string())
        .or_else(|| RENAME_IT.captures(text).map(|c| c[1].to_string()))
        .map(|t| tidy_title(&t))
        .filter(|t| !t.is_empty());

    Fields {
        new_title,
        priority: extract_priority(text),
        due_date: extract_due_date(text, today),
        category: extract_category(text),
        status: extract_status(text),
    }
}

/// 新建任务时的标题
pub fn extract_title(text: &str) -> Option<String> {
    if let Some(c) = QUOTED.captures(text) {
        return first_group(&c).and_then(|q| non_empty(tidy_title(q)));
    }
    if let Some(c) = CALLED.captures(text) {
        return non_empty(tidy_title(&cut_trailing(&c[1])));
    }
    let rest = COMMAND_PREFIX.replace(text, "");
    non_empty(tidy_title(&cut_trailing(&rest)))
}

/// 修改/删除/完成时要定位的已有任务标题
pub fn extract_target(text: &str) -> Option<String> {
    if let Some(c) = QUOTED.captures(text) {
        return first_group(&c).and_then(|q| non_empty(q.trim().to_string()));
    }
    if let Some(c) = RENAME_TARGET.captures(text) {
        return non_empty(c[1].trim().to_string());
    }
    let rest = COMMAND_PREFIX.replace(text, "");
    let rest = FIELD_OF.replace(&rest, "");
    let rest = cut_trailing(&rest);
    let rest = TRAILING_NOUN.replace(&rest, "");
    let target = rest
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .trim();
    if target.eq_ignore_ascii_case("it") {
        return None;
    }
    non_empty(target.to_string())
}

pub fn extract_priority(text: &str) -> Option<Priority> {
    let c = PRIORITY.captures(text)?;
    let word = first_group(&c)?.to_lowercase();
    match word.as_str() {
        "high" | "urgent" | "asap" | "important" => Some(Priority::High),
        "medium" | "normal" => Some(Priority::Medium),
        "low" => Some(Priority::Low),
        _ => None,
    }
}

/// 截止时间统一取当天 23:59:59 (UTC)
pub fn extract_due_date(text: &str, today: NaiveDate) -> Option<DateTime<Utc>> {
    let date = if let Some(c) = ISO_DATE.captures(text) {
        NaiveDate::from_ymd_opt(c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?)?
    } else if DAY_AFTER_TOMORROW.is_match(text) {
        today + Duration::days(2)
    } else if TOMORROW.is_match(text) {
        today + Duration::days(1)
    } else if TODAY.is_match(text) {
        today
    } else if NEXT_WEEK.is_match(text) {
        today + Duration::days(7)
    } else if let Some(c) = IN_N.captures(text) {
        let n: i64 = c[1].parse().ok()?;
        let days = if c[2].to_lowercase().starts_with("week") { n * 7 } else { n };
        today + Duration::days(days)
    } else if let Some(c) = WEEKDAY.captures(text) {
        next_weekday(today, parse_weekday(&c[1])?)
    } else {
        return None;
    };
    end_of_day(date)
}

pub fn extract_category(text: &str) -> Option<String> {
    let c = CATEGORY.captures(text)?;
    first_group(&c).map(normalize_category)
}

pub fn extract_status(text: &str) -> Option<TaskStatus> {
    STATUS.captures(text).and_then(|c| c[1].parse().ok())
}

fn first_group<'t>(c: &Captures<'t>) -> Option<&'t str> {
    c.iter().skip(1).flatten().next().map(|m| m.as_str())
}

fn parse_weekday(raw: &str) -> Option<Weekday> {
    let lower = raw.to_lowercase();
    let weekday = match &lower[..3] {
        "mon" => Weekday::Mon,
        "tue" => Weekday::Tue,
        "wed" => Weekday::Wed,
        "thu" => Weekday::Thu,
        "fri" => Weekday::Fri,
        "sat" => Weekday::Sat,
        "sun" => Weekday::Sun,
        _ => return None,
    };
    Some(weekday)
}

/// 下一个指定星期几，严格晚于 today
fn next_weekday(today: NaiveDate, target: Weekday) -> NaiveDate {
    let current = today.weekday().num_days_from_monday() as i64;
    let wanted = target.num_days_from_monday() as i64;
    let mut delta = (wanted - current).rem_euclid(7);
    if delta == 0 {
        delta = 7;
    }
    today + Duration::days(delta)
}

fn end_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(23, 59, 59).map(|naive| Utc.from_utc_datetime(&naive))
}

fn cut_trailing(text: &str) -> String {
    let head = match TRAILING_CLAUSE.find(text) {
        Some(m) => &text[..m.start()],
        None => text,
    };
    // "renew passport to tomorrow" 截断后会残留 "to"
    TRAILING_CONNECTOR.replace(head, "").into_owned()
}

fn tidy_title(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '“' || c == '”')
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    // 2026-10-16 是星期五
    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> Option<DateTime<Utc>> {
        end_of_day(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[rstest]
    #[case("Add a task to buy milk tomorrow", "Buy milk")]
    #[case("add a task to buy milk with high priority for shopping", "Buy milk")]
    #[case("please remind me to call mom on friday", "Call mom")]
    #[case("create a new task called \"Write report\" due 2026-11-01", "Write report")]
    #[case("create a task named quarterly review for work", "Quarterly review")]
    #[case("new task: renew passport next week", "Renew passport")]
    #[case("can you add pick up the kids in 2 days", "Pick up the kids")]
    #[case("schedule dentist appointment", "Dentist appointment")]
    #[case("add a task to turn on the lights", "Turn on the lights")]
    #[case("add a task to sign off by the team lead", "Sign off by the team lead")]
    #[case("add a task to pay rent on 2026-11-01", "Pay rent")]
    #[case("add a task to file report due by next monday", "File report")]
    fn titles_are_extracted(#[case] text: &str, #[case] expected: &str) {
        assert_eq!(extract_title(text).as_deref(), Some(expected));
    }

    #[test]
    fn bare_command_has_no_title() {
        assert_eq!(extract_title("add a task"), None);
        assert_eq!(extract_title("create a new task:"), None);
    }

    #[test]
    fn apostrophes_are_not_quotes() {
        assert_eq!(
            extract_title("add a task to call Tom's mom").as_deref(),
            Some("Call Tom's mom")
        );
    }

    #[rstest]
    #[case("delete the buy milk task", "buy milk")]
    #[case("please remove 'Call mom'", "Call mom")]
    #[case("mark buy milk as done", "buy milk")]
    #[case("change the priority of buy milk to high", "buy milk")]
    #[case("move write report to in progress", "write report")]
    #[case("rename buy milk to buy oat milk", "buy milk")]
    #[case("complete task pay rent", "pay rent")]
    #[case("I finished the report", "report")]
    #[case("set the due date of renew passport to tomorrow", "renew passport")]
    fn targets_are_extracted(#[case] text: &str, #[case] expected: &str) {
        assert_eq!(extract_target(text).as_deref(), Some(expected));
    }

    #[test]
    fn pronoun_target_is_ignored() {
        assert_eq!(extract_target("change it to high priority"), None);
    }

    #[rstest]
    #[case("make it high priority", Some(Priority::High))]
    #[case("priority: low", Some(Priority::Low))]
    #[case("set priority to medium", Some(Priority::Medium))]
    #[case("change the priority of buy milk to low", Some(Priority::Low))]
    #[case("this is urgent", Some(Priority::High))]
    #[case("buy a lowrider bike", None)]
    #[case("high school reunion", None)]
    fn priorities_are_extracted(#[case] text: &str, #[case] expected: Option<Priority>) {
        assert_eq!(extract_priority(text), expected);
    }

    #[rstest]
    #[case("buy milk today", day(2026, 10, 16))]
    #[case("buy milk tomorrow", day(2026, 10, 17))]
    #[case("the day after tomorrow", day(2026, 10, 18))]
    #[case("sometime next week", day(2026, 10, 23))]
    #[case("in 3 days", day(2026, 10, 19))]
    #[case("in 2 weeks", day(2026, 10, 30))]
    #[case("on monday", day(2026, 10, 19))]
    #[case("by friday", day(2026, 10, 23))]
    #[case("due next wed", day(2026, 10, 21))]
    #[case("buy a sun hat", None)]
    #[case("wed the couple at noon", None)]
    #[case("sat exam prep", None)]
    #[case("due 2026-12-24", day(2026, 12, 24))]
    #[case("due 2026-13-45", None)]
    #[case("no date here", None)]
    fn due_dates_are_relative_to_today(#[case] text: &str, #[case] expected: Option<DateTime<Utc>>) {
        assert_eq!(extract_due_date(text, today()), expected);
    }

    #[rstest]
    #[case("buy milk for shopping", Some("Shopping"))]
    #[case("file taxes under Finance", Some("Finance"))]
    #[case("set category to garden", Some("garden"))]
    #[case("buy milk", None)]
    fn categories_are_extracted(#[case] text: &str, #[case] expected: Option<&str>) {
        assert_eq!(extract_category(text).as_deref(), expected);
    }

    #[rstest]
    #[case("move it to in progress", Some(TaskStatus::InProgress))]
    #[case("mark as done", Some(TaskStatus::Done))]
    #[case("set it to cancelled", Some(TaskStatus::Cancelled))]
    #[case("go to the store", None)]
    fn statuses_are_extracted(#[case] text: &str, #[case] expected: Option<TaskStatus>) {
        assert_eq!(extract_status(text), expected);
    }

    #[test]
    fn renames_produce_a_new_title() {
        let fields = extract_fields("rename buy milk to buy oat milk", today());
        assert_eq!(fields.new_title.as_deref(), Some("Buy oat milk"));

        let fields = extract_fields("call it \"Weekly groceries\"", today());
        assert_eq!(fields.new_title.as_deref(), Some("Weekly groceries"));
    }

    #[test]
    fn amendments_collect_every_field() {
        let fields = extract_fields("make it high priority for work due tomorrow", today());
        assert!(fields.has_edits());
        assert_eq!(fields.priority, Some(Priority::High));
        assert_eq!(fields.category.as_deref(), Some("Work"));
        assert_eq!(fields.due_date, day(2026, 10, 17));
        assert_eq!(fields.new_title, None);
    }

    #[test]
    fn plain_chatter_has_no_edits() {
        assert!(!extract_fields("thanks a lot", today()).has_edits());
    }
}
