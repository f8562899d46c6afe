use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque task identifier. Generated once per task and never reused.
pub type TaskId = Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub tags: Vec<String>,

    pub deadline: DateTime<Utc>,

    #[serde(default)]
    pub completed: bool,

    /// Snapshot of `deadline < now` taken at the last create/update.
    #[serde(default)]
    pub missed: bool,

    pub created_at: DateTime<Utc>,
}

/// Caller-supplied fields for a new task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub deadline: DateTime<Utc>,
}

impl Task {
    pub fn from_input(input: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: input.title,
            description: input.description.unwrap_or_default(),
            tags: input.tags,
            missed: input.deadline < now,
            deadline: input.deadline,
            completed: false,
            created_at: now,
        }
    }

    /// Live check against the clock, independent of the stored `missed` flag.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.deadline < now
    }

    pub fn short_id(&self) -> String {
        short_task_id(self.id)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// First eight hex digits of the id, as shown in listings.
pub fn short_task_id(id: TaskId) -> String {
    let mut raw = id.simple().to_string();
    raw.truncate(8);
    raw
}

/// Splits a comma-separated tag entry, dropping blanks and repeats.
pub fn parse_tag_list(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for piece in raw.split(',') {
        let tag = piece.trim();
        if tag.is_empty() || out.iter().any(|t| t == tag) {
            continue;
        }
        out.push(tag.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{NewTask, Task, parse_tag_list};

    #[test]
    fn past_deadline_is_missed_on_creation() {
        let now = Utc
            .with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
            .single()
            .expect("valid now");
        let task = Task::from_input(
            NewTask {
                title: "HW1".to_string(),
                tags: vec!["math".to_string()],
                deadline: now - Duration::days(1),
                ..NewTask::default()
            },
            now,
        );

        assert!(task.missed);
        assert!(!task.completed);
        assert_eq!(task.created_at, now);
        assert_eq!(task.description, "");
    }

    #[test]
    fn deadline_equal_to_now_is_not_missed() {
        let now = Utc
            .with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
            .single()
            .expect("valid now");
        let task = Task::from_input(
            NewTask {
                title: "Quiz".to_string(),
                deadline: now,
                ..NewTask::default()
            },
            now,
        );
        assert!(!task.missed);
        assert!(task.is_overdue(now + Duration::seconds(1)));
    }

    #[test]
    fn tag_list_trims_and_dedupes() {
        assert_eq!(
            parse_tag_list(" math, physics,,math , "),
            vec!["math".to_string(), "physics".to_string()]
        );
        assert!(parse_tag_list("").is_empty());
    }

    #[test]
    fn short_id_is_eight_hex_chars() {
        let now = Utc::now();
        let task = Task::from_input(
            NewTask {
                title: "x".to_string(),
                deadline: now,
                ..NewTask::default()
            },
            now,
        );
        let short = task.short_id();
        assert_eq!(short.len(), 8);
        assert!(task.id.simple().to_string().starts_with(&short));
    }
}
