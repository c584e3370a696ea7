// Data models for the to-do list

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single to-do item owned by one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub due_date: Option<NaiveDate>,
    pub is_complete: bool,
    pub priority: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Insert payload; the service assigns id and timestamps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub owner_id: String,
    pub title: String,
    pub due_date: Option<NaiveDate>,
    pub is_complete: bool,
    pub priority: i64,
}

impl NewTask {
    pub fn new(owner_id: impl Into<String>, title: impl Into<String>, due_date: Option<NaiveDate>) -> Self {
        Self {
            owner_id: owner_id.into(),
            title: title.into(),
            due_date,
            is_complete: false,
            priority: 0,
        }
    }
}

/// Partial update of a task. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    /// `Some(None)` clears the due date
    pub due_date: Option<Option<NaiveDate>>,
    pub is_complete: Option<bool>,
    pub priority: Option<i64>,
}

impl TaskPatch {
    pub fn completion(is_complete: bool) -> Self {
        Self {
            is_complete: Some(is_complete),
            ..Self::default()
        }
    }

    pub fn details(title: impl Into<String>, due_date: Option<NaiveDate>) -> Self {
        Self {
            title: Some(title.into()),
            due_date: Some(due_date),
            ..Self::default()
        }
    }

    pub fn priority(priority: i64) -> Self {
        Self {
            priority: Some(priority),
            ..Self::default()
        }
    }

    /// Apply this patch to a task in place
    pub fn apply(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(is_complete) = self.is_complete {
            task.is_complete = is_complete;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
    }
}

/// New priority for one task, produced by a reorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityUpdate {
    pub id: String,
    pub priority: i64,
}

/// Key used to order the displayed list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    #[default]
    CreatedAt,
    DueDate,
    Priority,
}

impl SortMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SortMode::CreatedAt => "created_at",
            SortMode::DueDate => "due_date",
            SortMode::Priority => "priority",
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sort mode: {0} (expected created_at, due_date or priority)")]
pub struct ParseSortModeError(String);

impl FromStr for SortMode {
    type Err = ParseSortModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "created_at" | "created" => Ok(SortMode::CreatedAt),
            "due_date" | "due" => Ok(SortMode::DueDate),
            "priority" => Ok(SortMode::Priority),
            other => Err(ParseSortModeError(other.to_string())),
        }
    }
}

/// What happened to a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// The whole collection was reloaded from outside this process
    Resync,
}

/// Notification pushed to subscribers of an owner's tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub owner_id: String,
    pub task_id: Option<String>,
}

impl ChangeEvent {
    pub fn row(kind: ChangeKind, task: &Task) -> Self {
        Self {
            kind,
            owner_id: task.owner_id.clone(),
            task_id: Some(task.id.clone()),
        }
    }
}

/// Helper function to get current timestamp in milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
