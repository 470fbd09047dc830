use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Default, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TaskPriority {
    pub fn label(&self) -> &'static str {
        match self {
            TaskPriority::Low => "Low",
            TaskPriority::Medium => "Medium",
            TaskPriority::High => "High",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid priority '{0}', expected one of: low, medium, high")]
pub struct ParsePriorityError(String);

impl std::str::FromStr for TaskPriority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            _ => Err(ParsePriorityError(s.to_string())),
        }
    }
}

/// A checklist item owned by exactly one project.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct Task {
    /// UUID to identify the task
    pub id: Uuid,
    /// Title of the task
    pub title: String,
    /// Free-form description, may be empty
    #[serde(default)]
    pub description: String,
    /// Whether the task is done
    pub is_completed: bool,
    /// When the task was completed, set iff `is_completed`
    pub completed_at: Option<Timestamp>,
    /// Priority of the task
    #[serde(default)]
    pub priority: TaskPriority,
}

impl Task {
    pub fn new(title: impl Into<String>, description: impl Into<String>, priority: TaskPriority) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            priority,
            ..Task::default()
        }
    }

    /// Sets the completion flag and keeps `completed_at` consistent with it.
    pub fn set_completed(&mut self, completed: bool, now: Timestamp) {
        if completed {
            if !self.is_completed || self.completed_at.is_none() {
                self.completed_at = Some(now);
            }
        } else {
            self.completed_at = None;
        }
        self.is_completed = completed;
    }
}
