use jiff::Timestamp;
use jiff::civil::Date;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::task::Task;

#[derive(Serialize, Deserialize, Default, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    OnHold,
    Cancelled,
}

impl ProjectStatus {
    /// Progress a project takes on when it transitions into this status.
    pub fn progress(&self) -> f64 {
        match self {
            ProjectStatus::NotStarted => 0.0,
            ProjectStatus::InProgress => 0.5,
            ProjectStatus::Completed => 1.0,
            ProjectStatus::OnHold => 0.25,
            ProjectStatus::Cancelled => 0.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProjectStatus::NotStarted => "Not Started",
            ProjectStatus::InProgress => "In Progress",
            ProjectStatus::Completed => "Completed",
            ProjectStatus::OnHold => "On Hold",
            ProjectStatus::Cancelled => "Cancelled",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error(
    "Invalid status '{0}', expected one of: not-started, in-progress, completed, on-hold, cancelled"
)]
pub struct ParseStatusError(String);

impl std::str::FromStr for ProjectStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['_', ' '], "-").as_str() {
            "not-started" => Ok(ProjectStatus::NotStarted),
            "in-progress" => Ok(ProjectStatus::InProgress),
            "completed" => Ok(ProjectStatus::Completed),
            "on-hold" => Ok(ProjectStatus::OnHold),
            "cancelled" => Ok(ProjectStatus::Cancelled),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Project {
    /// UUID of the project
    pub id: Uuid,
    /// Title of the project
    pub title: String,
    /// Description of the project
    pub description: String,
    /// Lifecycle status
    pub status: ProjectStatus,
    /// 0.0 to 1.0, derived from `status` on every transition
    pub progress: f64,
    pub client_name: String,
    pub client_email: String,
    /// Identity-provider id of the owning client
    pub client_id: String,
    /// Billed amount, copied from the linked invoice
    pub amount: f64,
    /// Invoice this project was billed through, if any
    pub invoice_id: Option<String>,
    pub is_archived: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub due_date: Date,
    /// Ordered task list
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Default for Project {
    fn default() -> Self {
        let now = Timestamp::now();
        Self {
            id: Uuid::new_v4(),
            title: String::new(),
            description: String::new(),
            status: ProjectStatus::default(),
            progress: 0.0,
            client_name: String::new(),
            client_email: String::new(),
            client_id: String::new(),
            amount: 0.0,
            invoice_id: None,
            is_archived: false,
            created_at: now,
            updated_at: now,
            due_date: now.to_zoned(jiff::tz::TimeZone::UTC).date(),
            tasks: vec![],
        }
    }
}

impl Project {
    /// Moves the project into `status`, recomputing progress. Completing a
    /// project completes every task that is still open.
    pub fn apply_status(&mut self, status: ProjectStatus, now: Timestamp) {
        self.status = status;
        self.progress = status.progress();
        if status == ProjectStatus::Completed {
            for task in self.tasks.iter_mut().filter(|t| !t.is_completed) {
                task.set_completed(true, now);
            }
        }
        self.updated_at = now;
    }

    pub fn get_task(&self, task_id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn get_task_mut(&mut self, task_id: Uuid) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    pub fn open_tasks_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_completed).count()
    }

    pub fn completed_tasks_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_completed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::TaskPriority;

    fn project_with_tasks() -> Project {
        Project {
            title: String::from("Brand film"),
            tasks: vec![
                Task::new("Script", "", TaskPriority::High),
                Task::new("Shoot", "", TaskPriority::Medium),
            ],
            ..Project::default()
        }
    }

    #[test]
    fn test_status_progress_mapping() {
        let now = Timestamp::now();
        let cases = [
            (ProjectStatus::NotStarted, 0.0),
            (ProjectStatus::InProgress, 0.5),
            (ProjectStatus::OnHold, 0.25),
            (ProjectStatus::Cancelled, 0.0),
            (ProjectStatus::Completed, 1.0),
        ];
        for (status, expected) in cases {
            let mut project = project_with_tasks();
            project.apply_status(status, now);
            assert_eq!(project.progress, expected, "progress for {:?}", status);
        }
    }

    #[test]
    fn test_completed_status_completes_every_task() {
        let now = Timestamp::now();
        let mut project = project_with_tasks();

        project.apply_status(ProjectStatus::Completed, now);

        assert!(project.tasks.iter().all(|t| t.is_completed));
        assert!(project.tasks.iter().all(|t| t.completed_at == Some(now)));
    }

    #[test]
    fn test_other_statuses_leave_tasks_alone() {
        let now = Timestamp::now();
        let mut project = project_with_tasks();

        project.apply_status(ProjectStatus::OnHold, now);

        assert_eq!(project.open_tasks_count(), 2);
        assert_eq!(project.completed_tasks_count(), 0);
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(
            "in_progress".parse::<ProjectStatus>().unwrap(),
            ProjectStatus::InProgress
        );
        assert_eq!(
            "On Hold".parse::<ProjectStatus>().unwrap(),
            ProjectStatus::OnHold
        );
        assert!("archived".parse::<ProjectStatus>().is_err());
    }
}
