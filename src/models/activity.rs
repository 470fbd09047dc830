use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of entries kept per user.
pub const MAX_ACTIVITIES: usize = 50;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    InvoiceCreated,
    InvoiceDeleted,
    ProfileUpdated,
    DisplayNameChanged,
    ProjectUpdated,
    TaskUpdated,
}

/// One line of the audit trail. Purely observational.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ActivityEntry {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub icon: String,
    pub timestamp: Timestamp,
}

impl ActivityEntry {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        kind: ActivityType,
        icon: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            kind,
            icon: icon.into(),
            timestamp: Timestamp::now(),
        }
    }

    pub fn invoice_created(title: &str, amount: f64) -> Self {
        Self::new(
            "Invoice Created",
            format!("{} (${:.2})", title, amount),
            ActivityType::InvoiceCreated,
            "doc.text.fill",
        )
    }

    pub fn invoice_deleted(title: &str, amount: f64) -> Self {
        Self::new(
            "Invoice Deleted",
            format!("{} (${:.2})", title, amount),
            ActivityType::InvoiceDeleted,
            "trash.fill",
        )
    }

    pub fn project_update(title: &str, description: impl Into<String>) -> Self {
        Self::new(title, description, ActivityType::ProjectUpdated, "folder.fill")
    }

    pub fn task_added(project_title: &str, task_title: &str) -> Self {
        Self::new(
            "Task Added",
            format!("Added task '{}' to project '{}'", task_title, project_title),
            ActivityType::TaskUpdated,
            "checklist",
        )
    }

    pub fn task_completed(project_title: &str, task_title: &str) -> Self {
        Self::new(
            "Task Completed",
            format!("Completed task '{}' in project '{}'", task_title, project_title),
            ActivityType::TaskUpdated,
            "checkmark.circle.fill",
        )
    }

    pub fn task_reopened(project_title: &str, task_title: &str) -> Self {
        Self::new(
            "Task Reopened",
            format!("Reopened task '{}' in project '{}'", task_title, project_title),
            ActivityType::TaskUpdated,
            "arrow.counterclockwise",
        )
    }

    pub fn profile_update(description: impl Into<String>) -> Self {
        Self::new(
            "Profile Updated",
            description,
            ActivityType::ProfileUpdated,
            "person.crop.circle.fill",
        )
    }

    pub fn display_name_changed(old_name: &str, new_name: &str) -> Self {
        Self::new(
            "Display Name Changed",
            format!("Changed from '{}' to '{}'", old_name, new_name),
            ActivityType::DisplayNameChanged,
            "pencil.circle.fill",
        )
    }
}
