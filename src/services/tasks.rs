use jiff::Timestamp;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    events::{AppEvent, EventBus},
    models::{
        activity::ActivityEntry,
        session::Actor,
        store::Store,
        task::{Task, TaskPriority},
    },
    storage::{Storage, StorageError},
};

#[derive(Debug, Error)]
pub enum AddTaskError {
    #[error("Project '{0}' not found")]
    ProjectNotFound(Uuid),

    #[error("Project '{0}' belongs to another client")]
    Forbidden(Uuid),

    #[error("Task title cannot be empty")]
    EmptyTitle,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub struct AddTaskParameters {
    pub project_id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
}

pub fn add_task(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    parameters: AddTaskParameters,
) -> Result<Task, AddTaskError> {
    let title = parameters.title.trim();
    if title.is_empty() {
        return Err(AddTaskError::EmptyTitle);
    }

    let project_id = parameters.project_id;
    let previous = store.clone();
    let project = store
        .get_project_mut(project_id)
        .ok_or(AddTaskError::ProjectNotFound(project_id))?;
    if !actor.can_manage(&project.client_id) {
        return Err(AddTaskError::Forbidden(project_id));
    }

    let task = Task::new(title, parameters.description, parameters.priority);
    project.tasks.push(task.clone());
    project.updated_at = Timestamp::now();
    let project_title = project.title.clone();

    store.record_activity(
        &actor.user_id,
        ActivityEntry::task_added(&project_title, &task.title),
    );
    storage.save_or_restore(store, previous)?;

    bus.publish(AppEvent::ProjectUpdated { project_id });
    Ok(task)
}

#[derive(Debug, Error)]
pub enum UpdateTaskError {
    #[error("Project '{0}' not found")]
    ProjectNotFound(Uuid),

    #[error("Task '{0}' not found")]
    TaskNotFound(Uuid),

    #[error("Project '{0}' belongs to another client")]
    Forbidden(Uuid),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Replaces the task with the same id. Only the admin may change whether
/// a task is done; for anyone else the stored completion state wins and
/// the rest of the edit is applied.
pub fn update_task(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    project_id: Uuid,
    task: Task,
) -> Result<Task, UpdateTaskError> {
    let previous = store.clone();
    let project = store
        .get_project_mut(project_id)
        .ok_or(UpdateTaskError::ProjectNotFound(project_id))?;
    if !actor.can_manage(&project.client_id) {
        return Err(UpdateTaskError::Forbidden(project_id));
    }

    let now = Timestamp::now();
    let stored = project
        .get_task_mut(task.id)
        .ok_or(UpdateTaskError::TaskNotFound(task.id))?;

    let completed = if actor.is_admin() {
        task.is_completed
    } else {
        stored.is_completed
    };
    if actor.is_admin() {
        stored.completed_at = task.completed_at;
    }
    stored.title = task.title;
    stored.description = task.description;
    stored.priority = task.priority;
    stored.set_completed(completed, now);
    let updated = stored.clone();

    project.updated_at = now;
    storage.save_or_restore(store, previous)?;

    bus.publish(AppEvent::ProjectUpdated { project_id });
    Ok(updated)
}

#[derive(Debug, Error)]
pub enum SetTaskCompletionError {
    #[error("Only the admin can complete or reopen tasks")]
    AdminOnly,

    #[error("Project '{0}' not found")]
    ProjectNotFound(Uuid),

    #[error("Task '{0}' not found")]
    TaskNotFound(Uuid),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub fn set_task_completion(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    project_id: Uuid,
    task_id: Uuid,
    completed: bool,
) -> Result<Task, SetTaskCompletionError> {
    if !actor.is_admin() {
        return Err(SetTaskCompletionError::AdminOnly);
    }

    let previous = store.clone();
    let project = store
        .get_project_mut(project_id)
        .ok_or(SetTaskCompletionError::ProjectNotFound(project_id))?;
    let project_title = project.title.clone();
    let now = Timestamp::now();

    let task = project
        .get_task_mut(task_id)
        .ok_or(SetTaskCompletionError::TaskNotFound(task_id))?;
    task.set_completed(completed, now);
    let task = task.clone();
    project.updated_at = now;

    let entry = if completed {
        ActivityEntry::task_completed(&project_title, &task.title)
    } else {
        ActivityEntry::task_reopened(&project_title, &task.title)
    };
    store.record_activity(&actor.user_id, entry);
    storage.save_or_restore(store, previous)?;

    bus.publish(AppEvent::ProjectUpdated { project_id });
    Ok(task)
}

#[derive(Debug, Error)]
pub enum DeleteTaskError {
    #[error("Project '{0}' not found")]
    ProjectNotFound(Uuid),

    #[error("Task '{0}' not found")]
    TaskNotFound(Uuid),

    #[error("Project '{0}' belongs to another client")]
    Forbidden(Uuid),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub fn delete_task(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    project_id: Uuid,
    task_id: Uuid,
) -> Result<Task, DeleteTaskError> {
    let previous = store.clone();
    let project = store
        .get_project_mut(project_id)
        .ok_or(DeleteTaskError::ProjectNotFound(project_id))?;
    if !actor.can_manage(&project.client_id) {
        return Err(DeleteTaskError::Forbidden(project_id));
    }

    let index = project
        .tasks
        .iter()
        .position(|t| t.id == task_id)
        .ok_or(DeleteTaskError::TaskNotFound(task_id))?;
    let removed = project.tasks.remove(index);
    project.updated_at = Timestamp::now();

    storage.save_or_restore(store, previous)?;

    tracing::info!(%project_id, %task_id, "Task deleted");
    bus.publish(AppEvent::ProjectUpdated { project_id });
    Ok(removed)
}
