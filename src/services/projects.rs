use jiff::{Timestamp, ToSpan, civil::Date};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    events::{AppEvent, EventBus},
    models::{
        activity::ActivityEntry,
        invoice::{Invoice, normalize_title},
        project::{Project, ProjectStatus},
        session::Actor,
        store::Store,
    },
    storage::{Storage, StorageError},
};

const DEFAULT_DUE_IN_DAYS: i64 = 7;
const INVOICE_PROJECT_TITLE: &str = "Video Production Project";
const INVOICE_PROJECT_DESCRIPTION: &str = "Video production services";

pub(crate) fn default_due_date() -> Date {
    jiff::Zoned::now()
        .date()
        .saturating_add(DEFAULT_DUE_IN_DAYS.days())
}

#[derive(Debug, Error)]
pub enum CreateProjectError {
    #[error("Clients can only create projects for themselves")]
    Forbidden,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub struct CreateProjectParameters {
    pub title: String,
    pub description: String,
    pub client_name: String,
    pub client_email: String,
    /// Owner of the project, defaults to the acting user
    pub client_id: Option<String>,
    pub amount: f64,
    pub invoice_id: Option<String>,
    pub due_date: Option<Date>,
}

pub fn create_project(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    parameters: CreateProjectParameters,
) -> Result<Project, CreateProjectError> {
    let client_id = parameters
        .client_id
        .unwrap_or_else(|| actor.user_id.clone());
    if !actor.can_manage(&client_id) {
        return Err(CreateProjectError::Forbidden);
    }

    let now = Timestamp::now();
    let project = Project {
        id: Uuid::new_v4(),
        title: parameters.title,
        description: parameters.description,
        status: ProjectStatus::NotStarted,
        progress: ProjectStatus::NotStarted.progress(),
        client_name: parameters.client_name,
        client_email: parameters.client_email,
        client_id,
        amount: parameters.amount,
        invoice_id: parameters.invoice_id,
        is_archived: false,
        created_at: now,
        updated_at: now,
        due_date: parameters.due_date.unwrap_or_else(default_due_date),
        tasks: vec![],
    };

    let previous = store.clone();
    store.add_project(project.clone());
    storage.save_or_restore(store, previous)?;

    tracing::info!(project_id = %project.id, title = %project.title, "Project created");
    bus.publish(AppEvent::ProjectUpdated {
        project_id: project.id,
    });

    Ok(project)
}

/// Creates the project that tracks a freshly issued invoice. If a project
/// already references the invoice, that one is returned untouched.
pub fn create_project_from_invoice(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    invoice: &Invoice,
) -> Result<Project, CreateProjectError> {
    if let Some(existing) = store.get_projects_with_invoice(&invoice.id).next() {
        tracing::debug!(
            invoice_id = %invoice.id,
            project_id = %existing.id,
            "Invoice already has a project"
        );
        return Ok(existing.clone());
    }

    let title = if invoice.title.is_empty() {
        INVOICE_PROJECT_TITLE.to_string()
    } else {
        normalize_title(&invoice.title)
    };

    create_project(
        store,
        storage,
        bus,
        actor,
        CreateProjectParameters {
            title,
            description: invoice
                .memo
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| INVOICE_PROJECT_DESCRIPTION.to_string()),
            client_name: invoice.customer_name.clone(),
            client_email: invoice.customer_email.clone(),
            client_id: None,
            amount: invoice.amount,
            invoice_id: Some(invoice.id.clone()),
            due_date: invoice.due_date,
        },
    )
}

#[derive(Debug, Error)]
pub enum UpdateProjectError {
    #[error("Project '{0}' not found")]
    ProjectNotFound(Uuid),

    #[error("Project '{0}' belongs to another client")]
    Forbidden(Uuid),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Replaces the stored project with `project` wholesale. Clients cannot
/// move the status, reassign the owner or change task completion; those
/// fields silently keep their stored values. A status change by the admin
/// goes through the same transition as [`update_project_status`].
pub fn update_project(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    project: Project,
) -> Result<Project, UpdateProjectError> {
    let project_id = project.id;
    let existing = store
        .get_project(project_id)
        .cloned()
        .ok_or(UpdateProjectError::ProjectNotFound(project_id))?;

    if !actor.can_manage(&existing.client_id) {
        return Err(UpdateProjectError::Forbidden(project_id));
    }

    let now = Timestamp::now();
    let mut updated = project;

    if !actor.is_admin() {
        updated.status = existing.status;
        updated.progress = existing.progress;
        updated.client_id = existing.client_id.clone();
        for task in updated.tasks.iter_mut() {
            let stored = existing.get_task(task.id);
            task.is_completed = stored.is_some_and(|t| t.is_completed);
            task.completed_at = stored.and_then(|t| t.completed_at);
        }
    }
    for task in updated.tasks.iter_mut() {
        let completed = task.is_completed;
        task.set_completed(completed, now);
    }

    let status_changed = updated.status != existing.status;
    if status_changed {
        let status = updated.status;
        updated.apply_status(status, now);
    }
    updated.created_at = existing.created_at;
    updated.updated_at = now;

    let previous = store.clone();
    if let Some(slot) = store.get_project_mut(project_id) {
        *slot = updated.clone();
    }
    store.record_activity(
        &actor.user_id,
        ActivityEntry::project_update(
            "Project Updated",
            format!("Project '{}' details were updated", updated.title),
        ),
    );
    if status_changed {
        store.record_activity(
            &actor.user_id,
            ActivityEntry::project_update(
                "Project Status Updated",
                format!(
                    "Project '{}' status changed from {} to {}",
                    updated.title,
                    existing.status.label(),
                    updated.status.label()
                ),
            ),
        );
    }
    storage.save_or_restore(store, previous)?;

    bus.publish(AppEvent::ProjectUpdated { project_id });
    if status_changed {
        bus.publish(AppEvent::DashboardRefresh);
    }
    Ok(updated)
}

#[derive(Debug, Error)]
pub enum UpdateProjectStatusError {
    #[error("Only the admin can change a project's status")]
    AdminOnly,

    #[error("Project '{0}' not found")]
    ProjectNotFound(Uuid),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug)]
pub struct StatusUpdate {
    pub project: Project,
    pub previous: ProjectStatus,
    /// False when the project already had the requested status
    pub changed: bool,
}

pub fn update_project_status(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    project_id: Uuid,
    status: ProjectStatus,
) -> Result<StatusUpdate, UpdateProjectStatusError> {
    if !actor.is_admin() {
        return Err(UpdateProjectStatusError::AdminOnly);
    }

    let previous_store = store.clone();
    let project = store
        .get_project_mut(project_id)
        .ok_or(UpdateProjectStatusError::ProjectNotFound(project_id))?;
    let previous = project.status;

    if previous == status {
        return Ok(StatusUpdate {
            project: project.clone(),
            previous,
            changed: false,
        });
    }

    project.apply_status(status, Timestamp::now());
    let project = project.clone();

    store.record_activity(
        &actor.user_id,
        ActivityEntry::project_update(
            "Project Status Updated",
            format!(
                "Project '{}' status changed from {} to {}",
                project.title,
                previous.label(),
                status.label()
            ),
        ),
    );
    storage.save_or_restore(store, previous_store)?;

    tracing::info!(%project_id, from = previous.label(), to = status.label(), "Project status changed");
    bus.publish(AppEvent::DashboardRefresh);

    Ok(StatusUpdate {
        project,
        previous,
        changed: true,
    })
}

#[derive(Debug, Error)]
pub enum UpdateProjectProgressError {
    #[error("Only the admin can change a project's progress")]
    AdminOnly,

    #[error("Project '{0}' not found")]
    ProjectNotFound(Uuid),

    #[error("Progress must be a number between 0 and 1, got {0}")]
    InvalidProgress(f64),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Overrides progress directly; values outside 0..=1 are clamped.
pub fn update_project_progress(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    project_id: Uuid,
    progress: f64,
) -> Result<Project, UpdateProjectProgressError> {
    if !actor.is_admin() {
        return Err(UpdateProjectProgressError::AdminOnly);
    }
    if !progress.is_finite() {
        return Err(UpdateProjectProgressError::InvalidProgress(progress));
    }

    let previous = store.clone();
    let project = store
        .get_project_mut(project_id)
        .ok_or(UpdateProjectProgressError::ProjectNotFound(project_id))?;
    project.progress = progress.clamp(0.0, 1.0);
    project.updated_at = Timestamp::now();
    let project = project.clone();

    storage.save_or_restore(store, previous)?;
    bus.publish(AppEvent::ProjectUpdated { project_id });
    Ok(project)
}

#[derive(Debug, Error)]
pub enum ArchiveProjectError {
    #[error("Project '{0}' not found")]
    ProjectNotFound(Uuid),

    #[error("Project '{0}' belongs to another client")]
    Forbidden(Uuid),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub fn archive_project(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    project_id: Uuid,
) -> Result<Project, ArchiveProjectError> {
    let previous = store.clone();
    let project = store
        .get_project_mut(project_id)
        .ok_or(ArchiveProjectError::ProjectNotFound(project_id))?;
    if !actor.can_manage(&project.client_id) {
        return Err(ArchiveProjectError::Forbidden(project_id));
    }

    project.is_archived = true;
    project.updated_at = Timestamp::now();
    let project = project.clone();

    storage.save_or_restore(store, previous)?;
    bus.publish(AppEvent::ProjectUpdated { project_id });
    Ok(project)
}

#[derive(Debug, Error)]
pub enum DeleteProjectError {
    #[error("Only the admin can delete projects")]
    AdminOnly,

    #[error("Project '{0}' not found")]
    ProjectNotFound(Uuid),

    #[error("No project found with invoice '{0}'")]
    NoProjectForInvoice(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub fn delete_project(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    project_id: Uuid,
) -> Result<Project, DeleteProjectError> {
    if !actor.is_admin() {
        return Err(DeleteProjectError::AdminOnly);
    }

    let previous = store.clone();
    let removed = store
        .remove_project(project_id)
        .ok_or(DeleteProjectError::ProjectNotFound(project_id))?;
    storage.save_or_restore(store, previous)?;

    tracing::info!(%project_id, "Project deleted");
    bus.publish(AppEvent::DashboardRefresh);
    Ok(removed)
}

/// Removes every project linked to `invoice_id`.
pub fn delete_projects_with_invoice(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    invoice_id: &str,
) -> Result<Vec<Project>, DeleteProjectError> {
    if !actor.is_admin() {
        return Err(DeleteProjectError::AdminOnly);
    }

    let (removed, kept): (Vec<Project>, Vec<Project>) = store
        .projects
        .iter()
        .cloned()
        .partition(|p| p.invoice_id.as_deref() == Some(invoice_id));

    if removed.is_empty() {
        return Err(DeleteProjectError::NoProjectForInvoice(
            invoice_id.to_string(),
        ));
    }

    let previous = store.clone();
    store.projects = kept;
    storage.save_or_restore(store, previous)?;

    tracing::info!(invoice_id, count = removed.len(), "Projects deleted by invoice");
    bus.publish(AppEvent::DashboardRefresh);
    Ok(removed)
}

#[derive(Debug, Error)]
pub enum FetchProjectsError {
    #[error("Only the admin can list every client's projects")]
    AdminOnly,

    #[error("Cannot list projects of client '{0}'")]
    Forbidden(String),
}

/// `None` lists everything, archived included, and is reserved for the
/// admin. `Some(client)` lists that client's projects.
pub fn fetch_projects(
    store: &Store,
    actor: &Actor,
    client_id: Option<&str>,
    include_archived: bool,
) -> Result<Vec<Project>, FetchProjectsError> {
    match client_id {
        None if actor.is_admin() => Ok(store.projects.clone()),
        None => Err(FetchProjectsError::AdminOnly),
        Some(client_id) if !actor.can_manage(client_id) => {
            Err(FetchProjectsError::Forbidden(client_id.to_string()))
        }
        Some(client_id) => Ok(store
            .get_client_projects(client_id)
            .filter(|p| include_archived || !p.is_archived)
            .cloned()
            .collect()),
    }
}

#[derive(Debug, Error)]
pub enum ConnectInvoiceError {
    #[error("Project '{0}' not found")]
    ProjectNotFound(Uuid),

    #[error("Project '{0}' belongs to another client")]
    Forbidden(Uuid),

    #[error("Invoice '{0}' not found")]
    InvoiceNotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Links `invoice_id` (looked up in `invoices`) to the project and takes
/// over its amount.
pub fn connect_invoice(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    project_id: Uuid,
    invoice_id: &str,
    invoices: &[Invoice],
) -> Result<Project, ConnectInvoiceError> {
    let invoice = invoices
        .iter()
        .find(|i| i.id == invoice_id)
        .ok_or_else(|| ConnectInvoiceError::InvoiceNotFound(invoice_id.to_string()))?;

    let previous = store.clone();
    let project = store
        .get_project_mut(project_id)
        .ok_or(ConnectInvoiceError::ProjectNotFound(project_id))?;
    if !actor.can_manage(&project.client_id) {
        return Err(ConnectInvoiceError::Forbidden(project_id));
    }

    project.invoice_id = Some(invoice.id.clone());
    project.amount = invoice.amount;
    project.updated_at = Timestamp::now();
    let project = project.clone();

    store.record_activity(
        &actor.user_id,
        ActivityEntry::project_update(
            "Invoice Connected",
            format!("Connected invoice to project '{}'", project.title),
        ),
    );
    storage.save_or_restore(store, previous)?;

    bus.publish(AppEvent::DashboardRefresh);
    Ok(project)
}

#[derive(Debug, Error)]
pub enum DisconnectInvoiceError {
    #[error("Only the admin can disconnect invoices")]
    AdminOnly,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Clears the link on every project referencing `invoice_id` and zeroes
/// their amount, then reloads the store from disk. Returns the affected
/// projects as persisted.
pub fn disconnect_invoice(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    actor: &Actor,
    invoice_id: &str,
) -> Result<Vec<Project>, DisconnectInvoiceError> {
    if !actor.is_admin() {
        return Err(DisconnectInvoiceError::AdminOnly);
    }

    let now = Timestamp::now();
    let previous = store.clone();
    let mut affected = vec![];
    for project in store
        .projects
        .iter_mut()
        .filter(|p| p.invoice_id.as_deref() == Some(invoice_id))
    {
        project.invoice_id = None;
        project.amount = 0.0;
        project.updated_at = now;
        affected.push((project.id, project.title.clone()));
    }

    for (_, title) in &affected {
        store.record_activity(
            &actor.user_id,
            ActivityEntry::project_update(
                "Invoice Disconnected",
                format!("Invoice was disconnected from project '{}'", title),
            ),
        );
    }
    storage.save_or_restore(store, previous)?;

    for (project_id, _) in &affected {
        bus.publish(AppEvent::ProjectUpdated {
            project_id: *project_id,
        });
    }

    *store = storage.load()?;

    bus.publish(AppEvent::DashboardRefresh);
    bus.publish(AppEvent::ProjectsRefreshed);

    tracing::info!(invoice_id, count = affected.len(), "Invoice disconnected");
    Ok(affected
        .iter()
        .filter_map(|(id, _)| store.get_project(*id).cloned())
        .collect())
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub active: usize,
    pub completed: usize,
}

pub fn task_counts(projects: &[Project]) -> TaskCounts {
    projects.iter().fold(TaskCounts::default(), |acc, p| TaskCounts {
        active: acc.active + p.open_tasks_count(),
        completed: acc.completed + p.completed_tasks_count(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        events::drain,
        models::{
            invoice::Business,
            session::Role,
            task::{Task, TaskPriority},
        },
        storage::memory::MemoryStorage,
    };

    pub fn admin() -> Actor {
        Actor {
            user_id: String::from("auth0|admin"),
            email: String::from("info@studio.test"),
            role: Role::Admin,
        }
    }

    pub fn client(id: &str) -> Actor {
        Actor {
            user_id: id.to_string(),
            email: format!("{}@example.com", id.trim_start_matches("auth0|")),
            role: Role::Client,
        }
    }

    pub fn sample_invoice(id: &str, amount: f64) -> Invoice {
        Invoice {
            id: id.to_string(),
            business: Business::CochranFilms,
            title: String::from("Wedding film"),
            display_title: None,
            view_url: format!("https://billing.test/{}", id),
            created_at: Timestamp::now(),
            due_date: None,
            amount,
            status: String::from("SAVED"),
            customer_name: String::from("Jane Doe"),
            customer_email: String::from("jane@example.com"),
            customer_id: None,
            currency: String::from("USD"),
            memo: None,
            footer: None,
            last_sent_at: None,
            last_viewed_at: None,
            items: vec![],
        }
    }

    fn params(title: &str) -> CreateProjectParameters {
        CreateProjectParameters {
            title: title.to_string(),
            description: String::new(),
            client_name: String::from("Jane Doe"),
            client_email: String::from("jane@example.com"),
            client_id: None,
            amount: 0.0,
            invoice_id: None,
            due_date: None,
        }
    }

    fn seeded(actor: &Actor, title: &str) -> (Store, MemoryStorage, EventBus, Project) {
        let mut store = Store::default();
        let storage = MemoryStorage::default();
        let bus = EventBus::default();
        let project = create_project(&mut store, &storage, &bus, actor, params(title)).unwrap();
        (store, storage, bus, project)
    }

    #[test]
    fn test_create_project_defaults() {
        let jane = client("auth0|jane");
        let (_, storage, _, project) = seeded(&jane, "Promo");

        assert_eq!(project.status, ProjectStatus::NotStarted);
        assert_eq!(project.progress, 0.0);
        assert_eq!(project.client_id, "auth0|jane");
        assert_eq!(project.due_date, default_due_date());
        assert_eq!(storage.load().unwrap().projects.len(), 1);
    }

    #[test]
    fn test_client_cannot_create_for_someone_else() {
        let mut store = Store::default();
        let storage = MemoryStorage::default();
        let bus = EventBus::default();
        let mut p = params("Promo");
        p.client_id = Some(String::from("auth0|other"));

        let result = create_project(&mut store, &storage, &bus, &client("auth0|jane"), p);
        assert!(matches!(result, Err(CreateProjectError::Forbidden)));
    }

    #[test]
    fn test_project_from_invoice_is_deduplicated() {
        let mut store = Store::default();
        let storage = MemoryStorage::default();
        let bus = EventBus::default();
        let invoice = sample_invoice("inv_1", 250.0);

        let first =
            create_project_from_invoice(&mut store, &storage, &bus, &admin(), &invoice).unwrap();
        let second =
            create_project_from_invoice(&mut store, &storage, &bus, &admin(), &invoice).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.projects.len(), 1);
        assert_eq!(first.amount, 250.0);
        assert_eq!(first.description, INVOICE_PROJECT_DESCRIPTION);
    }

    #[test]
    fn test_status_transition_mapping_and_cascade() {
        let (mut store, storage, bus, project) = seeded(&admin(), "Doc");
        store.get_project_mut(project.id).unwrap().tasks = vec![
            Task::new("Interview", "", TaskPriority::High),
            Task::new("B-roll", "", TaskPriority::Low),
        ];

        for (status, progress) in [
            (ProjectStatus::InProgress, 0.5),
            (ProjectStatus::OnHold, 0.25),
            (ProjectStatus::Cancelled, 0.0),
            (ProjectStatus::NotStarted, 0.0),
            (ProjectStatus::Completed, 1.0),
        ] {
            let update =
                update_project_status(&mut store, &storage, &bus, &admin(), project.id, status)
                    .unwrap();
            assert!(update.changed);
            assert_eq!(update.project.progress, progress);
        }

        let stored = storage.load().unwrap();
        let stored = stored.get_project(project.id).unwrap();
        assert!(stored.tasks.iter().all(|t| t.is_completed && t.completed_at.is_some()));
    }

    #[test]
    fn test_reapplying_status_is_a_no_op() {
        let (mut store, storage, bus, project) = seeded(&admin(), "Doc");
        let mut rx = bus.subscribe();

        update_project_status(
            &mut store,
            &storage,
            &bus,
            &admin(),
            project.id,
            ProjectStatus::InProgress,
        )
        .unwrap();
        let again = update_project_status(
            &mut store,
            &storage,
            &bus,
            &admin(),
            project.id,
            ProjectStatus::InProgress,
        )
        .unwrap();

        assert!(!again.changed);
        assert_eq!(store.user("auth0|admin").unwrap().activities.len(), 1);
        assert_eq!(drain(&mut rx), vec![AppEvent::DashboardRefresh]);
    }

    #[test]
    fn test_client_cannot_change_status() {
        let jane = client("auth0|jane");
        let (mut store, storage, bus, project) = seeded(&jane, "Promo");

        let result = update_project_status(
            &mut store,
            &storage,
            &bus,
            &jane,
            project.id,
            ProjectStatus::Completed,
        );
        assert!(matches!(result, Err(UpdateProjectStatusError::AdminOnly)));
    }

    #[test]
    fn test_status_of_unknown_project() {
        let mut store = Store::default();
        let result = update_project_status(
            &mut store,
            &MemoryStorage::default(),
            &EventBus::default(),
            &admin(),
            Uuid::new_v4(),
            ProjectStatus::Completed,
        );
        assert!(matches!(
            result,
            Err(UpdateProjectStatusError::ProjectNotFound(_))
        ));
    }

    #[test]
    fn test_client_update_keeps_status_and_completion() {
        let jane = client("auth0|jane");
        let (mut store, storage, bus, project) = seeded(&jane, "Promo");
        store.get_project_mut(project.id).unwrap().tasks =
            vec![Task::new("Storyboard", "", TaskPriority::Medium)];

        let mut edited = store.get_project(project.id).unwrap().clone();
        edited.title = String::from("Promo v2");
        edited.status = ProjectStatus::Completed;
        edited.progress = 1.0;
        edited.tasks[0].is_completed = true;
        edited.tasks[0].title = String::from("Storyboard v2");

        let updated = update_project(&mut store, &storage, &bus, &jane, edited).unwrap();

        assert_eq!(updated.title, "Promo v2");
        assert_eq!(updated.status, ProjectStatus::NotStarted);
        assert_eq!(updated.progress, 0.0);
        assert!(!updated.tasks[0].is_completed);
        assert_eq!(updated.tasks[0].title, "Storyboard v2");
    }

    #[test]
    fn test_admin_update_applies_status_transition() {
        let (mut store, storage, bus, project) = seeded(&admin(), "Doc");
        store.get_project_mut(project.id).unwrap().tasks =
            vec![Task::new("Final export", "", TaskPriority::High)];
        let mut rx = bus.subscribe();

        let mut edited = store.get_project(project.id).unwrap().clone();
        edited.status = ProjectStatus::Completed;
        let updated = update_project(&mut store, &storage, &bus, &admin(), edited).unwrap();

        assert_eq!(updated.status, ProjectStatus::Completed);
        assert_eq!(updated.progress, 1.0);
        assert!(updated.tasks[0].is_completed);
        assert!(updated.tasks[0].completed_at.is_some());

        let stored = storage.load().unwrap();
        assert_eq!(stored.get_project(project.id).unwrap().progress, 1.0);
        let titles: Vec<_> = stored.user("auth0|admin").unwrap().activities[..2]
            .iter()
            .map(|a| a.title.as_str())
            .collect();
        assert_eq!(titles, ["Project Status Updated", "Project Updated"]);
        assert_eq!(
            drain(&mut rx),
            vec![
                AppEvent::ProjectUpdated {
                    project_id: project.id
                },
                AppEvent::DashboardRefresh,
            ]
        );
    }

    #[test]
    fn test_admin_update_without_status_change_keeps_progress() {
        let (mut store, storage, bus, project) = seeded(&admin(), "Doc");
        update_project_progress(&mut store, &storage, &bus, &admin(), project.id, 0.8).unwrap();

        let mut edited = store.get_project(project.id).unwrap().clone();
        edited.title = String::from("Doc (final cut)");
        let updated = update_project(&mut store, &storage, &bus, &admin(), edited).unwrap();

        assert_eq!(updated.progress, 0.8);
        assert_eq!(updated.status, ProjectStatus::NotStarted);
    }

    #[test]
    fn test_failed_save_leaves_store_untouched() {
        let (mut store, storage, bus, project) = seeded(&admin(), "Doc");
        let before = store.clone();
        storage.fail_saves();

        let result = update_project_status(
            &mut store,
            &storage,
            &bus,
            &admin(),
            project.id,
            ProjectStatus::Completed,
        );
        assert!(matches!(result, Err(UpdateProjectStatusError::Storage(_))));
        assert_eq!(store, before);

        let result = delete_project(&mut store, &storage, &bus, &admin(), project.id);
        assert!(matches!(result, Err(DeleteProjectError::Storage(_))));
        assert_eq!(store, before);

        let mut edited = project.clone();
        edited.title = String::from("Renamed");
        assert!(update_project(&mut store, &storage, &bus, &admin(), edited).is_err());
        assert_eq!(store, before);
    }

    #[test]
    fn test_client_cannot_update_foreign_project() {
        let (mut store, storage, bus, project) = seeded(&client("auth0|jane"), "Promo");

        let result = update_project(&mut store, &storage, &bus, &client("auth0|bob"), project);
        assert!(matches!(result, Err(UpdateProjectError::Forbidden(_))));
    }

    #[test]
    fn test_update_unknown_project() {
        let mut store = Store::default();
        let result = update_project(
            &mut store,
            &MemoryStorage::default(),
            &EventBus::default(),
            &admin(),
            Project::default(),
        );
        assert!(matches!(result, Err(UpdateProjectError::ProjectNotFound(_))));
    }

    #[test]
    fn test_progress_is_clamped() {
        let (mut store, storage, bus, project) = seeded(&admin(), "Doc");

        let updated =
            update_project_progress(&mut store, &storage, &bus, &admin(), project.id, 1.7).unwrap();
        assert_eq!(updated.progress, 1.0);

        let result =
            update_project_progress(&mut store, &storage, &bus, &admin(), project.id, f64::NAN);
        assert!(matches!(
            result,
            Err(UpdateProjectProgressError::InvalidProgress(_))
        ));
    }

    #[test]
    fn test_fetch_projects_scopes() {
        let mut store = Store::default();
        let storage = MemoryStorage::default();
        let bus = EventBus::default();
        let jane = client("auth0|jane");
        let bob = client("auth0|bob");

        create_project(&mut store, &storage, &bus, &jane, params("Jane 1")).unwrap();
        let archived = create_project(&mut store, &storage, &bus, &jane, params("Jane 2")).unwrap();
        create_project(&mut store, &storage, &bus, &bob, params("Bob 1")).unwrap();
        archive_project(&mut store, &storage, &bus, &jane, archived.id).unwrap();

        let all = fetch_projects(&store, &admin(), None, false).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().any(|p| p.is_archived));

        let janes = fetch_projects(&store, &jane, Some("auth0|jane"), false).unwrap();
        assert_eq!(janes.len(), 1);
        assert!(janes.iter().all(|p| p.client_id == "auth0|jane"));

        let janes_all = fetch_projects(&store, &jane, Some("auth0|jane"), true).unwrap();
        assert_eq!(janes_all.len(), 2);

        assert!(matches!(
            fetch_projects(&store, &jane, None, false),
            Err(FetchProjectsError::AdminOnly)
        ));
        assert!(matches!(
            fetch_projects(&store, &jane, Some("auth0|bob"), false),
            Err(FetchProjectsError::Forbidden(_))
        ));
    }

    #[test]
    fn test_delete_by_invoice_removes_every_match() {
        let mut store = Store::default();
        let storage = MemoryStorage::default();
        let bus = EventBus::default();
        for title in ["A", "B"] {
            let mut p = params(title);
            p.invoice_id = Some(String::from("inv_42"));
            create_project(&mut store, &storage, &bus, &admin(), p).unwrap();
        }
        create_project(&mut store, &storage, &bus, &admin(), params("C")).unwrap();

        let removed =
            delete_projects_with_invoice(&mut store, &storage, &bus, &admin(), "inv_42").unwrap();

        assert_eq!(removed.len(), 2);
        assert_eq!(storage.load().unwrap().projects.len(), 1);

        let result = delete_projects_with_invoice(&mut store, &storage, &bus, &admin(), "inv_42");
        assert!(matches!(
            result,
            Err(DeleteProjectError::NoProjectForInvoice(id)) if id == "inv_42"
        ));
    }

    #[test]
    fn test_delete_requires_admin() {
        let jane = client("auth0|jane");
        let (mut store, storage, bus, project) = seeded(&jane, "Promo");

        assert!(matches!(
            delete_project(&mut store, &storage, &bus, &jane, project.id),
            Err(DeleteProjectError::AdminOnly)
        ));
        assert!(matches!(
            delete_projects_with_invoice(&mut store, &storage, &bus, &jane, "inv"),
            Err(DeleteProjectError::AdminOnly)
        ));

        let removed = delete_project(&mut store, &storage, &bus, &admin(), project.id).unwrap();
        assert_eq!(removed.id, project.id);
        assert!(store.projects.is_empty());
    }

    #[test]
    fn test_connect_and_disconnect_invoice() {
        let (mut store, storage, bus, project) = seeded(&admin(), "Doc");
        let invoices = vec![sample_invoice("inv_7", 900.0)];

        let connected = connect_invoice(
            &mut store, &storage, &bus, &admin(), project.id, "inv_7", &invoices,
        )
        .unwrap();
        assert_eq!(connected.invoice_id.as_deref(), Some("inv_7"));
        assert_eq!(connected.amount, 900.0);

        let mut rx = bus.subscribe();
        let affected = disconnect_invoice(&mut store, &storage, &bus, &admin(), "inv_7").unwrap();

        assert_eq!(affected.len(), 1);
        assert!(affected[0].invoice_id.is_none());
        assert_eq!(affected[0].amount, 0.0);
        assert_eq!(
            drain(&mut rx),
            vec![
                AppEvent::ProjectUpdated {
                    project_id: project.id
                },
                AppEvent::DashboardRefresh,
                AppEvent::ProjectsRefreshed,
            ]
        );
    }

    #[test]
    fn test_connect_unknown_invoice() {
        let (mut store, storage, bus, project) = seeded(&admin(), "Doc");

        let result = connect_invoice(&mut store, &storage, &bus, &admin(), project.id, "nope", &[]);
        assert!(matches!(result, Err(ConnectInvoiceError::InvoiceNotFound(_))));
    }

    #[test]
    fn test_disconnect_without_matches_is_ok() {
        let (mut store, storage, bus, _) = seeded(&admin(), "Doc");

        let affected = disconnect_invoice(&mut store, &storage, &bus, &admin(), "inv_x").unwrap();
        assert!(affected.is_empty());
    }

    #[test]
    fn test_task_counts() {
        let mut done = Task::new("Done", "", TaskPriority::Low);
        done.set_completed(true, Timestamp::now());
        let projects = vec![Project {
            tasks: vec![done, Task::new("Open", "", TaskPriority::Low)],
            ..Project::default()
        }];

        assert_eq!(
            task_counts(&projects),
            TaskCounts {
                active: 1,
                completed: 1
            }
        );
    }
}
