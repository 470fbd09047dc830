use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    activity::{ActivityEntry, MAX_ACTIVITIES},
    project::Project,
    session::{Session, UserProfile},
};

/// Current schema version
pub const CURRENT_VERSION: u32 = 2;

/// Everything kept on disk for one user id.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct UserData {
    /// Newest first, at most [`MAX_ACTIVITIES`] entries
    #[serde(default)]
    pub activities: Vec<ActivityEntry>,
    pub display_name: Option<String>,
    /// Invoice id -> title the user chose for it
    #[serde(default)]
    pub invoice_titles: BTreeMap<String, String>,
    pub saved_profile: Option<UserProfile>,
    pub last_login_at: Option<Timestamp>,
}

impl UserData {
    pub fn record_activity(&mut self, entry: ActivityEntry) {
        self.activities.insert(0, entry);
        self.activities.truncate(MAX_ACTIVITIES);
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Store {
    pub version: u32,
    pub projects: Vec<Project>,
    pub session: Option<Session>,
    #[serde(default)]
    pub users: BTreeMap<String, UserData>,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            projects: vec![],
            session: None,
            users: BTreeMap::new(),
        }
    }
}

impl Store {
    pub fn add_project(&mut self, project: Project) {
        self.projects.push(project);
    }

    pub fn get_project(&self, project_id: Uuid) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == project_id)
    }

    pub fn get_project_mut(&mut self, project_id: Uuid) -> Option<&mut Project> {
        self.projects.iter_mut().find(|p| p.id == project_id)
    }

    pub fn remove_project(&mut self, project_id: Uuid) -> Option<Project> {
        let index = self.projects.iter().position(|p| p.id == project_id)?;
        Some(self.projects.remove(index))
    }

    pub fn get_projects_with_invoice<'a>(
        &'a self,
        invoice_id: &'a str,
    ) -> impl Iterator<Item = &'a Project> + 'a {
        self.projects
            .iter()
            .filter(move |p| p.invoice_id.as_deref() == Some(invoice_id))
    }

    pub fn get_client_projects<'a>(
        &'a self,
        client_id: &'a str,
    ) -> impl Iterator<Item = &'a Project> + 'a {
        self.projects.iter().filter(move |p| p.client_id == client_id)
    }

    pub fn user(&self, user_id: &str) -> Option<&UserData> {
        self.users.get(user_id)
    }

    pub fn user_mut(&mut self, user_id: &str) -> &mut UserData {
        self.users.entry(user_id.to_string()).or_default()
    }

    pub fn record_activity(&mut self, user_id: &str, entry: ActivityEntry) {
        self.user_mut(user_id).record_activity(entry);
    }
}
