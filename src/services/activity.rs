use thiserror::Error;

use crate::{
    models::{activity::ActivityEntry, store::Store},
    storage::{Storage, StorageError},
};

#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Appends `entry` to the head of the user's log and persists.
pub fn log_activity(
    store: &mut Store,
    storage: &impl Storage,
    user_id: &str,
    entry: ActivityEntry,
) -> Result<(), ActivityError> {
    let previous = store.clone();
    store.record_activity(user_id, entry);
    storage.save_or_restore(store, previous)?;
    Ok(())
}

pub fn clear_activities(
    store: &mut Store,
    storage: &impl Storage,
    user_id: &str,
) -> Result<usize, ActivityError> {
    let previous = store.clone();
    let user = store.user_mut(user_id);
    let cleared = user.activities.len();
    user.activities.clear();
    storage.save_or_restore(store, previous)?;
    tracing::info!(user_id, cleared, "Activity log cleared");
    Ok(cleared)
}

pub fn list_activities<'a>(store: &'a Store, user_id: &str) -> &'a [ActivityEntry] {
    store
        .user(user_id)
        .map(|u| u.activities.as_slice())
        .unwrap_or(&[])
}
