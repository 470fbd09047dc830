use thiserror::Error;

use crate::{
    identity::{
        IdentityError,
        management::{ManagedUser, UserDirectory, UserUpdate, validate_email, validate_password},
    },
    models::{activity::ActivityEntry, session::Actor, store::Store},
    storage::{Storage, StorageError},
};

#[derive(Debug, Error)]
pub enum ClientAdminError {
    #[error("Only the admin can manage client accounts")]
    AdminOnly,

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

fn require_admin(actor: &Actor) -> Result<(), ClientAdminError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(ClientAdminError::AdminOnly)
    }
}

/// Every account except the admin's own.
pub async fn list_clients(
    actor: &Actor,
    directory: &dyn UserDirectory,
) -> Result<Vec<ManagedUser>, ClientAdminError> {
    require_admin(actor)?;
    Ok(directory.list_users(&actor.email).await?)
}

pub async fn count_clients(
    actor: &Actor,
    directory: &dyn UserDirectory,
) -> Result<u64, ClientAdminError> {
    require_admin(actor)?;
    Ok(directory.count_users(&actor.email).await?)
}

pub async fn create_client(
    actor: &Actor,
    directory: &dyn UserDirectory,
    email: &str,
    password: &str,
) -> Result<ManagedUser, ClientAdminError> {
    require_admin(actor)?;
    let email = email.trim();
    validate_email(email)?;
    validate_password(password)?;
    Ok(directory.create_user(email, password).await?)
}

pub async fn update_client_email(
    actor: &Actor,
    directory: &dyn UserDirectory,
    user_id: &str,
    email: &str,
) -> Result<ManagedUser, ClientAdminError> {
    require_admin(actor)?;
    let email = email.trim();
    validate_email(email)?;
    let update = UserUpdate {
        email: Some(email.to_string()),
        ..UserUpdate::default()
    };
    Ok(directory.update_user(user_id, &update).await?)
}

pub async fn update_client_password(
    actor: &Actor,
    directory: &dyn UserDirectory,
    user_id: &str,
    password: &str,
) -> Result<(), ClientAdminError> {
    require_admin(actor)?;
    validate_password(password)?;
    let update = UserUpdate {
        password: Some(password.to_string()),
        ..UserUpdate::default()
    };
    directory.update_user(user_id, &update).await?;
    Ok(())
}

pub async fn delete_client(
    actor: &Actor,
    directory: &dyn UserDirectory,
    user_id: &str,
) -> Result<(), ClientAdminError> {
    require_admin(actor)?;
    Ok(directory.delete_user(user_id).await?)
}

#[derive(Debug, Error)]
pub enum UpdateProfileError {
    #[error("Display name cannot be empty")]
    EmptyName,

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Renames the signed-in user both at the identity provider and locally.
pub async fn update_display_name(
    store: &mut Store,
    storage: &impl Storage,
    actor: &Actor,
    directory: &dyn UserDirectory,
    name: &str,
) -> Result<String, UpdateProfileError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(UpdateProfileError::EmptyName);
    }

    let update = UserUpdate {
        name: Some(name.to_string()),
        ..UserUpdate::default()
    };
    directory.update_user(&actor.user_id, &update).await?;

    let old_name = store
        .session
        .as_ref()
        .filter(|s| s.profile.id == actor.user_id)
        .map(|s| s.profile.name.clone())
        .or_else(|| store.user(&actor.user_id).and_then(|u| u.display_name.clone()))
        .unwrap_or_default();

    let previous = store.clone();
    if let Some(session) = store
        .session
        .as_mut()
        .filter(|s| s.profile.id == actor.user_id)
    {
        session.profile.name = name.to_string();
    }
    store.user_mut(&actor.user_id).display_name = Some(name.to_string());
    store.record_activity(
        &actor.user_id,
        ActivityEntry::display_name_changed(&old_name, name),
    );
    storage.save_or_restore(store, previous)?;

    tracing::info!(user_id = %actor.user_id, "Display name changed");
    Ok(name.to_string())
}

pub async fn update_own_password(
    store: &mut Store,
    storage: &impl Storage,
    actor: &Actor,
    directory: &dyn UserDirectory,
    password: &str,
) -> Result<(), UpdateProfileError> {
    validate_password(password)?;
    let update = UserUpdate {
        password: Some(password.to_string()),
        ..UserUpdate::default()
    };
    directory.update_user(&actor.user_id, &update).await?;

    let previous = store.clone();
    store.record_activity(
        &actor.user_id,
        ActivityEntry::profile_update("Password was changed"),
    );
    storage.save_or_restore(store, previous)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        identity::management::fake::FakeDirectory,
        models::session::Role,
        services::projects::tests::client,
        storage::memory::MemoryStorage,
    };

    fn admin_of(directory_admin_email: &str) -> Actor {
        Actor {
            user_id: String::from("auth0|1"),
            email: directory_admin_email.to_string(),
            role: Role::Admin,
        }
    }

    #[tokio::test]
    async fn test_list_and_count_skip_admin() {
        let directory =
            FakeDirectory::with_users(&["info@studio.test", "jane@example.com", "bob@example.com"]);
        let admin = admin_of("info@studio.test");

        let clients = list_clients(&admin, &directory).await.unwrap();
        assert_eq!(clients.len(), 2);
        assert!(clients.iter().all(|u| u.email != "info@studio.test"));
        assert_eq!(count_clients(&admin, &directory).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_client_operations_are_admin_only() {
        let directory = FakeDirectory::with_users(&["jane@example.com"]);
        let jane = client("auth0|1");

        assert!(matches!(
            list_clients(&jane, &directory).await,
            Err(ClientAdminError::AdminOnly)
        ));
        assert!(matches!(
            delete_client(&jane, &directory, "auth0|1").await,
            Err(ClientAdminError::AdminOnly)
        ));
        assert_eq!(*directory.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_client_validates_first() {
        let directory = FakeDirectory::default();
        let admin = admin_of("info@studio.test");

        assert!(matches!(
            create_client(&admin, &directory, "jane", "longenough").await,
            Err(ClientAdminError::Identity(IdentityError::InvalidEmail))
        ));
        assert!(matches!(
            create_client(&admin, &directory, "jane@example.com", "short").await,
            Err(ClientAdminError::Identity(IdentityError::InvalidPassword))
        ));
        assert_eq!(*directory.calls.lock().unwrap(), 0);

        let user = create_client(&admin, &directory, " jane@example.com ", "longenough")
            .await
            .unwrap();
        assert_eq!(user.email, "jane@example.com");
        assert_eq!(user.name, "jane");
    }

    #[tokio::test]
    async fn test_update_and_delete_client() {
        let directory = FakeDirectory::with_users(&["jane@example.com"]);
        let admin = admin_of("info@studio.test");

        let updated = update_client_email(&admin, &directory, "auth0|1", "jane@new.com")
            .await
            .unwrap();
        assert_eq!(updated.email, "jane@new.com");

        update_client_password(&admin, &directory, "auth0|1", "n3w-passw0rd")
            .await
            .unwrap();
        delete_client(&admin, &directory, "auth0|1").await.unwrap();
        assert!(directory.users.lock().unwrap().is_empty());

        assert!(matches!(
            delete_client(&admin, &directory, "auth0|1").await,
            Err(ClientAdminError::Identity(IdentityError::Status { status: 404, .. }))
        ));
    }

    #[tokio::test]
    async fn test_display_name_change_is_logged() {
        let directory = FakeDirectory::with_users(&["jane@example.com"]);
        let mut store = Store::default();
        let storage = MemoryStorage::default();
        let jane = client("auth0|1");
        store.user_mut("auth0|1").display_name = Some(String::from("jane"));

        let name = update_display_name(&mut store, &storage, &jane, &directory, "  Jane Doe ")
            .await
            .unwrap();

        assert_eq!(name, "Jane Doe");
        let persisted = storage.load().unwrap();
        let user = persisted.user("auth0|1").unwrap();
        assert_eq!(user.display_name.as_deref(), Some("Jane Doe"));
        assert_eq!(user.activities[0].description, "Changed from 'jane' to 'Jane Doe'");
        assert_eq!(directory.users.lock().unwrap()[0].name, "Jane Doe");

        assert!(matches!(
            update_display_name(&mut store, &storage, &jane, &directory, " ").await,
            Err(UpdateProfileError::EmptyName)
        ));
    }

    #[tokio::test]
    async fn test_own_password_needs_eight_characters() {
        let directory = FakeDirectory::with_users(&["jane@example.com"]);
        let mut store = Store::default();
        let storage = MemoryStorage::default();
        let jane = client("auth0|1");

        assert!(matches!(
            update_own_password(&mut store, &storage, &jane, &directory, "1234567").await,
            Err(UpdateProfileError::Identity(IdentityError::InvalidPassword))
        ));
        update_own_password(&mut store, &storage, &jane, &directory, "12345678")
            .await
            .unwrap();
        assert_eq!(
            store.user("auth0|1").unwrap().activities[0].description,
            "Password was changed"
        );
    }
}
