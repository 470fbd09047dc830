use jiff::Timestamp;
use thiserror::Error;

use crate::{
    events::{AppEvent, EventBus},
    identity::{IdentityError, IdentityProvider, management::validate_email},
    models::{
        activity::ActivityEntry,
        session::{Actor, Session, UserProfile},
        store::Store,
    },
    storage::{Storage, StorageError},
};

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("Access token cannot be empty")]
    EmptyToken,

    #[error("Could not sign in: {0}")]
    Identity(#[from] IdentityError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Signs in with an access token issued by the identity provider. A display
/// name the user chose earlier wins over the provider's name.
pub async fn login(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
    identity: &dyn IdentityProvider,
    access_token: &str,
) -> Result<Session, LoginError> {
    let access_token = access_token.trim();
    if access_token.is_empty() {
        return Err(LoginError::EmptyToken);
    }

    let mut profile = identity.user_info(access_token).await?;
    let now = Timestamp::now();

    let previous = store.clone();
    let user = store.user_mut(&profile.id);
    if let Some(name) = &user.display_name {
        profile.name = name.clone();
    }
    user.saved_profile = Some(profile.clone());
    user.last_login_at = Some(now);

    let session = Session {
        profile,
        access_token: access_token.to_string(),
        signed_in_at: now,
    };
    store.session = Some(session.clone());
    storage.save_or_restore(store, previous)?;

    tracing::info!(user_id = %session.profile.id, "Signed in");
    bus.publish(AppEvent::UserAuthenticated {
        user_id: session.profile.id.clone(),
    });
    Ok(session)
}

#[derive(Debug, Error)]
pub enum LogoutError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Ends the session, keeping a snapshot of the profile under the user's
/// local data. Returns the profile that was signed in, if any.
pub fn logout(
    store: &mut Store,
    storage: &impl Storage,
    bus: &EventBus,
) -> Result<Option<UserProfile>, LogoutError> {
    let previous = store.clone();
    let Some(session) = store.session.take() else {
        return Ok(None);
    };

    let user = store.user_mut(&session.profile.id);
    user.saved_profile = Some(session.profile.clone());
    user.last_login_at = Some(session.signed_in_at);
    storage.save_or_restore(store, previous)?;

    tracing::info!(user_id = %session.profile.id, "Signed out");
    bus.publish(AppEvent::UserLoggedOut);
    Ok(Some(session.profile))
}

pub fn is_authenticated(store: &Store) -> bool {
    store.session.is_some()
}

pub fn current_profile(store: &Store) -> Option<&UserProfile> {
    store.session.as_ref().map(|s| &s.profile)
}

pub fn access_token(store: &Store) -> Option<&str> {
    store.session.as_ref().map(|s| s.access_token.as_str())
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not signed in. Run `studiodesk login` first")]
    NotSignedIn,
}

pub fn current_actor(store: &Store, admin_email: &str) -> Result<Actor, SessionError> {
    current_profile(store)
        .map(|p| Actor::from_profile(p, admin_email))
        .ok_or(SessionError::NotSignedIn)
}

#[derive(Debug, Error)]
pub enum PasswordResetError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub async fn request_password_reset(
    store: &mut Store,
    storage: &impl Storage,
    identity: &dyn IdentityProvider,
    email: &str,
) -> Result<(), PasswordResetError> {
    let email = email.trim();
    validate_email(email)?;
    identity.reset_password(email).await?;

    if let Some(user_id) = current_profile(store).map(|p| p.id.clone()) {
        let previous = store.clone();
        store.record_activity(
            &user_id,
            ActivityEntry::profile_update(format!("Password reset e-mail sent to {}", email)),
        );
        storage.save_or_restore(store, previous)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::drain, identity::fake::FakeIdentity, models::session::Role,
        storage::memory::MemoryStorage,
    };

    fn jane() -> UserProfile {
        UserProfile {
            id: String::from("auth0|jane"),
            email: String::from("jane@example.com"),
            name: String::from("Jane Doe"),
            picture_url: None,
        }
    }

    #[tokio::test]
    async fn test_login_stores_session_and_publishes() {
        let mut store = Store::default();
        let storage = MemoryStorage::default();
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let identity = FakeIdentity::with_profile("tok", jane());

        let session = login(&mut store, &storage, &bus, &identity, "tok")
            .await
            .unwrap();

        assert_eq!(session.profile, jane());
        assert!(is_authenticated(&storage.load().unwrap()));
        assert_eq!(access_token(&store), Some("tok"));
        assert_eq!(
            drain(&mut rx),
            vec![AppEvent::UserAuthenticated {
                user_id: String::from("auth0|jane")
            }]
        );
    }

    #[tokio::test]
    async fn test_login_applies_saved_display_name() {
        let mut store = Store::default();
        store.user_mut("auth0|jane").display_name = Some(String::from("JD"));
        let identity = FakeIdentity::with_profile("tok", jane());

        let session = login(
            &mut store,
            &MemoryStorage::default(),
            &EventBus::default(),
            &identity,
            "tok",
        )
        .await
        .unwrap();

        assert_eq!(session.profile.name, "JD");
    }

    #[tokio::test]
    async fn test_login_with_bad_token() {
        let mut store = Store::default();
        let identity = FakeIdentity::default();

        let result = login(
            &mut store,
            &MemoryStorage::default(),
            &EventBus::default(),
            &identity,
            "nope",
        )
        .await;
        assert!(matches!(
            result,
            Err(LoginError::Identity(IdentityError::Unauthorized))
        ));

        let result = login(
            &mut store,
            &MemoryStorage::default(),
            &EventBus::default(),
            &identity,
            "  ",
        )
        .await;
        assert!(matches!(result, Err(LoginError::EmptyToken)));
        assert!(!is_authenticated(&store));
    }

    #[tokio::test]
    async fn test_logout_snapshots_profile() {
        let mut store = Store::default();
        let storage = MemoryStorage::default();
        let bus = EventBus::default();
        let identity = FakeIdentity::with_profile("tok", jane());
        login(&mut store, &storage, &bus, &identity, "tok")
            .await
            .unwrap();
        let mut rx = bus.subscribe();

        let profile = logout(&mut store, &storage, &bus).unwrap();

        assert_eq!(profile, Some(jane()));
        let persisted = storage.load().unwrap();
        assert!(persisted.session.is_none());
        assert_eq!(
            persisted.user("auth0|jane").unwrap().saved_profile,
            Some(jane())
        );
        assert_eq!(drain(&mut rx), vec![AppEvent::UserLoggedOut]);

        assert_eq!(logout(&mut store, &storage, &bus).unwrap(), None);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_failed_logout_keeps_session() {
        let mut store = Store::default();
        let storage = MemoryStorage::default();
        let bus = EventBus::default();
        let identity = FakeIdentity::with_profile("tok", jane());
        login(&mut store, &storage, &bus, &identity, "tok")
            .await
            .unwrap();
        let mut rx = bus.subscribe();
        let before = store.clone();

        storage.fail_saves();
        let result = logout(&mut store, &storage, &bus);

        assert!(matches!(result, Err(LogoutError::Storage(_))));
        assert!(is_authenticated(&store));
        assert_eq!(store, before);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_current_actor_role() {
        let mut store = Store::default();
        assert!(matches!(
            current_actor(&store, "info@studio.test"),
            Err(SessionError::NotSignedIn)
        ));

        store.session = Some(Session {
            profile: UserProfile {
                email: String::from("INFO@studio.test"),
                ..jane()
            },
            access_token: String::from("tok"),
            signed_in_at: Timestamp::now(),
        });
        let actor = current_actor(&store, "info@studio.test").unwrap();
        assert_eq!(actor.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_password_reset_validates_and_logs() {
        let mut store = Store::default();
        let storage = MemoryStorage::default();
        let identity = FakeIdentity::with_profile("tok", jane());

        let result = request_password_reset(&mut store, &storage, &identity, "bad").await;
        assert!(matches!(
            result,
            Err(PasswordResetError::Identity(IdentityError::InvalidEmail))
        ));
        assert!(identity.resets.lock().unwrap().is_empty());

        login(&mut store, &storage, &EventBus::default(), &identity, "tok")
            .await
            .unwrap();
        request_password_reset(&mut store, &storage, &identity, "jane@example.com")
            .await
            .unwrap();

        assert_eq!(identity.resets.lock().unwrap().as_slice(), ["jane@example.com"]);
        assert_eq!(
            store.user("auth0|jane").unwrap().activities[0].title,
            "Profile Updated"
        );
    }
}
