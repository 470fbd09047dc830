use jiff::Timestamp;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct UserProfile {
    /// Subject id assigned by the identity provider
    pub id: String,
    pub email: String,
    pub name: String,
    pub picture_url: Option<String>,
}

/// The signed-in user and the token the identity provider issued for them.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Session {
    pub profile: UserProfile,
    pub access_token: String,
    pub signed_in_at: Timestamp,
}

/// Loose shape check used before any call that takes an e-mail.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    !email.is_empty() && email.contains('@') && email.contains('.')
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Admin,
    Client,
}

/// Whoever is performing an operation. Every service call that is
/// permission-gated takes one.
#[derive(Clone, Debug, PartialEq)]
pub struct Actor {
    pub user_id: String,
    pub email: String,
    pub role: Role,
}

impl Actor {
    /// The admin is recognised by a single fixed account e-mail.
    pub fn from_profile(profile: &UserProfile, admin_email: &str) -> Self {
        let role = if profile.email.eq_ignore_ascii_case(admin_email) {
            Role::Admin
        } else {
            Role::Client
        };
        Self {
            user_id: profile.id.clone(),
            email: profile.email.to_lowercase(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins may act on every client's records, clients only on their own.
    pub fn can_manage(&self, client_id: &str) -> bool {
        self.is_admin() || self.user_id == client_id
    }
}
