//! Identity provider: who the signed-in user is, plus password resets.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use crate::models::session::UserProfile;

pub mod management;

/// Database connection that holds every studio account.
pub const CONNECTION: &str = "Username-Password-Authentication";

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Identity provider rejected the credentials")]
    Unauthorized,

    #[error("Identity provider returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Please enter a valid email address")]
    InvalidEmail,

    #[error("Password must be at least {} characters long", management::MIN_PASSWORD_LENGTH)]
    InvalidPassword,

    #[error("Unexpected identity provider response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolves an access token to the profile it was issued for.
    async fn user_info(&self, access_token: &str) -> Result<UserProfile, IdentityError>;

    /// Asks the provider to e-mail a password reset link.
    async fn reset_password(&self, email: &str) -> Result<(), IdentityError>;
}

/// Error bodies come back as either `{"message": ..}` or
/// `{"error_description": ..}` depending on the endpoint.
#[derive(Deserialize, Default)]
struct ErrorBody {
    message: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

/// Maps a non-2xx response to an [`IdentityError`], passing success through.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, IdentityError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(IdentityError::Unauthorized);
    }

    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let message = body
        .message
        .or(body.error_description)
        .or(body.error)
        .unwrap_or(text);
    Err(IdentityError::Status {
        status: status.as_u16(),
        message,
    })
}

#[derive(Deserialize)]
struct UserInfo {
    sub: String,
    email: Option<String>,
    name: Option<String>,
    nickname: Option<String>,
    picture: Option<String>,
}

impl UserInfo {
    fn into_profile(self) -> UserProfile {
        let email = self.email.unwrap_or_default();
        let name = self
            .name
            .filter(|n| !n.is_empty() && *n != email)
            .or(self.nickname)
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        UserProfile {
            id: self.sub,
            email,
            name,
            picture_url: self.picture,
        }
    }
}

/// OIDC endpoints of the hosted identity tenant at `domain`.
pub struct OidcIdentityProvider {
    client: reqwest::Client,
    domain: String,
    client_id: String,
}

impl OidcIdentityProvider {
    pub fn new(domain: String, client_id: String, timeout: Duration) -> Result<Self, IdentityError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            domain,
            client_id,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("https://{}{}", self.domain, path)
    }
}

#[async_trait]
impl IdentityProvider for OidcIdentityProvider {
    async fn user_info(&self, access_token: &str) -> Result<UserProfile, IdentityError> {
        let response = self
            .client
            .get(self.url("/userinfo"))
            .bearer_auth(access_token)
            .send()
            .await?;
        let info: UserInfo = ensure_success(response).await?.json().await?;
        Ok(info.into_profile())
    }

    async fn reset_password(&self, email: &str) -> Result<(), IdentityError> {
        let response = self
            .client
            .post(self.url("/dbconnections/change_password"))
            .json(&json!({
                "client_id": self.client_id,
                "email": email,
                "connection": CONNECTION,
            }))
            .send()
            .await?;
        ensure_success(response).await?;
        tracing::info!(email, "Password reset requested");
        Ok(())
    }
}

#[cfg(test)]
pub mod fake {
    use std::{collections::HashMap, sync::Mutex};

    use super::*;

    /// Maps access tokens to profiles. Unknown tokens are unauthorized.
    #[derive(Default)]
    pub struct FakeIdentity {
        pub profiles: HashMap<String, UserProfile>,
        pub resets: Mutex<Vec<String>>,
    }

    impl FakeIdentity {
        pub fn with_profile(token: &str, profile: UserProfile) -> Self {
            Self {
                profiles: HashMap::from([(token.to_string(), profile)]),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeIdentity {
        async fn user_info(&self, access_token: &str) -> Result<UserProfile, IdentityError> {
            self.profiles
                .get(access_token)
                .cloned()
                .ok_or(IdentityError::Unauthorized)
        }

        async fn reset_password(&self, email: &str) -> Result<(), IdentityError> {
            self.resets.lock().unwrap().push(email.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_userinfo_profile_prefers_real_name() {
        let info: UserInfo = serde_json::from_value(json!({
            "sub": "auth0|1",
            "email": "jane@example.com",
            "name": "Jane Doe",
            "picture": "https://cdn.test/jane.png"
        }))
        .unwrap();

        let profile = info.into_profile();
        assert_eq!(profile.id, "auth0|1");
        assert_eq!(profile.name, "Jane Doe");
        assert_eq!(profile.picture_url.as_deref(), Some("https://cdn.test/jane.png"));
    }

    #[test]
    fn test_userinfo_name_falls_back_from_email() {
        let info: UserInfo = serde_json::from_value(json!({
            "sub": "auth0|2",
            "email": "bob@example.com",
            "name": "bob@example.com"
        }))
        .unwrap();

        assert_eq!(info.into_profile().name, "bob");
    }
}
