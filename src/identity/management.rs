//! Machine-to-machine access to the identity tenant's user directory.

use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    identity::{CONNECTION, IdentityError, ensure_success},
    models::session::is_valid_email,
};

pub const MIN_PASSWORD_LENGTH: usize = 8;

const PAGE_SIZE: u32 = 100;

pub fn validate_email(email: &str) -> Result<(), IdentityError> {
    if is_valid_email(email) {
        Ok(())
    } else {
        Err(IdentityError::InvalidEmail)
    }
}

pub fn validate_password(password: &str) -> Result<(), IdentityError> {
    if password.chars().count() >= MIN_PASSWORD_LENGTH {
        Ok(())
    } else {
        Err(IdentityError::InvalidPassword)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ManagedUser {
    #[serde(rename = "user_id")]
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub created_at: Option<Timestamp>,
    pub last_login: Option<Timestamp>,
    #[serde(default)]
    pub logins_count: u64,
}

/// Fields to change; `None` leaves the field alone.
#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Every account except `exclude_email`.
    async fn list_users(&self, exclude_email: &str) -> Result<Vec<ManagedUser>, IdentityError>;

    async fn count_users(&self, exclude_email: &str) -> Result<u64, IdentityError>;

    async fn create_user(&self, email: &str, password: &str) -> Result<ManagedUser, IdentityError>;

    async fn update_user(
        &self,
        user_id: &str,
        update: &UserUpdate,
    ) -> Result<ManagedUser, IdentityError>;

    async fn delete_user(&self, user_id: &str) -> Result<(), IdentityError>;
}

/// Client-credentials client for the management API. A fresh token is
/// requested for every operation.
pub struct ManagementClient {
    client: reqwest::Client,
    domain: String,
    client_id: String,
    client_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct UserPage {
    total: u64,
}

fn exclusion_query(exclude_email: &str) -> String {
    format!("NOT email:\"{}\"", exclude_email)
}

/// Account name derived from the part of the e-mail before `@`.
fn username_for(email: &str) -> String {
    email
        .trim()
        .split('@')
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

impl ManagementClient {
    pub fn new(
        domain: String,
        client_id: String,
        client_secret: String,
        timeout: Duration,
    ) -> Result<Self, IdentityError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            domain,
            client_id,
            client_secret,
        })
    }

    fn users_url(&self) -> String {
        format!("https://{}/api/v2/users", self.domain)
    }

    async fn token(&self) -> Result<String, IdentityError> {
        let response = self
            .client
            .post(format!("https://{}/oauth/token", self.domain))
            .json(&json!({
                "grant_type": "client_credentials",
                "client_id": self.client_id,
                "client_secret": self.client_secret,
                "audience": format!("https://{}/api/v2/", self.domain),
            }))
            .send()
            .await?;
        let token: TokenResponse = ensure_success(response).await?.json().await?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl UserDirectory for ManagementClient {
    async fn list_users(&self, exclude_email: &str) -> Result<Vec<ManagedUser>, IdentityError> {
        let token = self.token().await?;
        let response = self
            .client
            .get(self.users_url())
            .bearer_auth(token)
            .query(&[
                ("q", exclusion_query(exclude_email)),
                ("search_engine", String::from("v3")),
                ("per_page", PAGE_SIZE.to_string()),
            ])
            .send()
            .await?;
        let users: Vec<ManagedUser> = ensure_success(response).await?.json().await?;

        Ok(users
            .into_iter()
            .filter(|u| !u.email.eq_ignore_ascii_case(exclude_email))
            .collect())
    }

    async fn count_users(&self, exclude_email: &str) -> Result<u64, IdentityError> {
        let token = self.token().await?;
        let response = self
            .client
            .get(self.users_url())
            .bearer_auth(token)
            .query(&[
                ("q", exclusion_query(exclude_email)),
                ("search_engine", String::from("v3")),
                ("per_page", PAGE_SIZE.to_string()),
                ("include_totals", String::from("true")),
            ])
            .send()
            .await?;
        let page: UserPage = ensure_success(response).await?.json().await?;
        Ok(page.total)
    }

    async fn create_user(&self, email: &str, password: &str) -> Result<ManagedUser, IdentityError> {
        validate_email(email)?;
        validate_password(password)?;

        let token = self.token().await?;
        let username = username_for(email);
        let response = self
            .client
            .post(self.users_url())
            .bearer_auth(token)
            .json(&json!({
                "email": email.trim(),
                "password": password,
                "connection": CONNECTION,
                "email_verified": true,
                "username": username,
                "name": username,
            }))
            .send()
            .await?;
        let user: ManagedUser = ensure_success(response).await?.json().await?;

        tracing::info!(user_id = %user.id, "Client account created");
        Ok(user)
    }

    async fn update_user(
        &self,
        user_id: &str,
        update: &UserUpdate,
    ) -> Result<ManagedUser, IdentityError> {
        if let Some(email) = &update.email {
            validate_email(email)?;
        }
        if let Some(password) = &update.password {
            validate_password(password)?;
        }

        let token = self.token().await?;
        let mut body = serde_json::to_value(update)
            .map_err(|e| IdentityError::InvalidResponse(e.to_string()))?;
        if update.password.is_some() {
            body["connection"] = json!(CONNECTION);
        }

        let response = self
            .client
            .patch(format!("{}/{}", self.users_url(), user_id))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), IdentityError> {
        let token = self.token().await?;
        let response = self
            .client
            .delete(format!("{}/{}", self.users_url(), user_id))
            .bearer_auth(token)
            .send()
            .await?;
        ensure_success(response).await?;

        tracing::info!(user_id, "Client account deleted");
        Ok(())
    }
}
