use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::{billing::wave, stats};

const DEFAULT_ADMIN_EMAIL: &str = "info@cochranfilms.com";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_path: PathBuf,
    pub admin_email: String,
    pub billing_endpoint: String,
    pub billing_token: Option<String>,
    pub identity_domain: Option<String>,
    pub identity_client_id: Option<String>,
    pub management_client_id: Option<String>,
    pub management_client_secret: Option<String>,
    pub stats_interval: Duration,
    /// Upper bound for any single request to the billing or identity APIs
    pub http_timeout: Duration,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Empty values count as
    /// unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_path = get("STUDIODESK_DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("studiodesk")
                    .join("store.json")
            });

        let stats_interval = match get("STUDIODESK_STATS_INTERVAL_SECS") {
            Some(raw) => parse_seconds("STUDIODESK_STATS_INTERVAL_SECS", &raw)?,
            None => stats::DEFAULT_INTERVAL,
        };
        let http_timeout = match get("STUDIODESK_HTTP_TIMEOUT_SECS") {
            Some(raw) => parse_seconds("STUDIODESK_HTTP_TIMEOUT_SECS", &raw)?,
            None => DEFAULT_HTTP_TIMEOUT,
        };

        let management_client_id = get("STUDIODESK_MANAGEMENT_CLIENT_ID");

        Ok(Config {
            data_path,
            admin_email: get("STUDIODESK_ADMIN_EMAIL")
                .unwrap_or_else(|| DEFAULT_ADMIN_EMAIL.to_string())
                .to_lowercase(),
            billing_endpoint: get("STUDIODESK_BILLING_ENDPOINT")
                .unwrap_or_else(|| wave::DEFAULT_ENDPOINT.to_string()),
            billing_token: get("STUDIODESK_BILLING_TOKEN"),
            identity_domain: get("STUDIODESK_IDENTITY_DOMAIN"),
            identity_client_id: get("STUDIODESK_IDENTITY_CLIENT_ID")
                .or_else(|| management_client_id.clone()),
            management_client_id,
            management_client_secret: get("STUDIODESK_MANAGEMENT_CLIENT_SECRET"),
            stats_interval,
            http_timeout,
            log_level: get("STUDIODESK_LOG_LEVEL").unwrap_or_else(|| String::from("warn")),
        })
    }

    pub fn billing_token(&self) -> Result<&str, ConfigError> {
        self.billing_token
            .as_deref()
            .ok_or(ConfigError::Missing("STUDIODESK_BILLING_TOKEN"))
    }

    pub fn identity_domain(&self) -> Result<&str, ConfigError> {
        self.identity_domain
            .as_deref()
            .ok_or(ConfigError::Missing("STUDIODESK_IDENTITY_DOMAIN"))
    }

    pub fn identity_client_id(&self) -> Result<&str, ConfigError> {
        self.identity_client_id
            .as_deref()
            .ok_or(ConfigError::Missing("STUDIODESK_IDENTITY_CLIENT_ID"))
    }

    /// Client id and secret of the machine-to-machine application.
    pub fn management_credentials(&self) -> Result<(&str, &str), ConfigError> {
        let id = self
            .management_client_id
            .as_deref()
            .ok_or(ConfigError::Missing("STUDIODESK_MANAGEMENT_CLIENT_ID"))?;
        let secret = self
            .management_client_secret
            .as_deref()
            .ok_or(ConfigError::Missing("STUDIODESK_MANAGEMENT_CLIENT_SECRET"))?;
        Ok((id, secret))
    }
}

/// Whole seconds, at least 1.
fn parse_seconds(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = raw.trim().parse().map_err(|e| ConfigError::Invalid {
        key,
        reason: format!("{e}"),
    })?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            key,
            reason: String::from("must be at least 1"),
        });
    }
    Ok(Duration::from_secs(secs))
}
