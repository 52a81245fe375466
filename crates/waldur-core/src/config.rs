//! Configuration structures for Waldur clients.
//!
//! The library never reads the environment. An outer bootstrap layer builds a
//! [`ClientConfig`] and hands it to [`crate::ServiceClientBuilder`].

use crate::client::RetryPolicy;
use crate::Error;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use url::Url;
use validator::Validate;

/// Configuration for a Waldur client instance.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ClientConfig {
    /// API base URL (e.g. `https://waldur.example.com/api/`)
    #[validate(url)]
    pub api_url: String,

    /// Token sent as `Authorization: token <value>`
    #[serde(skip_serializing, deserialize_with = "deserialize_secret")]
    pub access_token: SecretString,

    /// Optional `User-Agent` header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// Whether to verify TLS certificates
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,

    /// Request timeout in seconds
    #[validate(range(min = 1, max = 600))]
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Number of attempts a write gets when the server answers 409
    #[validate(range(min = 1, max = 10))]
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    /// Fixed pause between conflict retries, in seconds
    #[validate(range(max = 60))]
    #[serde(default = "default_conflict_delay_secs")]
    pub conflict_delay_secs: u64,
}

const fn default_verify_ssl() -> bool {
    true
}

const fn default_timeout_secs() -> u64 {
    crate::client::DEFAULT_TIMEOUT_SECS
}

const fn default_retry_budget() -> u32 {
    crate::client::DEFAULT_RETRY_BUDGET
}

const fn default_conflict_delay_secs() -> u64 {
    crate::client::CONFLICT_DELAY_SECS
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

impl ClientConfig {
    /// Create a new client configuration with required parameters.
    ///
    /// # Arguments
    ///
    /// * `api_url` - The API root (e.g., "https://waldur.example.com/api/")
    /// * `access_token` - The user's API token
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or validation fails.
    pub fn new(api_url: impl Into<String>, access_token: impl Into<String>) -> Result<Self, Error> {
        let config = Self {
            api_url: api_url.into(),
            access_token: SecretString::from(access_token.into()),
            user_agent: None,
            verify_ssl: default_verify_ssl(),
            timeout_secs: default_timeout_secs(),
            retry_budget: default_retry_budget(),
            conflict_delay_secs: default_conflict_delay_secs(),
        };

        config
            .validate()
            .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;

        Ok(config)
    }

    /// Set the `User-Agent` header.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set whether to verify TLS certificates.
    #[must_use]
    pub const fn with_verify_ssl(mut self, verify: bool) -> Self {
        self.verify_ssl = verify;
        self
    }

    /// Set request timeout in seconds.
    #[must_use]
    pub const fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_secs = seconds;
        self
    }

    /// Set the conflict retry budget for writes.
    #[must_use]
    pub const fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    /// Set the pause between conflict retries in seconds.
    #[must_use]
    pub const fn with_conflict_delay(mut self, seconds: u64) -> Self {
        self.conflict_delay_secs = seconds;
        self
    }

    /// Get the request timeout as a Duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry policy derived from this configuration.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_budget(self.retry_budget)
            .with_conflict_delay(Duration::from_secs(self.conflict_delay_secs))
    }

    /// Returns the `Authorization` header value.
    #[must_use]
    pub fn authorization(&self) -> String {
        format!("token {}", self.access_token.expose_secret())
    }

    /// Parse the API URL, making sure it ends with a slash so that relative
    /// endpoint paths are joined below it.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn parse_api_url(&self) -> Result<Url, Error> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| Error::Config(format!("Invalid API URL: {e}")))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }
}
