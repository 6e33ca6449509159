//! Client configuration
//!
//! Loaded from TOML or built in code; validated before a client is created.

use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SCOPE: &str = "https://api.businesscentral.dynamics.com/.default";
pub const DEFAULT_TOKEN_ENDPOINT: &str =
    "https://login.microsoftonline.com/{TenantId}/oauth2/v2.0/token";
pub const DEFAULT_TIMEOUT_SECS: u64 = 100;

/// Placeholder replaced by the tenant id in the token endpoint template.
pub const TENANT_PLACEHOLDER: &str = "{TenantId}";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration value: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Connection settings for one Business Central company.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BusinessCentralConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    /// Service root, e.g. `https://api.businesscentral.dynamics.com/v2.0/{tenant}/Production/ODataV4`.
    pub base_url: String,
    pub company: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Token endpoint; may contain `{TenantId}`.
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

fn default_token_endpoint() -> String {
    DEFAULT_TOKEN_ENDPOINT.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_user_agent() -> String {
    format!("bc-odata/{}", env!("CARGO_PKG_VERSION"))
}

impl BusinessCentralConfig {
    /// Config with default scope, token endpoint, timeout and user agent.
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        base_url: impl Into<String>,
        company: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            base_url: base_url.into(),
            company: company.into(),
            scope: default_scope(),
            token_endpoint: default_token_endpoint(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_token_endpoint(mut self, template: impl Into<String>) -> Self {
        self.token_endpoint = template.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check that every required value is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("tenant_id", &self.tenant_id),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("base_url", &self.base_url),
            ("company", &self.company),
            ("scope", &self.scope),
            ("token_endpoint", &self.token_endpoint),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(name));
            }
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Token endpoint with the tenant substituted.
    pub fn token_url(&self) -> String {
        self.token_endpoint.replace(TENANT_PLACEHOLDER, &self.tenant_id)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl fmt::Debug for BusinessCentralConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusinessCentralConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("base_url", &self.base_url)
            .field("company", &self.company)
            .field("scope", &self.scope)
            .field("token_endpoint", &self.token_endpoint)
            .field("timeout_secs", &self.timeout_secs)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}
