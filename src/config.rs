//! Configuration management

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Buildkite agent JWKS endpoint used when none is configured.
const DEFAULT_JWKS_URL: &str = "https://agent.buildkite.com/.well-known/jwks";

/// OIDC issuer used when none is configured.
const DEFAULT_ISSUER: &str = "https://agent.buildkite.com";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network port to listen on
    pub port: u16,
    /// Buildkite API token with GraphQL access
    pub buildkite_token: String,
    /// Overall per-request deadline
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
    /// OIDC verification settings
    pub oidc: OidcConfig,
    /// GitHub App configurations, one per Forge host
    pub applications: Vec<ApplicationConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            buildkite_token: String::new(),
            default_timeout: Duration::from_secs(30),
            oidc: OidcConfig::default(),
            applications: Vec::new(),
        }
    }
}

/// OIDC token verification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcConfig {
    /// Expected `aud` claim. Tenant-specific, so no default.
    pub audience: String,
    /// Expected `iss` claim
    pub issuer: String,
    /// JWKS endpoint publishing the CI signing keys
    pub jwks_url: String,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            audience: String::new(),
            issuer: DEFAULT_ISSUER.to_string(),
            jwks_url: DEFAULT_JWKS_URL.to_string(),
        }
    }
}

/// A single GitHub App configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// GitHub host this app is installed on, most commonly github.com
    pub host: String,
    /// The app's unique ID
    #[serde(rename = "appID")]
    pub app_id: u64,
    /// File holding the app's RSA private key
    #[serde(rename = "privateKeyPath")]
    pub private_key_path: PathBuf,
    /// Known app installations; extended at startup by live discovery
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// A single app installation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Org or account the app is installed in
    pub name: String,
    /// The app's installation ID in that account
    #[serde(rename = "installationID")]
    pub installation_id: u64,
}

impl Config {
    /// Load configuration from a YAML file plus environment overrides.
    ///
    /// `PORT`, `BUILDKITE_TOKEN`, and `DEFAULT_TIMEOUT` override the file.
    ///
    /// # Errors
    ///
    /// Fails when the file is missing or malformed, or when a required value
    /// is absent after the merge.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        let figment = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::raw().only(&["PORT", "BUILDKITE_TOKEN", "DEFAULT_TIMEOUT"]));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check required values the deserializer cannot enforce.
    fn validate(&self) -> Result<()> {
        if self.buildkite_token.is_empty() {
            return Err(Error::Config("BUILDKITE_TOKEN is required".to_string()));
        }
        if self.oidc.audience.is_empty() {
            return Err(Error::Config("oidc.audience is required".to_string()));
        }
        Ok(())
    }

    /// The application config for a given GitHub host.
    ///
    /// # Errors
    ///
    /// Fails when no application is configured for `host`.
    pub fn app_config_for_host(&self, host: &str) -> Result<&ApplicationConfig> {
        self.applications
            .iter()
            .find(|app| app.host == host)
            .ok_or_else(|| Error::Config(format!("unable to find configuration for host '{host}'")))
    }
}

impl ApplicationConfig {
    /// The installation ID of this app in a given account, if declared.
    #[must_use]
    pub fn installation_id(&self, account: &str) -> Option<u64> {
        self.accounts
            .iter()
            .find(|a| a.name == account)
            .map(|a| a.installation_id)
    }
}
