//! Per-host GitHub App client.
//!
//! One [`AppClient`] exists per configured Forge host (github.com or a GHES
//! instance). It holds an App-JWT authenticated handle for App-level calls
//! (installation discovery, token minting) and a cache of per-organization
//! clients, each authenticated by a short-lived installation token with
//! read-only metadata and contents scope.
//!
//! # Org client cache
//!
//! The cache is a plain map behind one mutex. Handlers run in parallel, but a
//! miss only happens when an org's installation token is within 30 seconds of
//! expiry (roughly once an hour per org), so there is nothing to shard. The
//! guard is never held across an await; two racing misses mint two tokens and
//! the second insert wins.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::EncodingKey;
use octocrab::Octocrab;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::authorizer::ManifestSource;
use crate::config::{AccountConfig, ApplicationConfig};
use crate::repo::RepositoryName;
use crate::{Error, Result};

/// Seconds of remaining validity below which a cached org client is rebuilt.
const EXPIRY_SLACK_SECS: i64 = 30;

/// Permission set attached to a minted installation token.
///
/// Field names follow the GitHub Apps API; absent fields are not requested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPermissions {
    /// `contents` permission: `read` or `write`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    /// `metadata` permission: `read`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    /// `pull_requests` permission: `read` or `write`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_requests: Option<String>,
}

impl TokenPermissions {
    /// The scope used for the broker's own org clients.
    #[must_use]
    pub fn read_metadata_and_contents() -> Self {
        Self {
            contents: Some("read".to_string()),
            metadata: Some("read".to_string()),
            pull_requests: None,
        }
    }
}

/// A minted installation token.
#[derive(Debug, Clone, Deserialize)]
pub struct InstallationToken {
    /// The opaque token string
    pub token: String,
    /// Server-reported expiry, roughly one hour out
    pub expires_at: DateTime<Utc>,
}

/// An App installation as reported by the Forge.
#[derive(Debug, Clone, Deserialize)]
struct Installation {
    id: u64,
    #[serde(default)]
    account: Option<InstallationAccount>,
}

#[derive(Debug, Clone, Deserialize)]
struct InstallationAccount {
    login: String,
}

#[derive(Serialize)]
struct CreateTokenBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    repositories: Option<&'a [String]>,
    permissions: &'a TokenPermissions,
}

/// Cached per-organization client.
struct OrgClient {
    installation_id: u64,
    client: Octocrab,
    expires_at: DateTime<Utc>,
}

/// GitHub App client for a single Forge host.
pub struct AppClient {
    host: String,
    app: Octocrab,
    /// Config-declared accounts plus installations discovered at startup
    accounts: Vec<AccountConfig>,
    org_clients: Mutex<HashMap<String, OrgClient>>,
}

impl AppClient {
    /// Build the App client for one configured host and enumerate its
    /// installations.
    ///
    /// # Errors
    ///
    /// Fails when the private key cannot be read or parsed, or when the
    /// installation listing fails.
    pub async fn for_host(config: &ApplicationConfig) -> Result<Self> {
        let key_bytes = tokio::fs::read(&config.private_key_path).await?;
        let key = EncodingKey::from_rsa_pem(&key_bytes).map_err(|e| {
            Error::Config(format!(
                "cannot parse app private key {}: {e}",
                config.private_key_path.display()
            ))
        })?;

        let mut builder = Octocrab::builder().app(octocrab::models::AppId(config.app_id), key);
        if config.host != "github.com" {
            builder = builder.base_uri(format!("https://{}/api/v3", config.host))?;
        }
        let app = builder.build()?;

        // Installation discovery is authoritative but additive: accounts
        // declared in config stay even if the listing omits them
        let mut accounts = config.accounts.clone();
        let installations: Vec<Installation> = app
            .get("/app/installations", None::<&()>)
            .await
            .map_err(|e| Error::Upstream(format!("cannot list github app installations: {e}")))?;
        for inst in installations {
            let Some(account) = inst.account else {
                continue;
            };
            if !accounts.iter().any(|a| a.name == account.login) {
                accounts.push(AccountConfig {
                    name: account.login,
                    installation_id: inst.id,
                });
            }
        }

        info!(
            host = %config.host,
            app_id = config.app_id,
            installations = accounts.len(),
            "initialized github app client"
        );

        Ok(Self {
            host: config.host.clone(),
            app,
            accounts,
            org_clients: Mutex::new(HashMap::new()),
        })
    }

    /// The Forge host this client talks to.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Accounts the App is installed in (config-declared plus discovered).
    #[must_use]
    pub fn accounts(&self) -> &[AccountConfig] {
        &self.accounts
    }

    /// A client authenticated as the App's installation in `org`, with
    /// read access to contents and metadata.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::OrgNotInstalled`] when the App has no installation
    /// in `org`, or with an upstream error when token minting fails.
    pub async fn client_for_org(&self, org: &str) -> Result<Octocrab> {
        let mut known_installation = None;
        {
            let mut cache = self.org_clients.lock();
            if let Some(entry) = cache.get(org) {
                if entry_is_fresh(entry.expires_at, Utc::now()) {
                    return Ok(entry.client.clone());
                }
                // Near expiry: drop the handle but keep the installation ID
                // to skip one discovery round-trip on rebuild
                known_installation = Some(entry.installation_id);
                cache.remove(org);
            }
        }

        let installation_id = match known_installation {
            Some(id) => id,
            None => self.find_org_installation(org).await?,
        };

        // Org-wide token, not limited to specific repositories
        let minted = self
            .create_token(installation_id, None, &TokenPermissions::read_metadata_and_contents())
            .await?;

        let client = self.token_client(&minted.token)?;
        debug!(host = %self.host, org = %org, expires_at = %minted.expires_at, "minted org client token");

        self.org_clients.lock().insert(
            org.to_string(),
            OrgClient {
                installation_id,
                client: client.clone(),
                expires_at: minted.expires_at,
            },
        );

        Ok(client)
    }

    /// Read a file at `HEAD` of `org/repo` through the org client.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the repository or path does not exist; other
    /// Forge failures propagate as-is.
    pub async fn get_contents(&self, org: &str, repo: &str, path: &str) -> Result<String> {
        let client = self.client_for_org(org).await?;

        let contents = client
            .repos(org, repo)
            .get_content()
            .path(path)
            .r#ref("HEAD")
            .send()
            .await
            .map_err(map_not_found)?;

        let item = contents.items.into_iter().next().ok_or(Error::NotFound)?;
        let encoded = item
            .content
            .ok_or_else(|| Error::Upstream(format!("file {path} has no inline content")))?;

        let decoded = base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            encoded.replace('\n', ""),
        )
        .map_err(|e| Error::Upstream(format!("invalid base64 content for {path}: {e}")))?;

        String::from_utf8(decoded)
            .map_err(|e| Error::Upstream(format!("file {path} is not valid UTF-8: {e}")))
    }

    /// Mint an installation token scoped to exactly `repos` with the given
    /// permission set.
    ///
    /// # Errors
    ///
    /// Fails when the list is empty, when the repositories span more than one
    /// `(host, org)` pair, or when the Forge rejects the mint.
    pub async fn create_installation_token(
        &self,
        repos: &[RepositoryName],
        permissions: &TokenPermissions,
    ) -> Result<InstallationToken> {
        let repo_names = validate_single_org(repos)?;

        let installation_id = self.find_org_installation(&repos[0].org).await?;
        self.create_token(installation_id, Some(&repo_names), permissions)
            .await
    }

    /// Resolve the App's installation ID in `org`.
    ///
    /// Accounts known from config or startup discovery answer without a
    /// round-trip; anything else goes to the Forge.
    async fn find_org_installation(&self, org: &str) -> Result<u64> {
        if let Some(account) = self.accounts.iter().find(|a| a.name == org) {
            return Ok(account.installation_id);
        }

        let installation: Installation = self
            .app
            .get(format!("/orgs/{org}/installation"), None::<&()>)
            .await
            .map_err(|e| match forge_status(&e) {
                Some(404) => Error::OrgNotInstalled(org.to_string()),
                _ => Error::Upstream(format!("cannot access organization {org}: {e}")),
            })?;
        Ok(installation.id)
    }

    /// POST the access-token request for one installation.
    async fn create_token(
        &self,
        installation_id: u64,
        repositories: Option<&[String]>,
        permissions: &TokenPermissions,
    ) -> Result<InstallationToken> {
        let body = CreateTokenBody {
            repositories,
            permissions,
        };
        let token: InstallationToken = self
            .app
            .post(
                format!("/app/installations/{installation_id}/access_tokens"),
                Some(&body),
            )
            .await?;
        Ok(token)
    }

    /// An octocrab handle authenticated by a raw installation token.
    fn token_client(&self, token: &str) -> Result<Octocrab> {
        let mut builder = Octocrab::builder().personal_token(token.to_string());
        if self.host != "github.com" {
            builder = builder.base_uri(format!("https://{}/api/v3", self.host))?;
        }
        Ok(builder.build()?)
    }
}

#[async_trait::async_trait]
impl ManifestSource for AppClient {
    async fn fetch_file(&self, org: &str, repo: &str, path: &str) -> Result<String> {
        self.get_contents(org, repo, path).await
    }
}

/// True while the cached token has more than the slack window left.
fn entry_is_fresh(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at > now + Duration::seconds(EXPIRY_SLACK_SECS)
}

/// Check all repositories share one `(host, org)` pair and collect the bare
/// repo names for the mint request.
fn validate_single_org(repos: &[RepositoryName]) -> Result<Vec<String>> {
    if repos.is_empty() {
        return Err(Error::Internal(
            "must supply at least one repository".to_string(),
        ));
    }

    let mut names = Vec::with_capacity(repos.len());
    let mut seen: Option<String> = None;
    for repo in repos {
        let host_org = format!("{}/{}", repo.host, repo.org);
        if let Some(previous) = &seen {
            if previous != &host_org {
                return Err(Error::CrossOrgRequest {
                    current: host_org,
                    previous: previous.clone(),
                });
            }
        }
        names.push(repo.repo.clone());
        seen = Some(host_org);
    }
    Ok(names)
}

/// HTTP status carried by an octocrab error, if any.
fn forge_status(err: &octocrab::Error) -> Option<u16> {
    match err {
        octocrab::Error::GitHub { source, .. } => Some(source.status_code.as_u16()),
        _ => None,
    }
}

/// Map a Forge 404 to the typed not-found error.
fn map_not_found(err: octocrab::Error) -> Error {
    if forge_status(&err) == Some(404) {
        Error::NotFound
    } else {
        err.into()
    }
}
