//! Error types for the token broker.

use axum::http::StatusCode;

use thiserror::Error;

/// Result type alias for the token broker
pub type Result<T> = std::result::Result<T, Error>;

/// Token broker errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A repository reference could not be parsed
    #[error("invalid github URL")]
    InvalidRepository,

    /// Malformed request input (bad JSON, missing claim)
    #[error("{0}")]
    BadRequest(String),

    /// Authentication or authorization failure
    #[error("{0}")]
    Forbidden(String),

    /// No GitHub App client is configured for the requested host
    #[error("no github client for {0}")]
    NoForgeForHost(String),

    /// The App has no installation in the requested organization
    #[error("cannot find github app installation for organization {0}")]
    OrgNotInstalled(String),

    /// The Buildkite pipeline does not exist
    #[error("pipeline {0} does not exist")]
    PipelineNotFound(String),

    /// A token request spans more than one (host, org) pair
    #[error("unable to generate access tokens spanning multiple organizations. Got {current}, but already seen {previous}")]
    CrossOrgRequest {
        /// The (host, org) pair that broke the run
        current: String,
        /// The (host, org) pair seen first
        previous: String,
    },

    /// The Forge reported 404 for the requested resource
    #[error("not found")]
    NotFound,

    /// An upstream call (Forge or Buildkite) failed
    #[error("upstream error: {0}")]
    Upstream(String),

    /// OIDC token verification failure
    #[error("cannot verify token: {0}")]
    Oidc(#[from] jsonwebtoken::errors::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// GitHub API error
    #[error("GitHub error: {0}")]
    GitHub(#[from] Box<octocrab::Error>),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status this error maps to when it escapes a request handler.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRepository | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) | Self::Oidc(_) => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// HTTP status reported by the Forge, if this error carries one.
    ///
    /// Lets callers branch on 404 without string-matching error text.
    #[must_use]
    pub fn forge_status(&self) -> Option<u16> {
        match self {
            Self::GitHub(err) => match err.as_ref() {
                octocrab::Error::GitHub { source, .. } => Some(source.status_code.as_u16()),
                _ => None,
            },
            Self::NotFound => Some(404),
            _ => None,
        }
    }
}

impl From<octocrab::Error> for Error {
    fn from(err: octocrab::Error) -> Self {
        Self::GitHub(Box::new(err))
    }
}
