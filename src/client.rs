//! HTTP client for the broker, used by the CLI binaries.
//!
//! Error responses are decoded as [`HttpError`] when possible so callers can
//! surface the server's request id and message; anything else is reported
//! with the raw status and body.

use reqwest::StatusCode;

use crate::api::{HttpError, TokenRequest, TokenResponse};
use crate::{Error, Result};

/// Header carrying the CI job's OIDC assertion.
const OIDC_TOKEN_HEADER: &str = "X-Buildkite-OIDC-Token";

/// Client for the broker's `/token` endpoint.
pub struct BrokerClient {
    server_url: String,
    http: reqwest::Client,
}

/// Outcome of a token request that the server answered with an error.
#[derive(Debug)]
pub struct ServerError {
    /// HTTP status the server returned
    pub status: StatusCode,
    /// Decoded error body, when the server sent one
    pub error: Option<HttpError>,
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error {
            Some(err) => write!(f, "token server responded with {}: {}", self.status, err.message),
            None => write!(f, "token server responded with {}", self.status),
        }
    }
}

impl BrokerClient {
    /// Build a client against a broker base URL, e.g. `http://localhost:8080`.
    #[must_use]
    pub fn new(server_url: &str) -> Self {
        Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Request a token for `request`, authenticating with `oidc_token`.
    ///
    /// # Errors
    ///
    /// Transport failures surface as [`Error::Http`]; server-side rejections
    /// come back as `Ok(Err(ServerError))` so callers can distinguish them.
    pub async fn get_token(
        &self,
        request: &TokenRequest,
        oidc_token: &str,
    ) -> Result<std::result::Result<TokenResponse, ServerError>> {
        let response = self
            .http
            .post(format!("{}/token", self.server_url))
            .header(OIDC_TOKEN_HEADER, format!("Bearer {oidc_token}"))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let error = serde_json::from_slice::<HttpError>(&body).ok();
            return Ok(Err(ServerError { status, error }));
        }

        let token: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::Internal(format!("cannot process server response: {e}")))?;
        Ok(Ok(token))
    }
}

/// Obtain an OIDC token by invoking the Buildkite agent.
///
/// The agent API for this is not publicly documented, so shelling out to
/// `buildkite-agent oidc request-token` is the supported path.
///
/// # Errors
///
/// Fails when the agent binary is missing or exits non-zero; stderr is
/// included in the message.
pub async fn request_oidc_token() -> Result<String> {
    let output = tokio::process::Command::new("buildkite-agent")
        .args(["oidc", "request-token"])
        .output()
        .await
        .map_err(|e| Error::Internal(format!("cannot get buildkite OIDC token: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Internal(format!(
            "cannot get buildkite OIDC token: {}",
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
