//! Wire types shared by the `/token` endpoint and its clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::repo::RepositoryName;

/// Access level a CI job requests for the listed repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// Read-only access
    #[default]
    Read,
    /// Read-write access
    Write,
}

impl AccessLevel {
    /// The permission string GitHub expects (`"read"` / `"write"`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            other => Err(format!("access level must be 'read' or 'write', not '{other}'")),
        }
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a `POST /token` request.
///
/// Deserialization parses every repository string; one bad reference fails
/// the whole decode. A missing `access_level` defaults to read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    /// Repositories the job wants a token for
    pub repositories: Vec<RepositoryName>,
    /// Requested access level
    #[serde(default)]
    pub access_level: AccessLevel,
}

/// Body of a successful `POST /token` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The minted installation token
    pub token: String,
    /// Server-reported token expiry
    pub expires_at: DateTime<Utc>,
    /// Request id, for log correlation
    #[serde(rename = "req_id")]
    pub request_id: String,
}

/// JSON body of every error response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpError {
    /// Input field the error relates to, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Human-readable message
    pub message: String,
    /// Request id, for log correlation
    #[serde(default, rename = "req_id")]
    pub request_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn token_request_parses_repositories() {
        let body = r#"{"repositories": ["github.com/myorg/app", "git@github.com:myorg/tools.git"], "access_level": "write"}"#;
        let req: TokenRequest = serde_json::from_str(body).unwrap();

        assert_eq!(req.access_level, AccessLevel::Write);
        assert_eq!(req.repositories.len(), 2);
        assert_eq!(req.repositories[0].org, "myorg");
        assert_eq!(req.repositories[1].repo, "tools");
    }

    #[test]
    fn access_level_defaults_to_read() {
        let body = r#"{"repositories": ["myorg/app"]}"#;
        let req: TokenRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.access_level, AccessLevel::Read);
    }

    #[test]
    fn bad_repository_fails_the_decode() {
        let body = r#"{"repositories": ["notarepo"]}"#;
        let err = serde_json::from_str::<TokenRequest>(body).unwrap_err();
        assert!(err.to_string().contains("cannot parse repo notarepo"));
    }

    #[test]
    fn token_request_serializes_repositories_as_https() {
        let req = TokenRequest {
            repositories: vec![RepositoryName {
                host: "github.com".into(),
                org: "myorg".into(),
                repo: "app".into(),
            }],
            access_level: AccessLevel::Read,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("https://github.com/myorg/app.git"));
        assert!(json.contains("\"access_level\":\"read\""));
    }

    #[test]
    fn http_error_omits_empty_field() {
        let err = HttpError {
            field: None,
            message: "invalid token".into(),
            request_id: "abc".into(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, r#"{"message":"invalid token","req_id":"abc"}"#);
    }

    #[test]
    fn token_response_round_trips() {
        let json = r#"{"token":"ghs_xyz","expires_at":"2023-05-01T10:00:00Z","req_id":"r1"}"#;
        let resp: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.token, "ghs_xyz");
        assert_eq!(resp.request_id, "r1");

        let back = serde_json::to_string(&resp).unwrap();
        let again: TokenResponse = serde_json::from_str(&back).unwrap();
        assert_eq!(again.token, resp.token);
        assert_eq!(again.expires_at, resp.expires_at);
    }

    #[test]
    fn access_level_from_str() {
        assert_eq!("read".parse::<AccessLevel>().unwrap(), AccessLevel::Read);
        assert_eq!("write".parse::<AccessLevel>().unwrap(), AccessLevel::Write);
        assert!("admin".parse::<AccessLevel>().is_err());
    }
}
