//! Repository reference parsing and matching.
//!
//! A [`RepositoryName`] is the `(host, org, repo)` triple behind every URL
//! shape git users throw around: `https://` URLs, `git@host:org/repo` SSH
//! shorthand, bare `host/org/repo`, and plain `org/repo`. Org and repo parts
//! may carry glob patterns (`myorg/*`); hosts never match by glob.

use std::fmt;
use std::str::FromStr;

use globset::Glob;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::{Error, Result};

/// Host assumed when a reference does not name one.
const DEFAULT_HOST: &str = "github.com";

/// A fully qualified repository reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryName {
    /// Git host, e.g. `github.com` or an enterprise hostname
    pub host: String,
    /// Organization or user account
    pub org: String,
    /// Repository name (may be a glob pattern in manifest context)
    pub repo: String,
}

impl RepositoryName {
    /// Parse a repository reference from nearly any git URL shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRepository`] when fewer than two path segments
    /// remain after parsing, or when a segment is empty.
    pub fn parse(reference: &str) -> Result<Self> {
        let mut input = reference.to_string();
        if input.matches('/').count() == 2 && !input.contains("://") {
            // Hostname, org, and repo with no protocol part. Add https so the
            // URL parser picks up the host.
            input = format!("https://{input}");
        }

        let (host, path) = split_host_path(&input)?;

        let mut parts = path.trim_start_matches('/').splitn(3, '/');
        let org = parts.next().unwrap_or_default();
        let repo = parts.next().ok_or(Error::InvalidRepository)?;
        let repo = repo.strip_suffix(".git").unwrap_or(repo);

        if org.is_empty() || repo.is_empty() {
            return Err(Error::InvalidRepository);
        }

        let host = if host.is_empty() {
            DEFAULT_HOST.to_string()
        } else {
            host
        };

        Ok(Self {
            host,
            org: org.to_string(),
            repo: repo.to_string(),
        })
    }

    /// Full `https://` URI for the repository.
    #[must_use]
    pub fn https(&self) -> String {
        format!("https://{}/{}/{}.git", self.host, self.org, self.repo)
    }

    /// Full `git@` style SSH URI for the repository.
    #[must_use]
    pub fn git(&self) -> String {
        format!("git@{}:{}/{}.git", self.host, self.org, self.repo)
    }

    /// True when `other` matches this reference treated as a glob pattern.
    ///
    /// `org` and `repo` are compiled as glob patterns and matched against
    /// `other`; the host must be equal literally, so a wildcard host never
    /// matches anything. A pattern that fails to compile matches nothing.
    #[must_use]
    pub fn matches(&self, other: &RepositoryName) -> bool {
        if self.host != other.host {
            // No glob match on host
            return false;
        }

        glob_match(&self.org, &other.org) && glob_match(&self.repo, &other.repo)
    }
}

/// Compile `pattern` as a glob and match it against `value`.
///
/// Compile failures count as no-match rather than an error.
fn glob_match(pattern: &str, value: &str) -> bool {
    match Glob::new(pattern) {
        Ok(glob) => glob.compile_matcher().is_match(value),
        Err(_) => false,
    }
}

/// Split a reference into `(host, path)`, covering URL, scp-style, and bare
/// forms.
fn split_host_path(input: &str) -> Result<(String, String)> {
    if input.contains("://") {
        let url = Url::parse(input).map_err(|_| Error::InvalidRepository)?;
        let host = url.host_str().unwrap_or_default().to_string();
        return Ok((host, url.path().to_string()));
    }

    if let Some((user_host, path)) = input.split_once(':') {
        // scp-style: git@host:org/repo — rewrite to an ssh URL so the parser
        // handles fragments and userinfo uniformly
        let rewritten = format!("ssh://{user_host}/{path}");
        let url = Url::parse(&rewritten).map_err(|_| Error::InvalidRepository)?;
        let host = url.host_str().unwrap_or_default().to_string();
        return Ok((host, url.path().to_string()));
    }

    // Bare org/repo with no host; drop any #ref fragment by hand since there
    // is no URL parser in this path
    let path = input.split('#').next().unwrap_or_default();
    Ok((String::new(), path.to_string()))
}

impl fmt::Display for RepositoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.repo)
    }
}

impl FromStr for RepositoryName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for RepositoryName {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.https())
    }
}

impl<'de> Deserialize<'de> for RepositoryName {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .map_err(|e| serde::de::Error::custom(format!("cannot parse repo {raw}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn name(host: &str, org: &str, repo: &str) -> RepositoryName {
        RepositoryName {
            host: host.to_string(),
            org: org.to_string(),
            repo: repo.to_string(),
        }
    }

    // ── parse ─────────────────────────────────────────────────────────────

    #[test]
    fn parse_accepts_many_url_shapes() {
        let cases = [
            (
                "github.com/myorg/fancy-buildkite-plugin#ab8c2e7",
                name("github.com", "myorg", "fancy-buildkite-plugin"),
            ),
            (
                "ssh://git@ghes.mycompany.com/someorg/docker-buildkite-plugin.git#v1.10.0",
                name("ghes.mycompany.com", "someorg", "docker-buildkite-plugin"),
            ),
            (
                "github.com/myorg/cool-buildkite-plugin",
                name("github.com", "myorg", "cool-buildkite-plugin"),
            ),
            (
                "git@github.com:myorg/podinfo.git",
                name("github.com", "myorg", "podinfo"),
            ),
            (
                "git@github.com:myorg/podinfo",
                name("github.com", "myorg", "podinfo"),
            ),
            (
                "https://github.com/myorg/podinfo.git",
                name("github.com", "myorg", "podinfo"),
            ),
            (
                "https://github.com/myorg/podinfo",
                name("github.com", "myorg", "podinfo"),
            ),
            ("myorg/somerepo", name("github.com", "myorg", "somerepo")),
            (
                "myhost.com/myorg/somerepo",
                name("myhost.com", "myorg", "somerepo"),
            ),
            ("myhost.com/myorg/*", name("myhost.com", "myorg", "*")),
            ("myorg/somerepo.git", name("github.com", "myorg", "somerepo")),
            ("myorg/*", name("github.com", "myorg", "*")),
            ("myorg/myservice*", name("github.com", "myorg", "myservice*")),
            ("*/*", name("github.com", "*", "*")),
            ("myorg/foo-*.git", name("github.com", "myorg", "foo-*")),
            (
                "https://ghes.mycompany.com/myorg/foo-*.git",
                name("ghes.mycompany.com", "myorg", "foo-*"),
            ),
            (
                "https://ghes.mycompany.com/*/*.git",
                name("ghes.mycompany.com", "*", "*"),
            ),
        ];

        for (input, expected) in cases {
            let parsed = RepositoryName::parse(input)
                .unwrap_or_else(|e| panic!("expected {input} to parse: {e}"));
            assert_eq!(parsed, expected, "input: {input}");
        }
    }

    #[test]
    fn parse_rejects_lone_repo() {
        assert!(RepositoryName::parse("somerepo").is_err());
    }

    #[test]
    fn parse_rejects_empty_segments() {
        assert!(RepositoryName::parse("https://github.com//repo").is_err());
        assert!(RepositoryName::parse("").is_err());
    }

    #[test]
    fn parsed_fields_are_never_empty() {
        for input in ["myorg/somerepo", "git@github.com:a/b", "host.com/a/b"] {
            let repo = RepositoryName::parse(input).unwrap();
            assert!(!repo.host.is_empty());
            assert!(!repo.org.is_empty());
            assert!(!repo.repo.is_empty());
            assert!(!repo.repo.ends_with(".git"));
            assert!(!repo.repo.contains('#'));
        }
    }

    // ── round trips ───────────────────────────────────────────────────────

    #[test]
    fn https_round_trip() {
        let repo = name("github.com", "myorg", "podinfo");
        assert_eq!(repo.https(), "https://github.com/myorg/podinfo.git");
        assert_eq!(RepositoryName::parse(&repo.https()).unwrap(), repo);
    }

    #[test]
    fn git_round_trip() {
        let repo = name("ghes.mycompany.com", "someorg", "podinfo");
        assert_eq!(repo.git(), "git@ghes.mycompany.com:someorg/podinfo.git");
        assert_eq!(RepositoryName::parse(&repo.git()).unwrap(), repo);
    }

    #[test]
    fn display_is_org_slash_repo() {
        assert_eq!(name("github.com", "myorg", "podinfo").to_string(), "myorg/podinfo");
    }

    // ── equality ──────────────────────────────────────────────────────────

    #[test]
    fn equality_requires_all_three_fields() {
        let base = name("github.com", "myorg", "somerepo");
        assert_eq!(base, name("github.com", "myorg", "somerepo"));
        assert_ne!(base, name("github.com", "myorg", "otherrepo"));
        assert_ne!(base, name("github.com", "otherorg", "somerepo"));
        assert_ne!(base, name("othergithub.com", "myorg", "somerepo"));
    }

    // ── matches ───────────────────────────────────────────────────────────

    #[test]
    fn matches_wildcard_org_and_repo() {
        let pattern = name("github.com", "*", "*");
        assert!(pattern.matches(&name("github.com", "foobar", "baz")));
    }

    #[test]
    fn matches_rejects_host_wildcard() {
        let pattern = name("*", "*", "*");
        assert!(!pattern.matches(&name("randomhost.com", "foobar", "baz")));
    }

    #[test]
    fn matches_rejects_host_mismatch() {
        let pattern = name("github.com", "*", "*");
        assert!(!pattern.matches(&name("foobargithub.com", "foobar", "baz")));
    }

    #[test]
    fn matches_wildcard_repo_only() {
        let pattern = name("github.com", "twilio", "*");
        assert!(pattern.matches(&name("github.com", "twilio", "baz")));
        assert!(!pattern.matches(&name("github.com", "other", "baz")));
    }

    #[test]
    fn matches_partial_repo_wildcard() {
        let pattern = name("github.com", "twilio", "some-*");
        assert!(pattern.matches(&name("github.com", "twilio", "some-thing")));
        assert!(!pattern.matches(&name("github.com", "twilio", "other-thing")));
    }

    #[test]
    fn matches_without_wildcards_equals_equality() {
        let a = name("github.com", "myorg", "somerepo");
        let b = name("github.com", "myorg", "somerepo");
        let c = name("github.com", "myorg", "otherrepo");
        assert_eq!(a.matches(&b), a == b);
        assert_eq!(a.matches(&c), a == c);
    }

    #[test]
    fn matches_invalid_glob_is_no_match() {
        // '[' opens an unterminated character class
        let pattern = name("github.com", "my[org", "*");
        assert!(!pattern.matches(&name("github.com", "my[org", "repo")));
    }

    // ── serde ─────────────────────────────────────────────────────────────

    #[test]
    fn serializes_as_https_url() {
        let repo = name("github.com", "myorg", "podinfo");
        let json = serde_json::to_string(&repo).unwrap();
        assert_eq!(json, "\"https://github.com/myorg/podinfo.git\"");
    }

    #[test]
    fn deserializes_from_any_shape() {
        let repo: RepositoryName =
            serde_json::from_str("\"git@github.com:myorg/podinfo.git\"").unwrap();
        assert_eq!(repo, name("github.com", "myorg", "podinfo"));
    }

    #[test]
    fn deserialize_error_names_the_input() {
        let err = serde_json::from_str::<RepositoryName>("\"somerepo\"").unwrap_err();
        assert!(err.to_string().contains("cannot parse repo somerepo"));
    }
}
