//! `gitops.yaml` manifest parsing.
//!
//! A destination repository opts into receiving pushes from CI by carrying a
//! `gitops.yaml` at its root listing the source repositories allowed to write
//! to it. Entries are matched with [`RepositoryName::matches`], so
//! `myorg/*` permits every repository in `myorg` on the same host.

use serde::Deserialize;

use crate::repo::RepositoryName;
use crate::Result;

/// Parsed `gitops.yaml` manifest of a destination repository.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawGitOps")]
pub struct GitOps {
    /// Destinations declared as requiring a manifest. Parsed and retained,
    /// not consulted when authorizing.
    pub protected_destinations: Vec<String>,
    /// Source repositories (glob patterns allowed) permitted to write here.
    pub repositories: Vec<RepositoryName>,
}

#[derive(Debug, Deserialize)]
struct RawGitOps {
    #[serde(default, rename = "protectedDestinations")]
    protected_destinations: Vec<String>,
    #[serde(default, rename = "repos")]
    repositories: Vec<String>,
}

impl TryFrom<RawGitOps> for GitOps {
    type Error = String;

    fn try_from(raw: RawGitOps) -> std::result::Result<Self, Self::Error> {
        let mut repositories = Vec::with_capacity(raw.repositories.len());
        for entry in raw.repositories {
            let repo = RepositoryName::parse(&entry)
                .map_err(|e| format!("cannot parse repo {entry}: {e}"))?;
            repositories.push(repo);
        }
        Ok(Self {
            protected_destinations: raw.protected_destinations,
            repositories,
        })
    }
}

impl GitOps {
    /// Parse a manifest from raw YAML contents.
    ///
    /// # Errors
    ///
    /// Fails when the YAML is malformed or any `repos` entry does not parse
    /// as a repository reference.
    pub fn from_str(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// True when `repo` matches any entry in the permitted list.
    #[must_use]
    pub fn repository_permitted(&self, repo: &RepositoryName) -> bool {
        self.repositories.iter().any(|r| r.matches(repo))
    }
}
