//! Repository access decisions.
//!
//! The decision tree for "may this CI job touch this repository", ordered so
//! the cheap and common cases resolve first:
//!
//! 1. Buildkite plugin repos (`*-buildkite-plugin`) are public build-time
//!    dependencies — allow without any remote call.
//! 2. A pipeline may always access its own source repository — one Buildkite
//!    round-trip.
//! 3. Anything else requires the *destination* repository to opt in via a
//!    `gitops.yaml` naming the pipeline's repository — one Forge round-trip,
//!    and the only step that consults an external policy document.
//!
//! A missing manifest is a deny; a missing Forge client for the requested
//! host is a server misconfiguration, not a deny.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::gitops::GitOps;
use crate::repo::RepositoryName;
use crate::{Error, Result};

/// Suffix marking a repository as a Buildkite plugin.
const PLUGIN_SUFFIX: &str = "-buildkite-plugin";

/// Path of the opt-in manifest at the destination repository root.
const GITOPS_PATH: &str = "gitops.yaml";

/// Resolves a pipeline to its canonical repository URL.
#[async_trait]
pub trait PipelineSource: Send + Sync {
    /// The repository URL of `organization_slug/pipeline_slug`.
    async fn pipeline_repo(&self, organization_slug: &str, pipeline_slug: &str) -> Result<String>;
}

/// Reads files from repositories on one Forge host.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Contents of `path` at `HEAD` of `org/repo`; [`Error::NotFound`] when
    /// the file or repository does not exist.
    async fn fetch_file(&self, org: &str, repo: &str, path: &str) -> Result<String>;
}

/// The access decision engine.
pub struct Authorizer {
    pipelines: Arc<dyn PipelineSource>,
    forges: HashMap<String, Arc<dyn ManifestSource>>,
}

impl Authorizer {
    /// Build an authorizer over a pipeline source and per-host Forge clients.
    #[must_use]
    pub fn new(
        pipelines: Arc<dyn PipelineSource>,
        forges: HashMap<String, Arc<dyn ManifestSource>>,
    ) -> Self {
        Self { pipelines, forges }
    }

    /// Decide whether the job identified by `(organization_slug,
    /// pipeline_slug)` may access `requested`.
    ///
    /// Returns `Ok(false)` for a policy deny; errors are infrastructure
    /// failures, never denials.
    ///
    /// # Errors
    ///
    /// [`Error::NoForgeForHost`] when the requested host has no configured
    /// App client; upstream errors from the pipeline lookup or manifest
    /// fetch propagate.
    pub async fn allow_repo_access(
        &self,
        organization_slug: &str,
        pipeline_slug: &str,
        requested: &RepositoryName,
    ) -> Result<bool> {
        if requested.repo.ends_with(PLUGIN_SUFFIX) {
            // Always allow access to buildkite plugin repos
            info!(repository = %requested.https(), "permit access to buildkite plugin repo");
            return Ok(true);
        }

        // Check if the requested repo is associated with this pipeline
        let pipeline_repo_url = self
            .pipelines
            .pipeline_repo(organization_slug, pipeline_slug)
            .await?;
        let pipeline_repo = RepositoryName::parse(&pipeline_repo_url)
            .map_err(|e| Error::Upstream(format!("cannot parse repo {pipeline_repo_url}: {e}")))?;

        if pipeline_repo == *requested {
            info!(repository = %requested.https(), "permit access to repo associated with pipeline");
            return Ok(true);
        }

        let forge = self
            .forges
            .get(&requested.host)
            .ok_or_else(|| Error::NoForgeForHost(requested.host.clone()))?;

        // Check if the requested repo has a gitops.yaml pointing back at the
        // pipeline's repo
        let contents = match forge
            .fetch_file(&requested.org, &requested.repo, GITOPS_PATH)
            .await
        {
            Ok(contents) => contents,
            // No opt-in manifest at the destination: deny
            Err(Error::NotFound) => return Ok(false),
            Err(e) => return Err(e),
        };

        let gitops = GitOps::from_str(&contents).map_err(|e| {
            Error::Upstream(format!(
                "cannot parse gitops.yaml in {}: {e}",
                requested.https()
            ))
        })?;

        let permitted = gitops.repository_permitted(&pipeline_repo);
        if permitted {
            info!(repository = %requested.https(), "permit access per gitops.yaml");
        }
        Ok(permitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn repo(host: &str, org: &str, name: &str) -> RepositoryName {
        RepositoryName {
            host: host.to_string(),
            org: org.to_string(),
            repo: name.to_string(),
        }
    }

    /// Pipeline source returning a fixed URL and counting lookups.
    struct FixedPipeline {
        url: String,
        calls: AtomicUsize,
    }

    impl FixedPipeline {
        fn new(url: &str) -> Arc<Self> {
            Arc::new(Self {
                url: url.to_string(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PipelineSource for FixedPipeline {
        async fn pipeline_repo(&self, _org: &str, _pipeline: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.url.clone())
        }
    }

    /// Manifest source serving one fixed response for every repo.
    struct FixedManifest {
        response: std::result::Result<String, u16>,
        calls: AtomicUsize,
    }

    impl FixedManifest {
        fn yaml(contents: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(contents.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn status(code: u16) -> Arc<Self> {
            Arc::new(Self {
                response: Err(code),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ManifestSource for FixedManifest {
        async fn fetch_file(&self, _org: &str, _repo: &str, _path: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Ok(contents) => Ok(contents.clone()),
                Err(404) => Err(Error::NotFound),
                Err(code) => Err(Error::Upstream(format!("status {code}"))),
            }
        }
    }

    fn authorizer(
        pipeline: &Arc<FixedPipeline>,
        manifest: Option<&Arc<FixedManifest>>,
    ) -> Authorizer {
        let mut forges: HashMap<String, Arc<dyn ManifestSource>> = HashMap::new();
        if let Some(m) = manifest {
            let source: Arc<dyn ManifestSource> = Arc::clone(m) as Arc<dyn ManifestSource>;
            forges.insert("github.com".to_string(), source);
        }
        let pipelines: Arc<dyn PipelineSource> = Arc::clone(pipeline) as Arc<dyn PipelineSource>;
        Authorizer::new(pipelines, forges)
    }

    #[tokio::test]
    async fn plugin_repo_allowed_without_any_lookup() {
        let pipeline = FixedPipeline::new("https://github.com/acme/web.git");
        let manifest = FixedManifest::status(404);
        let auth = authorizer(&pipeline, Some(&manifest));

        let allowed = auth
            .allow_repo_access("acme", "web", &repo("github.com", "acme", "foo-buildkite-plugin"))
            .await
            .unwrap();

        assert!(allowed);
        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 0);
        assert_eq!(manifest.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pipeline_own_repo_allowed_without_manifest_lookup() {
        let pipeline = FixedPipeline::new("https://github.com/acme/web.git");
        let manifest = FixedManifest::status(404);
        let auth = authorizer(&pipeline, Some(&manifest));

        let allowed = auth
            .allow_repo_access("acme", "web", &repo("github.com", "acme", "web"))
            .await
            .unwrap();

        assert!(allowed);
        assert_eq!(pipeline.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manifest.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn self_reference_matches_ssh_url_form() {
        // Buildkite reports the SSH URL; the request carries the https form.
        // Both parse to the same triple.
        let pipeline = FixedPipeline::new("git@github.com:acme/web.git");
        let auth = authorizer(&pipeline, None);

        let allowed = auth
            .allow_repo_access("acme", "web", &repo("github.com", "acme", "web"))
            .await
            .unwrap();
        assert!(allowed);
    }

    #[tokio::test]
    async fn missing_forge_client_is_an_error_not_a_deny() {
        let pipeline = FixedPipeline::new("https://github.com/acme/web.git");
        let auth = authorizer(&pipeline, None);

        let err = auth
            .allow_repo_access("acme", "web", &repo("github.com", "acme", "infra"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoForgeForHost(ref host) if host == "github.com"));
    }

    #[tokio::test]
    async fn manifest_permits_pipeline_repo() {
        let pipeline = FixedPipeline::new("https://github.com/acme/web.git");
        let manifest = FixedManifest::yaml("repos:\n  - acme/*\n");
        let auth = authorizer(&pipeline, Some(&manifest));

        let allowed = auth
            .allow_repo_access("acme", "web", &repo("github.com", "acme", "infra"))
            .await
            .unwrap();
        assert!(allowed);
        assert_eq!(manifest.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn manifest_not_listing_pipeline_repo_denies() {
        let pipeline = FixedPipeline::new("https://github.com/acme/web.git");
        let manifest = FixedManifest::yaml("repos:\n  - acme/deployer\n");
        let auth = authorizer(&pipeline, Some(&manifest));

        let allowed = auth
            .allow_repo_access("acme", "web", &repo("github.com", "acme", "infra"))
            .await
            .unwrap();
        assert!(!allowed);
    }

    #[tokio::test]
    async fn missing_manifest_denies() {
        let pipeline = FixedPipeline::new("https://github.com/acme/web.git");
        let manifest = FixedManifest::status(404);
        let auth = authorizer(&pipeline, Some(&manifest));

        let allowed = auth
            .allow_repo_access("acme", "web", &repo("github.com", "acme", "infra"))
            .await
            .unwrap();
        assert!(!allowed);
    }

    #[tokio::test]
    async fn manifest_fetch_failure_propagates() {
        let pipeline = FixedPipeline::new("https://github.com/acme/web.git");
        let manifest = FixedManifest::status(500);
        let auth = authorizer(&pipeline, Some(&manifest));

        let err = auth
            .allow_repo_access("acme", "web", &repo("github.com", "acme", "infra"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream(_)));
    }

    #[tokio::test]
    async fn unparseable_manifest_is_an_error_naming_the_repo() {
        let pipeline = FixedPipeline::new("https://github.com/acme/web.git");
        let manifest = FixedManifest::yaml("repos:\n  - justonesegment\n");
        let auth = authorizer(&pipeline, Some(&manifest));

        let err = auth
            .allow_repo_access("acme", "web", &repo("github.com", "acme", "infra"))
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("cannot parse gitops.yaml in https://github.com/acme/infra.git"));
    }

    #[tokio::test]
    async fn plugin_suffix_is_a_literal_test_not_a_glob() {
        let pipeline = FixedPipeline::new("https://github.com/acme/web.git");
        let manifest = FixedManifest::status(404);
        let auth = authorizer(&pipeline, Some(&manifest));

        // Similar but not the exact suffix: falls through to the manifest
        // lookup and gets denied
        let allowed = auth
            .allow_repo_access("acme", "web", &repo("github.com", "acme", "foo-buildkite-plugins"))
            .await
            .unwrap();
        assert!(!allowed);
    }
}
