//! End-to-end authorization flow tests.
//!
//! Drives the decision tree through the public API with fake Buildkite and
//! Forge backends, covering the three allow paths (plugin, self-reference,
//! manifest) and the deny/error paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use github_token_broker::authorizer::{Authorizer, ManifestSource, PipelineSource};
use github_token_broker::repo::RepositoryName;
use github_token_broker::{Error, Result};

fn repo(reference: &str) -> RepositoryName {
    RepositoryName::parse(reference).unwrap()
}

/// Fake Buildkite: one org/pipeline with a known repository.
struct FakeBuildkite {
    org: &'static str,
    pipeline: &'static str,
    repo_url: &'static str,
    calls: AtomicUsize,
}

impl FakeBuildkite {
    fn new(org: &'static str, pipeline: &'static str, repo_url: &'static str) -> Arc<Self> {
        Arc::new(Self {
            org,
            pipeline,
            repo_url,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl PipelineSource for FakeBuildkite {
    async fn pipeline_repo(&self, organization_slug: &str, pipeline_slug: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if organization_slug == self.org && pipeline_slug == self.pipeline {
            Ok(self.repo_url.to_string())
        } else {
            Err(Error::PipelineNotFound(format!(
                "{organization_slug}/{pipeline_slug}"
            )))
        }
    }
}

/// Fake Forge: a map of `org/repo` → gitops.yaml contents.
struct FakeForge {
    manifests: HashMap<String, String>,
    calls: AtomicUsize,
}

impl FakeForge {
    fn new(manifests: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            manifests: manifests
                .iter()
                .map(|(repo, yaml)| ((*repo).to_string(), (*yaml).to_string()))
                .collect(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ManifestSource for FakeForge {
    async fn fetch_file(&self, org: &str, repo: &str, _path: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.manifests
            .get(&format!("{org}/{repo}"))
            .cloned()
            .ok_or(Error::NotFound)
    }
}

fn build_authorizer(
    buildkite: &Arc<FakeBuildkite>,
    forge: &Arc<FakeForge>,
    host: &str,
) -> Authorizer {
    let mut forges: HashMap<String, Arc<dyn ManifestSource>> = HashMap::new();
    let source: Arc<dyn ManifestSource> = Arc::clone(forge) as Arc<dyn ManifestSource>;
    forges.insert(host.to_string(), source);
    let pipelines: Arc<dyn PipelineSource> = Arc::clone(buildkite) as Arc<dyn PipelineSource>;
    Authorizer::new(pipelines, forges)
}

#[tokio::test]
async fn pipeline_gets_access_to_its_own_repository() {
    let buildkite = FakeBuildkite::new("acme", "web", "https://github.com/acme/web.git");
    let forge = FakeForge::new(&[]);
    let authorizer = build_authorizer(&buildkite, &forge, "github.com");

    let allowed = authorizer
        .allow_repo_access("acme", "web", &repo("github.com/acme/web"))
        .await
        .unwrap();

    assert!(allowed);
    assert_eq!(forge.calls.load(Ordering::SeqCst), 0, "no manifest lookup");
}

#[tokio::test]
async fn plugin_repository_skips_all_lookups() {
    let buildkite = FakeBuildkite::new("acme", "web", "https://github.com/acme/web.git");
    let forge = FakeForge::new(&[]);
    let authorizer = build_authorizer(&buildkite, &forge, "github.com");

    let allowed = authorizer
        .allow_repo_access("acme", "web", &repo("github.com/acme/foo-buildkite-plugin"))
        .await
        .unwrap();

    assert!(allowed);
    assert_eq!(buildkite.calls.load(Ordering::SeqCst), 0);
    assert_eq!(forge.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn manifest_with_org_glob_permits_sibling_repo() {
    let buildkite = FakeBuildkite::new("acme", "web", "https://github.com/acme/web.git");
    let forge = FakeForge::new(&[("acme/infra", "repos:\n  - acme/*\n")]);
    let authorizer = build_authorizer(&buildkite, &forge, "github.com");

    let allowed = authorizer
        .allow_repo_access("acme", "web", &repo("github.com/acme/infra"))
        .await
        .unwrap();

    assert!(allowed);
    assert_eq!(forge.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn repository_without_manifest_is_denied() {
    let buildkite = FakeBuildkite::new("acme", "web", "https://github.com/acme/web.git");
    let forge = FakeForge::new(&[]);
    let authorizer = build_authorizer(&buildkite, &forge, "github.com");

    let allowed = authorizer
        .allow_repo_access("acme", "web", &repo("github.com/acme/infra"))
        .await
        .unwrap();

    assert!(!allowed);
}

#[tokio::test]
async fn manifest_naming_other_sources_denies_this_pipeline() {
    let buildkite = FakeBuildkite::new("acme", "web", "https://github.com/acme/web.git");
    let forge = FakeForge::new(&[("acme/infra", "repos:\n  - acme/deploy-bot\n")]);
    let authorizer = build_authorizer(&buildkite, &forge, "github.com");

    let allowed = authorizer
        .allow_repo_access("acme", "web", &repo("github.com/acme/infra"))
        .await
        .unwrap();

    assert!(!allowed);
}

#[tokio::test]
async fn unknown_pipeline_propagates_as_error() {
    let buildkite = FakeBuildkite::new("acme", "web", "https://github.com/acme/web.git");
    let forge = FakeForge::new(&[]);
    let authorizer = build_authorizer(&buildkite, &forge, "github.com");

    let err = authorizer
        .allow_repo_access("acme", "missing-pipeline", &repo("github.com/acme/infra"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::PipelineNotFound(_)));
}

#[tokio::test]
async fn host_without_forge_client_errors_rather_than_denies() {
    let buildkite = FakeBuildkite::new("acme", "web", "https://github.com/acme/web.git");
    let forge = FakeForge::new(&[("acme/infra", "repos:\n  - acme/*\n")]);
    // Forge client registered for the wrong host
    let authorizer = build_authorizer(&buildkite, &forge, "ghes.mycompany.com");

    let err = authorizer
        .allow_repo_access("acme", "web", &repo("github.com/acme/infra"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NoForgeForHost(ref host) if host == "github.com"));
}

#[tokio::test]
async fn manifest_on_enterprise_host_cannot_trust_github_com_sources() {
    // The pipeline builds on github.com; the destination lives on GHES and
    // its manifest lists the same org/repo pattern. Hosts differ, so the
    // glob must not match.
    let buildkite = FakeBuildkite::new("acme", "web", "https://github.com/acme/web.git");
    let forge = FakeForge::new(&[("acme/infra", "repos:\n  - acme/*\n")]);
    let authorizer = build_authorizer(&buildkite, &forge, "ghes.mycompany.com");

    let allowed = authorizer
        .allow_repo_access("acme", "web", &repo("ghes.mycompany.com/acme/infra"))
        .await
        .unwrap();

    assert!(!allowed);
}

#[tokio::test]
async fn manifest_entry_with_explicit_enterprise_host_permits() {
    let buildkite = FakeBuildkite::new(
        "acme",
        "web",
        "ssh://git@ghes.mycompany.com/acme/web.git",
    );
    let forge = FakeForge::new(&[(
        "acme/infra",
        "repos:\n  - ghes.mycompany.com/acme/web\n",
    )]);
    let authorizer = build_authorizer(&buildkite, &forge, "ghes.mycompany.com");

    let allowed = authorizer
        .allow_repo_access("acme", "web", &repo("ghes.mycompany.com/acme/infra"))
        .await
        .unwrap();

    assert!(allowed);
}
