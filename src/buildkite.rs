//! Buildkite GraphQL client.
//!
//! The broker asks Buildkite exactly one question: which repository does a
//! given pipeline build? One fixed query, posted to the GraphQL endpoint with
//! the process-wide API token.

use serde::Deserialize;
use serde_json::json;

use crate::authorizer::PipelineSource;
use crate::{Error, Result};

/// Buildkite GraphQL API endpoint.
const GRAPHQL_ENDPOINT: &str = "https://graphql.buildkite.com/v1";

const PIPELINE_REPO_QUERY: &str =
    "query($slug: ID!) { pipeline(slug: $slug) { repository { url } } }";

/// Client for the Buildkite GraphQL API.
pub struct Client {
    endpoint: String,
    token: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<PipelineData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct PipelineData {
    pipeline: Option<Pipeline>,
}

#[derive(Debug, Deserialize)]
struct Pipeline {
    repository: Option<Repository>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    url: Option<String>,
}

impl Client {
    /// Build a client using a Buildkite API token with GraphQL access.
    #[must_use]
    pub fn new(token: &str) -> Self {
        Self::with_endpoint(token, GRAPHQL_ENDPOINT)
    }

    /// Build a client against a non-default endpoint.
    #[must_use]
    pub fn with_endpoint(token: &str, endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            token: token.to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// The canonical repository URL of a pipeline.
    ///
    /// # Errors
    ///
    /// [`Error::PipelineNotFound`] when Buildkite reports no such pipeline;
    /// [`Error::Upstream`] on transport or GraphQL failures.
    pub async fn get_pipeline_repo(
        &self,
        organization_slug: &str,
        pipeline_slug: &str,
    ) -> Result<String> {
        let slug = format!("{organization_slug}/{pipeline_slug}");

        let body = json!({
            "query": PIPELINE_REPO_QUERY,
            "variables": { "slug": slug },
        });

        let response: GraphQlResponse = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| upstream(&slug, &e.to_string()))?
            .error_for_status()
            .map_err(|e| upstream(&slug, &e.to_string()))?
            .json()
            .await
            .map_err(|e| upstream(&slug, &e.to_string()))?;

        if let Some(err) = response.errors.first() {
            return Err(upstream(&slug, &err.message));
        }

        response
            .data
            .and_then(|d| d.pipeline)
            .and_then(|p| p.repository)
            .and_then(|r| r.url)
            .ok_or(Error::PipelineNotFound(slug))
    }
}

fn upstream(slug: &str, detail: &str) -> Error {
    Error::Upstream(format!(
        "error fetching pipeline repo from Buildkite for {slug}: {detail}"
    ))
}

#[async_trait::async_trait]
impl PipelineSource for Client {
    async fn pipeline_repo(&self, organization_slug: &str, pipeline_slug: &str) -> Result<String> {
        self.get_pipeline_repo(organization_slug, pipeline_slug)
            .await
    }
}
