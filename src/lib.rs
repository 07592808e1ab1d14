//! Buildkite OIDC → GitHub token broker.
//!
//! A CI job presents its signed OIDC assertion; the broker verifies it
//! against the Buildkite JWKS, decides per requested repository whether the
//! job may touch it (plugin repos are free, a pipeline owns its own repo,
//! everything else needs a `gitops.yaml` opt-in at the destination), and
//! mints a GitHub App installation token scoped to exactly the requested
//! repositories and access level.
//!
//! The broker is stateless beyond in-memory caches: the JWKS key set and a
//! per-organization installation-client cache. Tokens are returned, never
//! stored.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod authorizer;
pub mod buildkite;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod forge;
pub mod gitcredentials;
pub mod gitops;
pub mod jwks;
pub mod metrics;
pub mod oidc;
pub mod repo;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
