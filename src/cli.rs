//! Command-line interface definitions for the broker server binary.

use std::path::PathBuf;

use clap::Parser;

/// Exchange Buildkite OIDC job tokens for scoped GitHub App installation tokens
///
/// A CI job posts its OIDC assertion to `/token` together with the
/// repositories it wants to touch; the broker verifies the assertion,
/// authorizes each repository, and returns a short-lived installation token.
#[derive(Parser, Debug)]
#[command(name = "github-token-broker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the broker configuration file (YAML)
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Minimum log level: trace, debug, info, warn, or error
    #[arg(long, env = "LOG_LEVEL", default_value = "debug")]
    pub log_level: String,

    /// Log output format: "text" for human-readable, "json" for structured
    #[arg(long, env = "LOG_FORMAT")]
    pub log_format: Option<String>,
}
