//! Direct CLI: request a GitHub access token from a running broker.
//!
//! Prints the minted token alone on stdout so it can be captured in scripts;
//! every diagnostic goes to stderr.

use std::process::ExitCode;

use clap::Parser;

use github_token_broker::api::{AccessLevel, TokenRequest};
use github_token_broker::client::{request_oidc_token, BrokerClient};
use github_token_broker::repo::RepositoryName;

/// Request a GitHub access token for one or more repositories
#[derive(Parser, Debug)]
#[command(name = "generate-github-access-token")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Repositories to request access to (comma separated)
    #[arg(long)]
    repositories: Option<String>,

    /// Access level: 'read' or 'write'
    #[arg(long, default_value = "read")]
    access: AccessLevel,

    /// Base URL of the token broker
    #[arg(long, default_value = "http://localhost:8080")]
    server: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let Some(repo_flag) = cli.repositories.filter(|r| !r.is_empty()) else {
        eprintln!("no repositories specified");
        return ExitCode::SUCCESS;
    };

    // Parse and validate input repos; tokens cannot span orgs, so fail
    // before bothering the server
    let mut repositories = Vec::new();
    let mut seen_host_org: Option<String> = None;
    for raw in repo_flag.split(',') {
        let repo = match RepositoryName::parse(raw) {
            Ok(repo) => repo,
            Err(e) => {
                eprintln!("unable to parse repository '{raw}': {e}");
                return ExitCode::FAILURE;
            }
        };
        let host_org = format!("{}/{}", repo.host, repo.org);
        if let Some(previous) = &seen_host_org {
            if previous != &host_org {
                eprintln!(
                    "unable to generate access tokens spanning multiple organizations. Got {host_org}, but already seen {previous}"
                );
                return ExitCode::FAILURE;
            }
        }
        seen_host_org = Some(host_org);
        repositories.push(repo);
    }

    let oidc_token = match request_oidc_token().await {
        Ok(token) => token,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let request = TokenRequest {
        repositories,
        access_level: cli.access,
    };

    let client = BrokerClient::new(&cli.server);
    match client.get_token(&request, &oidc_token).await {
        Ok(Ok(response)) => {
            eprintln!("server request ID: {}", response.request_id);
            eprintln!("token expires at: {}", response.expires_at);
            println!("{}", response.token);
            ExitCode::SUCCESS
        }
        Ok(Err(server_error)) => {
            eprintln!("server returned error");
            if let Some(body) = &server_error.error {
                eprintln!("server request ID: {}", body.request_id);
                eprintln!("server message: {}", body.message);
            } else {
                eprintln!("{server_error}");
            }
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("cannot get github access token: {e}");
            ExitCode::FAILURE
        }
    }
}
