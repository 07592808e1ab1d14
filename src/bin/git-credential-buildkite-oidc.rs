//! git credential helper backed by the token broker.
//!
//! Only the `get` operation does anything; `store` and `erase` are silently
//! ignored per the git credential-helper contract, which also reserves room
//! for future operations by having unknown helpers ignore them.

use std::io::BufReader;
use std::process::ExitCode;

use github_token_broker::api::{AccessLevel, TokenRequest};
use github_token_broker::client::{request_oidc_token, BrokerClient};
use github_token_broker::gitcredentials::{
    CredentialAction, CredentialRequest, CredentialResponse,
};
use github_token_broker::repo::RepositoryName;

/// Broker endpoint; the helper runs next to the agent on the build host.
const SERVER_URL: &str = "http://localhost:8080";

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let action = match CredentialAction::from_args(&args) {
        Ok(action) => action,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match action {
        CredentialAction::Get => issue_github_token().await,
        CredentialAction::Store | CredentialAction::Erase => {
            eprintln!("ignoring action {action}");
            ExitCode::SUCCESS
        }
    }
}

async fn issue_github_token() -> ExitCode {
    let options = match CredentialRequest::read_from(BufReader::new(std::io::stdin())) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("unable to process git-credentials input: {e}");
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "requesting access for: protocol={}, host={}, path={}",
        options.protocol, options.host, options.path
    );

    if !options.protocol.starts_with("http") {
        eprintln!(
            "only http and https protocols are supported, not {}",
            options.protocol
        );
        return ExitCode::FAILURE;
    }
    if options.host.is_empty() {
        eprintln!("git-credentials did not pass `host` field");
        return ExitCode::FAILURE;
    }
    if options.path.is_empty() {
        eprintln!("git-credentials did not pass `path` field - is `useHttpPath` set?");
        return ExitCode::FAILURE;
    }

    let repo_uri = format!("{}://{}/{}", options.protocol, options.host, options.path);
    let repo = match RepositoryName::parse(&repo_uri) {
        Ok(repo) => repo,
        Err(e) => {
            eprintln!("cannot process repo {repo_uri}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let oidc_token = match request_oidc_token().await {
        Ok(token) => token,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let request = TokenRequest {
        repositories: vec![repo],
        access_level: AccessLevel::Write,
    };

    let client = BrokerClient::new(SERVER_URL);
    let response = match client.get_token(&request, &oidc_token).await {
        Ok(Ok(response)) => response,
        Ok(Err(server_error)) => {
            eprintln!("server returned error");
            if let Some(body) = &server_error.error {
                eprintln!("server request ID: {}", body.request_id);
                eprintln!("server message: {}", body.message);
            } else {
                eprintln!("{server_error}");
            }
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("cannot get github access token: {e}");
            return ExitCode::FAILURE;
        }
    };

    eprintln!("server request ID: {}", response.request_id);
    eprintln!("token expires at: {}", response.expires_at);

    let output = CredentialResponse {
        username: "x-access-token".to_string(),
        password: response.token,
        quit: true,
    };
    if let Err(e) = output.write_to(&mut std::io::stdout()) {
        eprintln!("cannot write credential response: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
