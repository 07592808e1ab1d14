//! HTTP router and handlers.
//!
//! Two routes: `POST /token` runs the verify → authorize → mint pipeline,
//! `GET /metrics` serves the Prometheus exposition. Everything else is
//! middleware (see [`super::envelope`]).

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use tracing::{error, info, Instrument};

use super::envelope::{
    default_json_content_type, recover_panics, request_context, track_metrics, EndpointLabel,
    RequestId,
};
use crate::api::{HttpError, TokenRequest, TokenResponse};
use crate::authorizer::Authorizer;
use crate::config::Config;
use crate::forge::{AppClient, TokenPermissions};
use crate::jwks::JwksCache;
use crate::metrics::Metrics;
use crate::oidc;

/// Header carrying the CI job's OIDC assertion.
const OIDC_TOKEN_HEADER: &str = "x-buildkite-oidc-token";

/// Shared application state
pub struct AppState {
    /// Loaded configuration
    pub config: Config,
    /// CI signing keys
    pub jwks: Arc<JwksCache>,
    /// Access decision engine
    pub authorizer: Authorizer,
    /// Token-minting clients by Forge host
    pub forges: HashMap<String, Arc<AppClient>>,
    /// Request metrics registry
    pub metrics: Arc<Metrics>,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let token_label = EndpointLabel {
        metrics: Arc::clone(&state.metrics),
        name: "token",
    };
    let metrics_label = EndpointLabel {
        metrics: Arc::clone(&state.metrics),
        name: "metrics",
    };

    Router::new()
        .route(
            "/token",
            post(token_handler)
                .route_layer(middleware::from_fn_with_state(token_label, track_metrics)),
        )
        .route(
            "/metrics",
            get(metrics_handler)
                .route_layer(middleware::from_fn_with_state(metrics_label, track_metrics)),
        )
        // Layer order: the last layer is outermost
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            request_context,
        ))
        .layer(middleware::from_fn(default_json_content_type))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            recover_panics,
        ))
        .with_state(state)
}

/// `POST /token` — exchange a verified OIDC assertion for an installation
/// token scoped to the requested repositories.
async fn token_handler(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(req_id)): Extension<RequestId>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let input: TokenRequest = match serde_json::from_slice(&body) {
        Ok(input) => input,
        Err(e) => {
            return error_response(
                &req_id,
                StatusCode::BAD_REQUEST,
                "cannot read input",
                Some(&e.to_string()),
            );
        }
    };
    if input.repositories.is_empty() {
        return error_response(
            &req_id,
            StatusCode::BAD_REQUEST,
            "must supply at least one repository",
            None,
        );
    }

    let keyset = state.jwks.get();

    let Some(bearer) = extract_bearer(&headers) else {
        return error_response(&req_id, StatusCode::FORBIDDEN, "invalid token", None);
    };

    // Signature, exp, nbf, audience, and issuer are all enforced here
    let claims = match oidc::verify(
        &bearer,
        &keyset,
        &state.config.oidc.audience,
        &state.config.oidc.issuer,
    ) {
        Ok(claims) => claims,
        Err(e) => {
            return error_response(
                &req_id,
                StatusCode::FORBIDDEN,
                "cannot verify token",
                Some(&e.to_string()),
            );
        }
    };

    let Some(job_id) = claims.job_id else {
        return error_response(&req_id, StatusCode::BAD_REQUEST, "missing job_id", None);
    };
    let Some(organization_slug) = claims.organization_slug else {
        return error_response(
            &req_id,
            StatusCode::BAD_REQUEST,
            "missing organization_id",
            None,
        );
    };
    let Some(pipeline_slug) = claims.pipeline_slug else {
        return error_response(&req_id, StatusCode::BAD_REQUEST, "missing pipeline_slug", None);
    };

    let repositories: Vec<String> = input.repositories.iter().map(|r| r.https()).collect();
    let span = tracing::info_span!(
        "token_request",
        job_id = %job_id,
        organization_slug = %organization_slug,
        pipeline_slug = %pipeline_slug,
        repositories = ?repositories,
    );

    let outcome = authorize_and_mint(&state, &input, &organization_slug, &pipeline_slug)
        .instrument(span)
        .await;

    match outcome {
        Ok((token, expires_at)) => {
            let response = TokenResponse {
                token,
                expires_at,
                request_id: req_id,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(reply) => error_response(&req_id, reply.status, &reply.message, reply.detail.as_deref()),
    }
}

/// What a failed `/token` request tells the client vs. the log.
struct ErrorReply {
    status: StatusCode,
    message: String,
    /// Upstream detail, logged but never exposed
    detail: Option<String>,
}

/// Authorize every requested repository, then mint one scoped token.
async fn authorize_and_mint(
    state: &AppState,
    input: &TokenRequest,
    organization_slug: &str,
    pipeline_slug: &str,
) -> Result<(String, chrono::DateTime<chrono::Utc>), ErrorReply> {
    info!(access_level = %input.access_level, "processing token request");

    for repo in &input.repositories {
        let allowed = state
            .authorizer
            .allow_repo_access(organization_slug, pipeline_slug, repo)
            .await
            .map_err(|e| ErrorReply {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "error checking repository access".to_string(),
                detail: Some(e.to_string()),
            })?;
        if !allowed {
            return Err(ErrorReply {
                status: StatusCode::FORBIDDEN,
                message: format!("not allowed to acccess repo {}", repo.https()),
                detail: None,
            });
        }
    }

    // Repos permitted, mint the token
    let host = &input.repositories[0].host;
    let forge = state.forges.get(host).ok_or_else(|| ErrorReply {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: "cannot issue access token".to_string(),
        detail: Some(format!("no github client for {host}")),
    })?;

    let permissions = permissions_for(input.access_level);

    let token = forge
        .create_installation_token(&input.repositories, &permissions)
        .await
        .map_err(|e| ErrorReply {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "cannot issue access token".to_string(),
            detail: Some(e.to_string()),
        })?;

    info!("issued token");
    Ok((token.token, token.expires_at))
}

/// The permission set minted for a request: metadata stays read-only,
/// contents and pull requests follow the requested access level.
fn permissions_for(access_level: crate::api::AccessLevel) -> TokenPermissions {
    TokenPermissions {
        metadata: Some("read".to_string()),
        contents: Some(access_level.as_str().to_string()),
        pull_requests: Some(access_level.as_str().to_string()),
    }
}

/// `GET /metrics` — Prometheus text exposition.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

/// Extract the OIDC bearer token from the request headers.
///
/// The header value must split on the literal word `Bearer` into exactly two
/// parts; the token is the trimmed second part. Kept split-based (rather
/// than a prefix strip) for wire compatibility with existing clients.
fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(OIDC_TOKEN_HEADER)?.to_str().ok()?;
    let parts: Vec<&str> = raw.split("Bearer").collect();
    if parts.len() != 2 {
        return None;
    }
    Some(parts[1].trim().to_string())
}

/// Uniform error emitter: JSON `HttpError` body plus a log line carrying the
/// internal detail.
fn error_response(
    req_id: &str,
    status: StatusCode,
    message: &str,
    detail: Option<&str>,
) -> Response {
    match detail {
        Some(detail) => error!(req_id = %req_id, message = %message, error = %detail, "error"),
        None => error!(req_id = %req_id, message = %message, "error"),
    }

    let body = HttpError {
        field: None,
        message: message.to_string(),
        request_id: req_id.to_string(),
    };
    (status, Json(body)).into_response()
}
