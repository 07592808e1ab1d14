//! Request envelope middleware.
//!
//! Chain, outer to inner: panic recovery → default-JSON content type →
//! request context (id, deadline, completion log) → per-route metrics →
//! handler. Panics become a generic JSON 500 and a counter bump; deadline
//! overruns become a JSON 500 carrying the request id.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::FutureExt;
use serde_json::json;
use tracing::{error, info, Instrument};
use uuid::Uuid;

use crate::api::HttpError;
use crate::metrics::Metrics;

use super::router::AppState;

/// Per-request id, stored in request extensions for handlers to echo.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Outermost layer: keep the process alive through handler panics.
pub async fn recover_panics(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let message = panic_message(&panic);
            error!(
                r#type = "panic",
                message = %message,
                stack = %std::backtrace::Backtrace::force_capture(),
                "error"
            );
            state.metrics.record_panic();
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Internal Server Error"})),
            )
                .into_response()
        }
    }
}

/// Responses default to `application/json` unless the handler said otherwise.
pub async fn default_json_content_type(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    if !response.headers().contains_key(CONTENT_TYPE) {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    response
}

/// Mint a request id, bind it to a tracing span, enforce the configured
/// deadline, and log request completion.
pub async fn request_context(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let req_id = Uuid::new_v4().to_string();
    request.extensions_mut().insert(RequestId(req_id.clone()));

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let span = tracing::info_span!("request", req_id = %req_id);
    let deadline = state.config.default_timeout;

    let response = match tokio::time::timeout(deadline, next.run(request).instrument(span)).await {
        Ok(response) => response,
        Err(_) => {
            // The downstream call was cancelled with the deadline; nothing
            // was written yet, so this error body is the whole response
            let body = HttpError {
                field: None,
                message: "request timed out".to_string(),
                request_id: req_id.clone(),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    };

    info!(
        req_id = %req_id,
        status = response.status().as_u16(),
        request_uri = %path,
        method = %method,
        latency = started.elapsed().as_secs_f64(),
        "http_request"
    );

    response
}

/// State for the per-route metrics middleware.
#[derive(Clone)]
pub struct EndpointLabel {
    /// Shared metrics registry
    pub metrics: Arc<Metrics>,
    /// Route name used as the metric label
    pub name: &'static str,
}

/// Track in-flight count, latency, and response codes for one route.
pub async fn track_metrics(
    State(label): State<EndpointLabel>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().as_str().to_string();
    let mut guard = FlightGuard::enter(label.metrics, label.name, method);
    let response = next.run(request).await;
    guard.status = response.status().as_u16();
    response
}

/// Balances the in-flight gauge even when the deadline cancels the route
/// future mid-flight.
struct FlightGuard {
    metrics: Arc<Metrics>,
    name: &'static str,
    method: String,
    started: Instant,
    status: u16,
}

impl FlightGuard {
    fn enter(metrics: Arc<Metrics>, name: &'static str, method: String) -> Self {
        metrics.request_started(name);
        Self {
            metrics,
            name,
            method,
            started: Instant::now(),
            // Cancellation surfaces as a 500 from the context layer
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.metrics
            .request_finished(self.name, &self.method, self.status, self.started.elapsed());
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
