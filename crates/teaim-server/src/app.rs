//! Application state and router assembly
//!
//! The API routes sit behind the rate limiter and body limits. The health
//! router is merged next to them, and request tracking, panic recovery and
//! request ids wrap everything.

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{post, put},
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use teaim_ingress::{
    IngressError, JsonBody, RateLimiter, body_limit_middleware, rate_limit_middleware,
    request_id_middleware,
};
use teaim_observability::{DrainFlag, HealthState, Metrics, health_router};
use teaim_pii::{PIIRedactor, PiiPolicy, PiiSummary, RedactionOutcome};
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{debug, error};

/// Shared state for the API handlers
#[derive(Clone)]
pub struct AppState {
    redactor: Arc<dyn PIIRedactor>,
    policy: Arc<PiiPolicy>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<Metrics>,
    drain: DrainFlag,
    max_body_bytes: usize,
}

impl AppState {
    pub fn new(
        redactor: Arc<dyn PIIRedactor>,
        policy: PiiPolicy,
        limiter: Arc<RateLimiter>,
        metrics: Arc<Metrics>,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            redactor,
            policy: Arc::new(policy),
            limiter,
            metrics,
            drain: DrainFlag::default(),
            max_body_bytes,
        }
    }

    pub fn drain_flag(&self) -> DrainFlag {
        self.drain.clone()
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Redact and record what was found
    fn redact(&self, text: &str, policy: &PiiPolicy) -> RedactionOutcome {
        let outcome = self.redactor.redact(text, policy);
        self.metrics.record_redaction(
            policy.mode.as_str(),
            outcome.summary.iter().map(|(t, n)| (t.as_str(), n)),
        );
        if outcome.had_pii {
            debug!(
                mode = policy.mode.as_str(),
                matches = outcome.summary.total(),
                "Redacted PII"
            );
        }
        outcome
    }
}

#[derive(Debug, Deserialize)]
pub struct RedactRequest {
    pub text: String,
    #[serde(default)]
    pub policy: Option<PiiPolicy>,
}

#[derive(Debug, Deserialize)]
pub struct NoteInput {
    #[serde(default)]
    pub title: Option<String>,
    pub body: String,
}

/// A note as echoed back after redaction
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub body: String,
    pub pii: PiiSummary,
    pub had_pii: bool,
}

async fn redact_text(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<RedactRequest>,
) -> Json<RedactionOutcome> {
    let policy = request
        .policy
        .unwrap_or_else(|| state.policy.as_ref().clone());
    Json(state.redact(&request.text, &policy))
}

fn redact_note(state: &AppState, id: String, input: NoteInput) -> Note {
    let outcome = state.redact(&input.body, &state.policy);
    Note {
        id,
        title: input.title,
        body: outcome.redacted,
        pii: outcome.summary,
        had_pii: outcome.had_pii,
    }
}

async fn create_note(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<NoteInput>,
) -> (StatusCode, Json<Note>) {
    let id = uuid::Uuid::new_v4().to_string();
    (StatusCode::CREATED, Json(redact_note(&state, id, input)))
}

async fn update_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(input): JsonBody<NoteInput>,
) -> Json<Note> {
    Json(redact_note(&state, id, input))
}

/// Count every response by method and status
async fn track_requests(
    State(metrics): State<Arc<Metrics>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let response = next.run(req).await;
    metrics.record_http_request(method.as_str(), response.status().as_u16());
    response
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(panic = %detail, "Handler panicked");
    IngressError::Internal(detail).into_response()
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/api/redact", post(redact_text))
        .route("/api/notes", post(create_note))
        .route("/api/notes/{id}", put(update_note))
}

/// Build the full application router
pub fn build_router(state: AppState) -> Router {
    layered(api_routes(), state)
}

fn layered(api: Router<AppState>, state: AppState) -> Router {
    let max_body = state.max_body_bytes;
    let limiter = Arc::clone(&state.limiter);
    let metrics = Arc::clone(&state.metrics);
    let health = HealthState::new(Arc::clone(&state.metrics), state.drain.clone());

    api.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(middleware::from_fn(move |req, next| {
            body_limit_middleware(req, next, max_body)
        }))
        .layer(DefaultBodyLimit::max(max_body))
        .with_state(state)
        .merge(health_router(health))
        .layer(middleware::from_fn_with_state(metrics, track_requests))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn(request_id_middleware))
}
