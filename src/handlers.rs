//! # HTTP Request Handlers
//!
//! The single in-scope adapter route plus the two Kubernetes probes. An
//! HTTP filter/interceptor integration, framework auto-configuration, and
//! an administrative rule CRUD surface are all out of scope here — this
//! module only turns a [`crate::limiter::RateLimitVerdict`] into a response.
//!
//! ## Handler Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │ POST /v1/rulesets/:rule_set_id/consume  →  consume()            │
//! │   • Resolves the rule set (404 if unknown)                      │
//! │   • Builds a RequestContext from the request body                │
//! │   • Runs RateLimiter::try_consume, returns 200 or 429             │
//! │                                                                  │
//! │ GET /health  →  health_check()   (liveness probe)                │
//! │ GET /ready   →  readiness_check() (readiness probe)               │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Response headers
//!
//! | Header                  | Description                          |
//! |--------------------------|--------------------------------------|
//! | `X-RateLimit-Remaining`  | Tokens remaining after this decision |
//! | `Retry-After`            | Seconds until tokens refill (429)    |

use axum::{extract::{Path, State}, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::context::RequestContext;
use crate::error::FluxGateError;
use crate::health::HealthChecker;
use crate::limiter::RateLimiter;
use crate::provider::RuleSetProvider;

/// Shared application state, handed to every route via [`axum::extract::State`].
pub struct AppState {
    pub limiter: RateLimiter,
    pub provider: Arc<RuleSetProvider>,
    pub health: HealthChecker,
}

pub type SharedState = Arc<AppState>;

/// Request body for the consume endpoint.
///
/// All fields are optional; a resolver that needs an attribute it wasn't
/// given simply treats it as absent (see `KeyResolver::resolve`'s `∅`
/// sentinel).
#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    pub client_ip: Option<String>,
    pub user_id: Option<String>,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub method: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Number of tokens to consume. Defaults to 1.
    #[serde(default = "default_permits")]
    pub permits: u64,
}

fn default_permits() -> u64 {
    1
}

impl From<ConsumeRequest> for RequestContext {
    fn from(req: ConsumeRequest) -> Self {
        let mut builder = RequestContext::builder();
        if let Some(v) = req.client_ip {
            builder = builder.client_ip(v);
        }
        if let Some(v) = req.user_id {
            builder = builder.user_id(v);
        }
        if let Some(v) = req.api_key {
            builder = builder.api_key(v);
        }
        if let Some(v) = req.endpoint {
            builder = builder.endpoint(v);
        }
        if let Some(v) = req.method {
            builder = builder.method(v);
        }
        for (k, v) in req.attributes {
            builder = builder.attribute(k, v);
        }
        builder.build()
    }
}

#[derive(Debug, Serialize)]
pub struct ConsumeResponse {
    pub allowed: bool,
    pub remaining_tokens: u64,
    pub nanos_to_wait_for_refill: u64,
    pub matched_rule_id: Option<String>,
}

/// `POST /v1/rulesets/:rule_set_id/consume`
///
/// # Errors
///
/// A rule set id with no registered rules fails open — the request is
/// admitted and a warning is logged, per the external-interface contract;
/// this is deliberately not a `404`.
///
/// # Errors
///
/// - `503 Service Unavailable` if the store is unreachable and the
///   configured policy is fail-closed (a fail-open policy instead admits
///   and never reaches this handler's error path)
pub async fn consume(
    State(state): State<SharedState>,
    Path(rule_set_id): Path<String>,
    Json(payload): Json<ConsumeRequest>,
) -> Result<impl IntoResponse, FluxGateError> {
    let permits = payload.permits;
    let context = RequestContext::from(payload);

    let verdict = match state.provider.find_by_id(&rule_set_id).await? {
        Some(rule_set) => state.limiter.try_consume(&context, &rule_set, permits).await?,
        None => {
            tracing::warn!(rule_set_id = %rule_set_id, "rule set not found, admitting (fail-open)");
            crate::limiter::RateLimitVerdict::admitted_unknown_rule_set()
        }
    };

    let body = ConsumeResponse {
        allowed: verdict.result.allowed,
        remaining_tokens: verdict.result.remaining_tokens,
        nanos_to_wait_for_refill: verdict.result.nanos_to_wait_for_refill,
        matched_rule_id: verdict.matched_rule_id,
    };

    let mut response = Json(body).into_response();
    response.headers_mut().insert(
        "X-RateLimit-Remaining",
        verdict.result.remaining_tokens.to_string().parse().unwrap(),
    );

    if !verdict.result.allowed {
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        let retry_after_secs = verdict.result.nanos_to_wait_for_refill / 1_000_000_000 + 1;
        response
            .headers_mut()
            .insert("Retry-After", retry_after_secs.to_string().parse().unwrap());
    }

    Ok(response)
}

/// `GET /health` — liveness probe. Always 200; degraded store reachability
/// is reported in the body, not the status code, since a fail-open policy
/// may still be serving traffic.
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.health.check_health().await)
}

/// `GET /ready` — readiness probe.
pub async fn readiness_check(State(state): State<SharedState>) -> impl IntoResponse {
    let status = state.health.check_health().await;
    (StatusCode::OK, Json(status))
}
