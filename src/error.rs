//! # Error Types and Handling
//!
//! Defines the [`FluxGateError`] taxonomy and its conversion to HTTP
//! responses for the adapter layer.
//!
//! ## Error to HTTP Status Mapping
//!
//! ```text
//! FluxGateError variant      HTTP status           Retryable
//! ────────────────────────── ───────────────────── ─────────
//! InvalidRuleConfig          400 Bad Request        no
//! RuleSetNotFound            404 Not Found          no
//! StoreUnavailable           503 Service Unavailable yes (upstream)
//! ReloadDeliveryFailure      500 Internal Error      yes
//! ConfigurationError         500 Internal Error      no
//! ```
//!
//! A rejected `tryConsume` call is not an error — it is a normal
//! [`crate::limiter::RateLimitResult`] with `allowed: false`; the adapter
//! turns that into a 429 with a `Retry-After` header.
//!
//! `RuleSetNotFound` is not raised by the `consume` handler itself: a rule
//! set id with no registered rules fails open there (admit, log a
//! warning), per the external-interface contract. The variant exists for
//! a `RuleRepository` implementation that wants to surface a load failure
//! distinct from "rule set genuinely absent".

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FluxGateError {
    #[error("invalid rule config for {rule_id}: {reason}")]
    InvalidRuleConfig { rule_id: String, reason: String },

    #[error("rule set not found: {rule_set_id}")]
    RuleSetNotFound { rule_set_id: String },

    #[error("store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("reload delivery failed: {message}")]
    ReloadDeliveryFailure { message: String },

    #[error("configuration error: {message}")]
    ConfigurationError { message: String },
}

impl IntoResponse for FluxGateError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            FluxGateError::InvalidRuleConfig { .. } => (StatusCode::BAD_REQUEST, "invalid_rule_config"),
            FluxGateError::RuleSetNotFound { .. } => (StatusCode::NOT_FOUND, "rule_set_not_found"),
            FluxGateError::StoreUnavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
            FluxGateError::ReloadDeliveryFailure { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "reload_delivery_failure"),
            FluxGateError::ConfigurationError { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
        };

        (
            status,
            Json(serde_json::json!({
                "error": error,
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}

impl From<redis::RedisError> for FluxGateError {
    fn from(err: redis::RedisError) -> Self {
        FluxGateError::StoreUnavailable {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for FluxGateError {
    fn from(err: serde_json::Error) -> Self {
        FluxGateError::StoreUnavailable {
            message: format!("malformed bucket record: {}", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, FluxGateError>;
