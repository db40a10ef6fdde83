//! # HTTP Server Module
//!
//! The HTTP adapter layer, built on [Axum](https://github.com/tokio-rs/axum)
//! with the Tokio async runtime. This is one possible adapter over the
//! core rate limiter; it is not itself part of the core.
//!
//! ## Routes
//!
//! ```text
//! POST /v1/rulesets/:rule_set_id/consume  → consume
//! GET  /health                            → health_check
//! GET  /ready                             → readiness_check
//! ```
//!
//! ## Graceful shutdown
//!
//! `SIGINT` and `SIGTERM` (Unix) both trigger a graceful shutdown:
//! in-flight requests are allowed to complete before the listener closes.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{consume, health_check, readiness_check, AppState, SharedState};

pub fn create_app(state: SharedState) -> Router {
    Router::new()
        .route("/v1/rulesets/:rule_set_id/consume", post(consume))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// HTTP server wrapper.
pub struct Server {
    app: Router,
    bind_address: String,
}

impl Server {
    pub fn new(bind_address: impl Into<String>, state: AppState) -> Self {
        let bind_address = bind_address.into();
        let app = create_app(Arc::new(state));
        Self { app, bind_address }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;

        tracing::info!("fluxgate listening on {}", self.bind_address);
        tracing::info!("health check available at /health");
        tracing::info!("readiness check available at /ready");

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("received terminate signal, initiating graceful shutdown");
        },
    }
}
