//! # FluxGate - A Distributed Rate Limiting Engine
//!
//! FluxGate is a Redis-backed token-bucket rate limiter for APIs. A rule
//! set describes, per key strategy, one or more bands (a window + a
//! capacity); the engine evaluates every rule and every band for an
//! incoming request and admits it only if all of them have tokens left.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────────────┐     ┌─────────────┐
//! │   Adapter   │────▶│        RateLimiter        │────▶│ TokenBucket │
//! │   (Axum)    │     │   (rule/band evaluation)   │     │    Store    │
//! └─────────────┘     └──────────────────────────┘     └─────────────┘
//!                                  │                            │
//!                                  ▼                            ▼
//!                          RuleSetProvider               Redis or in-proc
//!                                  ▲
//!                                  │
//!                             ReloadBus (pub/sub + poll)
//! ```
//!
//! ## Core components
//!
//! - [`limiter::RateLimiter`] — evaluates a rule set against a request
//! - [`bucket`] — the pure token-bucket refill/consume math
//! - [`store`] — the store abstraction, with local and Redis backends
//! - [`provider::RuleSetProvider`] — resolves and caches rule sets
//! - [`reload::ReloadBus`] — delivers rule-change notifications
//! - [`reset::BucketResetHandler`] — purges buckets on reload
//! - [`server::Server`] — the HTTP adapter
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use fluxgate::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("fluxgate.yaml")?;
//!     println!("loaded config for {}", config.bind_address);
//!     Ok(())
//! }
//! ```

pub mod bucket;
pub mod config;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod key;
pub mod limiter;
pub mod metrics;
pub mod provider;
pub mod reload;
pub mod reset;
pub mod server;
pub mod store;

pub use config::Config;
pub use error::FluxGateError;
pub use limiter::{RateLimitResult, RateLimitVerdict, RateLimiter};

pub type Result<T> = std::result::Result<T, FluxGateError>;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
