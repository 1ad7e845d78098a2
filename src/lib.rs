//! Calendar AI router: complexity-aware, failure-tolerant routing of
//! generative requests for a calendar and task assistant.
//!
//! Callers hand a [`RouteRequest`](llm::RouteRequest) to
//! [`Router::route`](llm::Router::route) and get back either a normalized
//! answer with routing metadata or a typed [`RouteError`](error::RouteError).
//! In between, the router classifies the prompt, picks a fallback chain of
//! providers, serves from cache when it can, and keeps each provider behind
//! its own rate limiter and circuit breaker.

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod llm;
pub mod observability;
pub mod settings;
pub mod testing;

pub use config::Config;
pub use error::{Error, RouteError};
pub use llm::{Router, RouteDecision, RouteRequest};
