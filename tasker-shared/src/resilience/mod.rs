//! # Resilience
//!
//! A small circuit breaker used to protect state-backend operations
//! from cascading failure when the backend is degraded — ambient
//! fault isolation rather than a domain concept, wired into
//! [`crate::backend::postgres::PostgresBackend`] to shield its queries.

mod behavior;
mod circuit_breaker;
mod metrics;

pub use behavior::CircuitBreakerBehavior;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use metrics::CircuitBreakerMetrics;
