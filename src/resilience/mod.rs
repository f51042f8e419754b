// Resilience layer
//
// Failure isolation (per-agent circuit breakers) and bounded retry around
// task execution. Agent-agnostic: it only sees agent ids and task results.

pub mod circuit_breaker;
pub mod executor;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerManager, CircuitBreakerSnapshot,
    CircuitBreakerState,
};
pub use executor::ResilientExecutor;
pub use retry::RetryPolicy;
