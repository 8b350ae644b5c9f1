pub mod circuit_breaker;
pub mod db;
pub mod encryption;
pub mod event_bus;
pub mod logging;
pub mod rpc_client;
pub mod worker_pool;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use event_bus::{DomainEvent, EventBus, EventHandler, InMemoryEventBus};
pub use worker_pool::{JobHandler, SubmitError, WorkerPool, WorkerPoolConfig};
