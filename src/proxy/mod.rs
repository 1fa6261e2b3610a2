//! Upstream proxy pool
//!
//! This module provides:
//! - The shared pool of proxy endpoints and their usage state
//! - Least-recently-used selection with cooldown waits
//! - Retry orchestration across proxies
//! - Startup health probing

pub mod health;
pub mod pool;
pub mod retry;
pub mod selector;

pub use health::{HealthProbe, HealthProbeConfig};
pub use pool::ProxyPool;
pub use retry::{
    AttemptFailure, FailureKind, OperationError, OperationResult, RetryOrchestrator, RetryPolicy,
};
pub use selector::ProxySelector;
