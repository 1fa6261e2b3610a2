//! Retry orchestration across the proxy pool
//!
//! One logical operation is driven through a bounded sequence of attempts,
//! each through a different proxy. Transient failures rotate to another
//! proxy with exponential backoff; permanent failures end the operation at
//! once.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::pool::ProxyPool;
use super::selector::ProxySelector;
use crate::config::RetryConfig;
use crate::models::{ProxyEndpoint, ProxyId};

/// Classified failure of a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Upstream signalled rate limiting through this proxy
    RateLimited,
    /// Connect, TLS, timeout or other network-path failure
    ConnectionError,
    /// The requested resource does not exist
    NotFound,
    /// The resource exists but not in the requested language
    LanguageUnavailable,
    /// Unclassified upstream failure, not worth retrying
    Other,
}

impl FailureKind {
    /// Transient failures belong to the network path and may succeed via another proxy
    pub fn is_transient(&self) -> bool {
        matches!(self, FailureKind::RateLimited | FailureKind::ConnectionError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::RateLimited => "rate_limited",
            FailureKind::ConnectionError => "connection_error",
            FailureKind::NotFound => "not_found",
            FailureKind::LanguageUnavailable => "language_unavailable",
            FailureKind::Other => "other",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure returned by one attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct AttemptFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl AttemptFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FailureKind::RateLimited, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ConnectionError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message)
    }

    pub fn language_unavailable(message: impl Into<String>) -> Self {
        Self::new(FailureKind::LanguageUnavailable, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Other, message)
    }
}

/// Final failure of a logical operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("{kind} after {attempts} attempt(s): {message}")]
    Failed {
        kind: FailureKind,
        message: String,
        attempts: u32,
    },

    #[error("no untried proxy left after {attempts} attempt(s)")]
    PoolExhausted { attempts: u32 },
}

impl OperationError {
    pub fn attempts(&self) -> u32 {
        match self {
            OperationError::Failed { attempts, .. } | OperationError::PoolExhausted { attempts } => {
                *attempts
            }
        }
    }

    /// Failure kind, `None` for pool exhaustion
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            OperationError::Failed { kind, .. } => Some(*kind),
            OperationError::PoolExhausted { .. } => None,
        }
    }
}

pub type OperationResult<T> = std::result::Result<T, OperationError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(FailureKind),
}

#[derive(Debug, Clone)]
pub struct Attempt {
    pub proxy: ProxyId,
    pub outcome: AttemptOutcome,
    pub at: Instant,
}

/// Attempts made so far within one operation
#[derive(Debug, Default)]
pub struct AttemptRecord {
    attempts: Vec<Attempt>,
    tried: HashSet<ProxyId>,
}

impl AttemptRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, proxy: ProxyId, outcome: AttemptOutcome, at: Instant) {
        self.tried.insert(proxy.clone());
        self.attempts.push(Attempt { proxy, outcome, at });
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Identities already attempted, to be excluded from selection
    pub fn tried(&self) -> &HashSet<ProxyId> {
        &self.tried
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    /// One `proxy -> outcome` entry per attempt, in order
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "none".to_string();
        }
        self.attempts()
            .iter()
            .map(|attempt| match attempt.outcome {
                AttemptOutcome::Succeeded => format!("{} -> ok", attempt.proxy),
                AttemptOutcome::Failed(kind) => format!("{} -> {}", attempt.proxy, kind),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Attempt bounds and backoff parameters
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to each backoff
    pub jitter: Duration,
    /// How long proxy selection may wait for a cooling proxy
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: Duration::from_millis(250),
            max_wait: Duration::from_secs(5),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            jitter: config.jitter,
            max_wait: config.max_wait,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the next attempt, after `failures` transient failures
    ///
    /// `min(max_delay, base_delay * 2^(failures - 1))`, without jitter.
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(failures - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff plus a random jitter in `[0, jitter]`
    pub fn jittered_delay(&self, failures: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.backoff_delay(failures) + Duration::from_millis(extra)
    }
}

/// Runs logical operations against the shared proxy pool
#[derive(Debug, Clone)]
pub struct RetryOrchestrator {
    pool: Arc<ProxyPool>,
    policy: RetryPolicy,
}

impl RetryOrchestrator {
    pub fn new(pool: Arc<ProxyPool>, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    /// Execute `operation` with the orchestrator's default policy
    pub async fn execute<T, F, Fut>(&self, operation: F) -> OperationResult<T>
    where
        F: Fn(ProxyEndpoint) -> Fut,
        Fut: Future<Output = Result<T, AttemptFailure>> + Send + 'static,
        T: Send + 'static,
    {
        self.execute_with_policy(&self.policy, operation).await
    }

    /// Execute `operation`, one proxy per attempt, until success or a stop condition
    ///
    /// Each attempt runs on its own task. Dropping the returned future stops
    /// further attempts; an attempt already in flight runs to completion
    /// (or its own transport timeout) in the background.
    pub async fn execute_with_policy<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        operation: F,
    ) -> OperationResult<T>
    where
        F: Fn(ProxyEndpoint) -> Fut,
        Fut: Future<Output = Result<T, AttemptFailure>> + Send + 'static,
        T: Send + 'static,
    {
        let operation_id = Uuid::new_v4();
        let span = info_span!("operation", %operation_id);
        self.run(policy, operation).instrument(span).await
    }

    async fn run<T, F, Fut>(&self, policy: &RetryPolicy, operation: F) -> OperationResult<T>
    where
        F: Fn(ProxyEndpoint) -> Fut,
        Fut: Future<Output = Result<T, AttemptFailure>> + Send + 'static,
        T: Send + 'static,
    {
        let selector = ProxySelector::new(policy.max_wait);
        let mut record = AttemptRecord::new();
        let mut failures: u32 = 0;
        let mut last_failure: Option<AttemptFailure> = None;

        while failures < policy.max_attempts {
            let Some(proxy) = selector.select_next(&self.pool, record.tried()).await else {
                warn!(
                    "No untried proxy available after {} attempt(s): {}",
                    record.len(),
                    record.summary()
                );
                return Err(OperationError::PoolExhausted {
                    attempts: record.len() as u32,
                });
            };

            let id = proxy.id();
            let started = Instant::now();
            self.pool.record_use(&id, started);
            debug!(
                "Attempt {}/{} through {}",
                failures + 1,
                policy.max_attempts,
                proxy
            );

            let result = match tokio::spawn(operation(proxy.clone())).await {
                Ok(result) => result,
                Err(e) => Err(AttemptFailure::other(format!("attempt task failed: {}", e))),
            };

            match result {
                Ok(payload) => {
                    record.push(id.clone(), AttemptOutcome::Succeeded, started);
                    self.pool.record_success(&id);
                    info!(
                        "Operation succeeded through {} after {} attempt(s)",
                        proxy,
                        record.len()
                    );
                    return Ok(payload);
                }
                Err(failure) if !failure.kind.is_transient() => {
                    record.push(id, AttemptOutcome::Failed(failure.kind), started);
                    info!("Permanent failure through {}: {}", proxy, failure);
                    return Err(OperationError::Failed {
                        kind: failure.kind,
                        message: failure.message,
                        attempts: record.len() as u32,
                    });
                }
                Err(failure) => {
                    record.push(id.clone(), AttemptOutcome::Failed(failure.kind), started);
                    self.pool.record_failure(&id);
                    failures += 1;

                    let delay = policy.jittered_delay(failures);
                    if failure.kind == FailureKind::RateLimited {
                        self.pool.record_cooldown(&id, Instant::now() + delay);
                    }
                    warn!(
                        "Transient failure through {} (attempt {}/{}): {}",
                        proxy, failures, policy.max_attempts, failure
                    );
                    last_failure = Some(failure);

                    let more_attempts = failures < policy.max_attempts;
                    let more_proxies = record.tried().len() < self.pool.pool_size();
                    if more_attempts && more_proxies {
                        debug!("Backing off for {:?}", delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        warn!(
            "Giving up after {} attempt(s): {}",
            record.len(),
            record.summary()
        );
        Err(match last_failure {
            Some(failure) => OperationError::Failed {
                kind: failure.kind,
                message: failure.message,
                attempts: record.len() as u32,
            },
            None => OperationError::PoolExhausted { attempts: 0 },
        })
    }
}
