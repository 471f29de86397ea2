//! C14 — Resilience primitives: retry handler and circuit breaker.
//!
//! Grounded in `original_source/agent-runtime/app/infrastructure/resilience/`
//! (`retry_handler.py`, `circuit_breaker.py`). The circuit breaker wraps the
//! LLM call first; the retry handler wraps the circuit breaker (§4.C5
//! composition) — a `CircuitOpen` error is therefore never retried, matching
//! `CircuitBreaker.call` raising immediately when `state == OPEN`.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::CoreError;

// ─── Retry handler ──────────────────────────────────────────────────────────

/// Exponential-backoff retry policy (§4.C14, §6 defaults).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            exponential_base: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &agentforge_config::config::ResilienceConfig) -> Self {
        Self {
            max_retries: config.retry_max_attempts as u32,
            base_delay: Duration::from_secs(config.retry_base_seconds),
            max_delay: Duration::from_secs(config.retry_max_seconds),
            exponential_base: 2.0,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_secs_f64() * self.exponential_base.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    /// Run `op` with retries. Only `CoreError::is_retryable` errors are retried
    /// (§4.C5: a fixed set of transient HTTP conditions); everything else —
    /// including `CircuitOpen` — propagates on the first attempt.
    ///
    /// Exactly `max_retries` retries means up to `max_retries + 1` total attempts.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying transient LLM failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ─── Circuit breaker ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub recovery_timeout: Duration,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
}

/// Closed/open/half-open state machine guarding a downstream dependency
/// (§4.C14), grounded directly in `circuit_breaker.py::CircuitBreaker`.
pub struct CircuitBreaker {
    scope: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: RwLock<Inner>,
    trips: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(scope: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            scope: scope.into(),
            failure_threshold,
            recovery_timeout,
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
            }),
            trips: AtomicU32::new(0),
        }
    }

    pub fn from_config(scope: impl Into<String>, config: &agentforge_config::config::ResilienceConfig) -> Self {
        Self::new(
            scope,
            config.circuit_breaker_failure_threshold as u32,
            Duration::from_secs(config.circuit_breaker_recovery_seconds),
        )
    }

    /// Run `op` through the breaker. Mirrors `CircuitBreaker.call`: an `OPEN`
    /// circuit past its recovery timeout transitions to `HALF_OPEN` and lets
    /// exactly one trial call through before deciding the next state.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        {
            let mut guard = self.inner.write().expect("circuit breaker lock poisoned");
            if guard.state == CircuitState::Open {
                if self.should_attempt_reset(&guard) {
                    tracing::info!(scope = %self.scope, "circuit breaker entering half_open");
                    guard.state = CircuitState::HalfOpen;
                } else {
                    return Err(CoreError::CircuitOpen { scope: self.scope.clone() });
                }
            }
        }

        match op().await {
            Ok(v) => {
                self.on_success();
                Ok(v)
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }

    fn should_attempt_reset(&self, guard: &Inner) -> bool {
        match guard.last_failure_time {
            Some(t) => Utc::now() - t > chrono::Duration::from_std(self.recovery_timeout).unwrap_or_default(),
            None => false,
        }
    }

    fn on_success(&self) {
        let mut guard = self.inner.write().expect("circuit breaker lock poisoned");
        if guard.state == CircuitState::HalfOpen {
            tracing::info!(scope = %self.scope, "circuit breaker recovered, entering closed");
            agentforge_config::observability::security_circuit_breaker_closed(&self.scope);
        }
        guard.failure_count = 0;
        guard.state = CircuitState::Closed;
    }

    fn on_failure(&self) {
        let mut guard = self.inner.write().expect("circuit breaker lock poisoned");
        guard.failure_count += 1;
        guard.last_failure_time = Some(Utc::now());
        if guard.failure_count >= self.failure_threshold {
            if guard.state != CircuitState::Open {
                self.trips.fetch_add(1, Ordering::Relaxed);
                agentforge_config::observability::security_circuit_breaker_opened(&self.scope, guard.failure_count);
            }
            guard.state = CircuitState::Open;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.read().expect("circuit breaker lock poisoned").state
    }

    /// Force the breaker back to `closed` (manual operator reset).
    pub fn reset(&self) {
        let mut guard = self.inner.write().expect("circuit breaker lock poisoned");
        guard.state = CircuitState::Closed;
        guard.failure_count = 0;
        guard.last_failure_time = None;
    }

    pub fn get_stats(&self) -> CircuitBreakerStats {
        let guard = self.inner.read().expect("circuit breaker lock poisoned");
        CircuitBreakerStats {
            state: guard.state,
            failure_count: guard.failure_count,
            failure_threshold: self.failure_threshold,
            last_failure_time: guard.last_failure_time,
            recovery_timeout: self.recovery_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fail() -> Result<(), CoreError> {
        Err(CoreError::TransientLlm("boom".into()))
    }

    async fn ok() -> Result<(), CoreError> {
        Ok(())
    }

    #[tokio::test]
    async fn retry_handler_exhausts_then_raises() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 2.0,
        };
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result = policy
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                fail()
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3); // max_retries + 1
    }

    #[tokio::test]
    async fn retry_handler_succeeds_on_final_attempt() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 2.0,
        };
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result = policy
            .run(|| async {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 { fail().await } else { ok().await }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn circuit_breaker_opens_after_threshold_then_recovers() {
        let cb = CircuitBreaker::new("test", 3, Duration::from_millis(20));
        for _ in 0..3 {
            let _ = cb.call(fail).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(cb.call(ok).await, Err(CoreError::CircuitOpen { .. })));

        tokio::time::sleep(Duration::from_millis(25)).await;
        let result = cb.call(ok).await;
        assert!(result.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn manual_reset_forces_closed() {
        let cb = CircuitBreaker::new("test", 1, Duration::from_secs(60));
        let _ = cb.call(fail).await;
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
