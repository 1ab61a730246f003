use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;

const ADAPTATION_MIN_CALLS: usize = 50;
const ADAPTATION_WINDOW: Duration = Duration::from_secs(3600);
const CALL_HISTORY_CAPACITY: usize = 1000;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("CLOSED"),
            Self::Open => f.write_str("OPEN"),
            Self::HalfOpen => f.write_str("HALF_OPEN"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_timeout: Duration,
    pub half_open_max_calls: u32,
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, open_timeout: Duration, half_open_max_calls: u32) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            open_timeout,
            half_open_max_calls: half_open_max_calls.max(1),
        }
    }

    pub fn from_supervisor(config: &SupervisorConfig) -> Self {
        Self::new(
            config.circuit_breaker_threshold,
            config.circuit_breaker_timeout(),
            config.circuit_breaker_half_open_max_calls,
        )
    }
}

/// Returned without invoking the wrapped call while the circuit is open
#[derive(Debug, Clone, thiserror::Error)]
#[error("circuit '{circuit}' is open after {failure_count} failures, retry in {retry_in:?}")]
pub struct CircuitOpenError {
    pub circuit: String,
    pub failure_count: u32,
    pub retry_in: Duration,
}

/// Error of a call made through a [`CircuitBreaker`]
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    Open(CircuitOpenError),
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(e) => write!(f, "{}", e),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for CircuitBreakerError<E> {}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }
}

/// Serializable view of a breaker
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u64,
    pub configured_threshold: u32,
    pub adaptive_threshold: u32,
    pub calls_recorded: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
struct CallRecord {
    at: Instant,
    success: bool,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u64,
    half_open_successes: u32,
    adaptive_threshold: u32,
    opened_at: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    history: VecDeque<CallRecord>,
}

/// Failure-isolation wrapper around one outbound call path.
///
/// State only changes through [`CircuitBreaker::call`]. An open circuit moves
/// to half-open on the first call after `open_timeout`; it never closes
/// without going through half-open.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let adaptive_threshold = config.failure_threshold;
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_successes: 0,
                adaptive_threshold,
                opened_at: None,
                last_failure_time: None,
                history: VecDeque::with_capacity(CALL_HISTORY_CAPACITY),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, without applying the open-timeout transition
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn adaptive_threshold(&self) -> u32 {
        self.lock().adaptive_threshold
    }

    /// Run `f` through the breaker, recording its outcome.
    pub async fn call<T, E, F, Fut>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.admit().map_err(CircuitBreakerError::Open)?;

        match f().await {
            Ok(value) => {
                self.record(true);
                Ok(value)
            }
            Err(e) => {
                self.record(false);
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            configured_threshold: self.config.failure_threshold,
            adaptive_threshold: inner.adaptive_threshold,
            calls_recorded: inner.history.len(),
            last_failure_at: inner.last_failure_time,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admit(&self) -> Result<(), CircuitOpenError> {
        let mut inner = self.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
        if elapsed > self.config.open_timeout {
            inner.state = CircuitState::HalfOpen;
            inner.half_open_successes = 0;
            info!(circuit = %self.name, from = %CircuitState::Open, to = %CircuitState::HalfOpen, "circuit breaker probing");
            return Ok(());
        }

        Err(CircuitOpenError {
            circuit: self.name.clone(),
            failure_count: inner.failure_count,
            retry_in: self.config.open_timeout.saturating_sub(elapsed),
        })
    }

    fn record(&self, success: bool) {
        let mut inner = self.lock();
        let now = Instant::now();

        if inner.history.len() >= CALL_HISTORY_CAPACITY {
            inner.history.pop_front();
        }
        inner.history.push_back(CallRecord { at: now, success });
        self.adapt_threshold(&mut inner, now);

        if success {
            inner.success_count += 1;
            match inner.state {
                CircuitState::Closed => {
                    inner.failure_count = inner.failure_count.saturating_sub(1);
                }
                CircuitState::HalfOpen => {
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= self.config.half_open_max_calls {
                        self.close(&mut inner);
                    }
                }
                CircuitState::Open => {}
            }
        } else {
            inner.failure_count = inner.failure_count.saturating_add(1);
            inner.last_failure_time = Some(Utc::now());
            match inner.state {
                CircuitState::Closed if inner.failure_count >= inner.adaptive_threshold => {
                    self.open(&mut inner, now, CircuitState::Closed);
                }
                CircuitState::HalfOpen => self.open(&mut inner, now, CircuitState::HalfOpen),
                _ => {}
            }
        }
    }

    /// Recompute the effective failure threshold from the last hour of calls.
    fn adapt_threshold(&self, inner: &mut BreakerInner, now: Instant) {
        if inner.history.len() < ADAPTATION_MIN_CALLS {
            return;
        }

        let (total, successes) = inner
            .history
            .iter()
            .filter(|c| now.saturating_duration_since(c.at) <= ADAPTATION_WINDOW)
            .fold((0usize, 0usize), |(t, s), c| (t + 1, s + usize::from(c.success)));
        if total == 0 {
            return;
        }

        let base = self.config.failure_threshold;
        let success_rate = successes as f64 / total as f64;
        let threshold = if success_rate >= 0.95 {
            (f64::from(base) * 1.5).ceil() as u32
        } else if success_rate < 0.8 {
            (base / 2).max(base.min(2))
        } else {
            base
        };

        if threshold != inner.adaptive_threshold {
            debug!(
                circuit = %self.name,
                success_rate,
                old = inner.adaptive_threshold,
                new = threshold,
                "adjusted circuit breaker threshold"
            );
            inner.adaptive_threshold = threshold;
        }
    }

    fn open(&self, inner: &mut BreakerInner, now: Instant, from: CircuitState) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.half_open_successes = 0;
        warn!(
            circuit = %self.name,
            from = %from,
            to = %CircuitState::Open,
            failures = inner.failure_count,
            threshold = inner.adaptive_threshold,
            "circuit breaker opened"
        );
    }

    fn close(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.half_open_successes = 0;
        inner.opened_at = None;
        info!(circuit = %self.name, from = %CircuitState::HalfOpen, to = %CircuitState::Closed, "circuit breaker closed");
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
