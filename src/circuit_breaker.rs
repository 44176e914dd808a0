/*!
 * # Circuit Breaker
 *
 * Guards outbound carrier calls. Once a carrier fails `failure_threshold`
 * times in a row its breaker opens and calls are rejected without touching
 * the network until `timeout` has elapsed.
 */

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow through
    Closed,
    /// Calls are rejected
    Open,
    /// A limited number of probe calls are allowed
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time spent open before probing again
    pub timeout: Duration,
    /// Successful probes needed to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

impl CircuitBreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitBreakerState>,
}

#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker is open")]
    CircuitOpen,
    #[error(transparent)]
    Inner(E),
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(CircuitBreakerState::closed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `f` if the circuit allows it and records the outcome.
    pub async fn call<F, Fut, R, E>(&self, f: F) -> Result<R, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        if !self.can_execute() {
            metrics::counter!("carrier.circuit_rejected", 1, "carrier" => self.name.clone());
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match f().await {
            Ok(result) => {
                self.on_success();
                Ok(result)
            }
            Err(err) => {
                self.on_failure();
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn can_execute(&self) -> bool {
        let mut state = self.lock();
        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => match state.last_failure_time {
                Some(last_failure) if last_failure.elapsed() >= self.config.timeout => {
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    tracing::info!(carrier = %self.name, "circuit half-open, probing carrier");
                    true
                }
                _ => false,
            },
        }
    }

    fn on_success(&self) {
        let mut state = self.lock();
        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    *state = CircuitBreakerState::closed();
                    tracing::info!(carrier = %self.name, "circuit closed");
                }
            }
            CircuitState::Open => {
                *state = CircuitBreakerState::closed();
            }
        }
    }

    fn on_failure(&self) {
        let mut state = self.lock();
        state.failure_count += 1;
        state.last_failure_time = Some(Instant::now());

        match state.state {
            CircuitState::Closed if state.failure_count >= self.config.failure_threshold => {
                state.state = CircuitState::Open;
                tracing::warn!(
                    carrier = %self.name,
                    failures = state.failure_count,
                    "circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.success_count = 0;
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }
}

/// Named breakers sharing one default configuration
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            default_config,
        }
    }

    /// Get or create the breaker for `name`
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = match self.breakers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.default_config.clone())))
            .clone()
    }

    pub fn states(&self) -> HashMap<String, CircuitState> {
        let breakers = match self.breakers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect()
    }
}
