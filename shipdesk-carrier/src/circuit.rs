use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,   // Normal operation
    Open,     // Failing fast
    HalfOpen, // One trial call allowed through
}

/// Per-provider breaker so one broken integration cannot stall the others.
///
/// While half-open exactly one caller is let through. The claim lapses after
/// `reset_timeout` in case its caller never reports back.
pub struct CircuitBreaker {
    pub name: String,
    state: RwLock<CircuitState>,
    failure_count: AtomicUsize,
    failure_threshold: usize,
    reset_timeout: Duration,
    last_failure: RwLock<Option<Instant>>,
    trial_started: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, threshold: usize, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicUsize::new(0),
            failure_threshold: threshold.max(1),
            reset_timeout: timeout,
            last_failure: RwLock::new(None),
            trial_started: RwLock::new(None),
        }
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    /// Whether a call may go out right now
    pub async fn check(&self) -> bool {
        if *self.state.read().await == CircuitState::Closed {
            return true;
        }

        // Transitions and trial claims happen under the write lock
        let mut state = self.state.write().await;
        match *state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let last_fail = *self.last_failure.read().await;
                match last_fail {
                    Some(instant) if instant.elapsed() >= self.reset_timeout => {
                        *state = CircuitState::HalfOpen;
                        *self.trial_started.write().await = Some(Instant::now());
                        tracing::info!("Circuit breaker [{}] moving to half-open", self.name);
                        true
                    }
                    _ => false,
                }
            }
            CircuitState::HalfOpen => {
                let mut trial = self.trial_started.write().await;
                match *trial {
                    Some(started) if started.elapsed() < self.reset_timeout => false,
                    _ => {
                        *trial = Some(Instant::now());
                        true
                    }
                }
            }
        }
    }

    /// Give up the half-open trial call without judging the provider's health
    pub async fn release_trial(&self) {
        let _state = self.state.write().await;
        *self.trial_started.write().await = None;
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Closed;
            tracing::info!("Circuit breaker [{}] recovered to closed", self.name);
        }
        *self.trial_started.write().await = None;
        self.failure_count.store(0, Ordering::SeqCst);
    }

    pub async fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write().await;

        if count >= self.failure_threshold || *state == CircuitState::HalfOpen {
            *state = CircuitState::Open;
            let mut last = self.last_failure.write().await;
            *last = Some(Instant::now());
            *self.trial_started.write().await = None;
            tracing::error!("Circuit breaker [{}] tripped open after {} failures", self.name, count);
        }
    }
}
