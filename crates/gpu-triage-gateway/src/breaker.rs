// crates/gpu-triage-gateway/src/breaker.rs
// ============================================================================
// Module: Circuit Breaker
// Description: Per-node closed/open/half-open state machine.
// Purpose: Stop dispatching to a repeatedly failing node until a cooldown
//          elapses.
// Dependencies: std
// ============================================================================

//! ## Overview
//! One breaker instance guards every node in the process. Each node starts
//! `Closed` with a zero failure counter; reaching the threshold opens the
//! circuit and stamps the failure time. An open circuit admits a single
//! probe once the reset timeout has elapsed (`HalfOpen`); the probe's
//! outcome either closes the circuit or re-opens it. State transitions
//! invoke an optional observer so gauges track circuit health. All state
//! lives behind a read/write lock; readers may run concurrent with each
//! other.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;
use std::time::Instant;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Consecutive failures that open a circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
/// Cooldown before an open circuit admits a probe.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// SECTION: State
// ============================================================================

/// Circuit state for one node.
///
/// # Invariants
/// - Variants are stable for metrics labeling (`gauge_value`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Traffic flows; failures are counted.
    Closed,
    /// Traffic is blocked until the reset timeout elapses.
    Open,
    /// One probe is admitted to test recovery.
    HalfOpen,
}

impl CircuitState {
    /// Returns a stable label for the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    /// Gauge encoding: 0 closed, 1 open, 2 half-open.
    #[must_use]
    pub const fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Open => 1.0,
            Self::HalfOpen => 2.0,
        }
    }
}

/// Observer invoked on every state transition.
pub type StateObserver = Arc<dyn Fn(&str, CircuitState, bool) + Send + Sync>;

/// Per-node circuit bookkeeping.
#[derive(Debug, Clone, Copy)]
struct NodeCircuit {
    /// Current state.
    state: CircuitState,
    /// Consecutive failure count while closed.
    failures: u32,
    /// Time of the most recent failure.
    last_failure: Option<Instant>,
}

impl Default for NodeCircuit {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            last_failure: None,
        }
    }
}

// ============================================================================
// SECTION: Breaker
// ============================================================================

/// Per-node circuit breaker guarding router legs.
pub struct CircuitBreaker {
    /// Failures required to open a circuit.
    threshold: u32,
    /// Cooldown before an open circuit admits a probe.
    reset_timeout: Duration,
    /// Per-node circuit map.
    circuits: RwLock<HashMap<String, NodeCircuit>>,
    /// Optional transition observer.
    observer: Option<StateObserver>,
}

impl CircuitBreaker {
    /// Creates a breaker with the given threshold and reset timeout.
    #[must_use]
    pub fn new(threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            threshold,
            reset_timeout,
            circuits: RwLock::new(HashMap::new()),
            observer: None,
        }
    }

    /// Attaches a transition observer.
    #[must_use]
    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Returns whether a request to `node` is currently allowed.
    ///
    /// An open circuit whose cooldown has elapsed transitions to
    /// `HalfOpen` and admits the caller as the probe.
    #[must_use]
    pub fn allow(&self, node: &str) -> bool {
        let now = Instant::now();
        {
            let Ok(circuits) = self.circuits.read() else {
                return false;
            };
            match circuits.get(node) {
                None => return true,
                Some(circuit) => match circuit.state {
                    CircuitState::Closed | CircuitState::HalfOpen => return true,
                    CircuitState::Open => {
                        let cooled = circuit
                            .last_failure
                            .is_some_and(|last| now.duration_since(last) > self.reset_timeout);
                        if !cooled {
                            return false;
                        }
                    }
                },
            }
        }
        // Cooldown elapsed: promote to half-open and admit one probe.
        let Ok(mut circuits) = self.circuits.write() else {
            return false;
        };
        let circuit = circuits.entry(node.to_string()).or_default();
        if circuit.state == CircuitState::Open {
            circuit.state = CircuitState::HalfOpen;
            self.notify(node, CircuitState::HalfOpen, false);
        }
        true
    }

    /// Records a successful request to `node`.
    pub fn record_success(&self, node: &str) {
        let Ok(mut circuits) = self.circuits.write() else {
            return;
        };
        let circuit = circuits.entry(node.to_string()).or_default();
        let was = circuit.state;
        circuit.state = CircuitState::Closed;
        circuit.failures = 0;
        drop(circuits);
        if was != CircuitState::Closed {
            self.notify(node, CircuitState::Closed, true);
        }
    }

    /// Records a failed request to `node`.
    pub fn record_failure(&self, node: &str) {
        let Ok(mut circuits) = self.circuits.write() else {
            return;
        };
        let circuit = circuits.entry(node.to_string()).or_default();
        circuit.failures = circuit.failures.saturating_add(1);
        circuit.last_failure = Some(Instant::now());
        let was = circuit.state;
        let opens = match was {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => circuit.failures >= self.threshold,
            CircuitState::Open => false,
        };
        if opens {
            circuit.state = CircuitState::Open;
        }
        drop(circuits);
        if opens && was != CircuitState::Open {
            self.notify(node, CircuitState::Open, false);
        }
    }

    /// Forgets all state for `node`.
    pub fn reset(&self, node: &str) {
        let Ok(mut circuits) = self.circuits.write() else {
            return;
        };
        let removed = circuits.remove(node).is_some();
        drop(circuits);
        if removed {
            self.notify(node, CircuitState::Closed, true);
        }
    }

    /// Returns the current state for `node`.
    #[must_use]
    pub fn state(&self, node: &str) -> CircuitState {
        self.circuits
            .read()
            .ok()
            .and_then(|circuits| circuits.get(node).map(|circuit| circuit.state))
            .unwrap_or(CircuitState::Closed)
    }

    /// Returns the current failure counter for `node`.
    #[must_use]
    pub fn failure_count(&self, node: &str) -> u32 {
        self.circuits
            .read()
            .ok()
            .and_then(|circuits| circuits.get(node).map(|circuit| circuit.failures))
            .unwrap_or(0)
    }

    /// Invokes the observer, if any.
    fn notify(&self, node: &str, state: CircuitState, healthy: bool) {
        if let Some(observer) = &self.observer {
            observer(node, state, healthy);
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_RESET_TIMEOUT)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
