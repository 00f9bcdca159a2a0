//! Records stored in the coordination store.
//!
//! Serialized as JSON for human readability and debugging.

use serde::Deserialize;
use serde::Serialize;

/// Token bucket state under `ratelimit:{scope}:{identity}`.
///
/// Capacity and refill rate are not stored: they come from the caller on
/// every check, so a config change takes effect immediately.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    /// Current token count (fractional for precision).
    pub tokens: f64,
    /// Last refill timestamp (Unix milliseconds).
    pub last_refill_ms: u64,
}

impl BucketState {
    /// A full bucket as of `now_ms`.
    pub fn full(capacity: u64, now_ms: u64) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill_ms: now_ms,
        }
    }
}

/// Sliding log under `ratelimit:{scope}:{identity}`: admitted request times
/// inside the rolling window, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    pub timestamps_ms: Vec<u64>,
}

/// Circuit state as stored and reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow through; failures are counted.
    Closed,
    /// Calls fail fast until the recovery timeout elapses.
    Open,
    /// One trial call decides between closing and re-opening.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Failure record under `circuit:{service}`.
///
/// Absence of the record means CLOSED with zero failures, so closing a
/// circuit deletes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitRecord {
    pub state: CircuitState,
    /// Failures since the circuit last closed.
    pub failure_count: u32,
    /// When the circuit last entered OPEN; 0 if it never has since closing.
    pub opened_at_ms: u64,
    /// When the current half-open trial was claimed.
    #[serde(default)]
    pub trial_started_at_ms: Option<u64>,
}

/// Effective view of a circuit at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub service: String,
    /// OPEN past its recovery timeout reports as HALF_OPEN.
    pub state: CircuitState,
    pub failure_count: u32,
    pub opened_at_ms: Option<u64>,
    /// Time until a trial may run, 0 unless fast-failing.
    pub retry_after_ms: u64,
}

/// Row of the durable revocation table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationEntry {
    pub token_id: String,
    pub expires_at_ms: u64,
    pub revoked_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_state_wire_names() {
        let json = serde_json::to_string(&CircuitState::HalfOpen).unwrap();
        assert_eq!(json, "\"HALF_OPEN\"");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
    }

    #[test]
    fn circuit_record_without_trial_field() {
        let record: CircuitRecord =
            serde_json::from_str(r#"{"state":"OPEN","failure_count":5,"opened_at_ms":1000}"#).unwrap();
        assert_eq!(record.state, CircuitState::Open);
        assert_eq!(record.trial_started_at_ms, None);
    }

    #[test]
    fn full_bucket() {
        let state = BucketState::full(5, 42);
        assert_eq!(state.tokens, 5.0);
        assert_eq!(state.last_refill_ms, 42);
    }
}
