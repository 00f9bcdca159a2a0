//! Circuit breaker state transitions.
//!
//! A missing record is CLOSED with zero failures. OPEN turns into HALF_OPEN
//! lazily, when a caller observes it after the recovery timeout; the caller
//! that observes it claims the single trial call.

use crate::types::CircuitRecord;
use crate::types::CircuitState;

/// Breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitParams {
    /// Failures that open a closed circuit.
    pub failure_threshold: u32,
    /// Time an open circuit fails fast before allowing a trial.
    pub recovery_timeout_ms: u64,
}

/// State as observed at `now_ms`, with OPEN past its timeout reported as
/// HALF_OPEN.
pub fn effective_state(record: Option<&CircuitRecord>, now_ms: u64, params: CircuitParams) -> CircuitState {
    match record {
        None => CircuitState::Closed,
        Some(r) if r.state == CircuitState::Open && recovery_elapsed(r.opened_at_ms, now_ms, params) => {
            CircuitState::HalfOpen
        }
        Some(r) => r.state,
    }
}

/// Decision for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Run the call. `trial` is true if this call decides a half-open circuit.
    Admit { trial: bool },
    /// Fail fast.
    Reject { retry_after_ms: u64 },
}

/// Decide whether a call may run, and the record to store if the decision
/// claims a trial.
///
/// Returns `(admission, Some(new_record))` only when the record must change.
pub fn admit(
    record: Option<&CircuitRecord>,
    now_ms: u64,
    params: CircuitParams,
) -> (Admission, Option<CircuitRecord>) {
    let Some(record) = record else {
        return (Admission::Admit { trial: false }, None);
    };

    match record.state {
        CircuitState::Closed => (Admission::Admit { trial: false }, None),
        CircuitState::Open => {
            if recovery_elapsed(record.opened_at_ms, now_ms, params) {
                (Admission::Admit { trial: true }, Some(claim_trial(record, now_ms)))
            } else {
                let retry_after_ms = wait_remaining(record.opened_at_ms, now_ms, params);
                (Admission::Reject { retry_after_ms }, None)
            }
        }
        CircuitState::HalfOpen => match record.trial_started_at_ms {
            // A trial that never reported back is abandoned after one
            // recovery timeout.
            Some(started) if !recovery_elapsed(started, now_ms, params) => {
                let retry_after_ms = wait_remaining(started, now_ms, params);
                (Admission::Reject { retry_after_ms }, None)
            }
            _ => (Admission::Admit { trial: true }, Some(claim_trial(record, now_ms))),
        },
    }
}

/// Outcome of a call, already classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
}

/// Result of folding an outcome into the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordUpdate {
    /// Leave the record as it is.
    Unchanged,
    /// Close the circuit (delete the record).
    Close,
    /// Store this record.
    Store(CircuitRecord),
}

/// Fold one call outcome into the record.
///
/// Success while CLOSED does not clear earlier failures: the count is
/// cumulative until the circuit closes from HALF_OPEN or is reset. Outcomes
/// of calls admitted before the circuit opened do not re-arm `opened_at_ms`.
pub fn record_outcome(
    record: Option<&CircuitRecord>,
    outcome: CallOutcome,
    trial: bool,
    now_ms: u64,
    params: CircuitParams,
) -> RecordUpdate {
    let state = record.map_or(CircuitState::Closed, |r| r.state);
    let failures = record.map_or(0, |r| r.failure_count);

    match (state, outcome) {
        (CircuitState::HalfOpen, CallOutcome::Success) if trial => RecordUpdate::Close,
        (CircuitState::HalfOpen, CallOutcome::Failure) if trial => RecordUpdate::Store(opened(failures, now_ms)),
        (CircuitState::Closed, CallOutcome::Failure) => {
            let failure_count = failures.saturating_add(1);
            if failure_count >= params.failure_threshold {
                RecordUpdate::Store(opened(failure_count, now_ms))
            } else {
                RecordUpdate::Store(CircuitRecord {
                    state: CircuitState::Closed,
                    failure_count,
                    opened_at_ms: 0,
                    trial_started_at_ms: None,
                })
            }
        }
        _ => RecordUpdate::Unchanged,
    }
}

/// Time until a trial may run; 0 when calls are admitted.
pub fn retry_after_ms(record: Option<&CircuitRecord>, now_ms: u64, params: CircuitParams) -> u64 {
    match admit(record, now_ms, params).0 {
        Admission::Reject { retry_after_ms } => retry_after_ms,
        Admission::Admit { .. } => 0,
    }
}

fn opened(failure_count: u32, now_ms: u64) -> CircuitRecord {
    CircuitRecord {
        state: CircuitState::Open,
        failure_count,
        opened_at_ms: now_ms,
        trial_started_at_ms: None,
    }
}

fn claim_trial(record: &CircuitRecord, now_ms: u64) -> CircuitRecord {
    CircuitRecord {
        state: CircuitState::HalfOpen,
        failure_count: record.failure_count,
        opened_at_ms: record.opened_at_ms,
        trial_started_at_ms: Some(now_ms),
    }
}

#[inline]
fn recovery_elapsed(since_ms: u64, now_ms: u64, params: CircuitParams) -> bool {
    now_ms.saturating_sub(since_ms) >= params.recovery_timeout_ms
}

#[inline]
fn wait_remaining(since_ms: u64, now_ms: u64, params: CircuitParams) -> u64 {
    since_ms.saturating_add(params.recovery_timeout_ms).saturating_sub(now_ms).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: CircuitParams = CircuitParams {
        failure_threshold: 3,
        recovery_timeout_ms: 1_000,
    };

    fn apply(record: Option<CircuitRecord>, update: RecordUpdate) -> Option<CircuitRecord> {
        match update {
            RecordUpdate::Unchanged => record,
            RecordUpdate::Close => None,
            RecordUpdate::Store(r) => Some(r),
        }
    }

    #[test]
    fn opens_at_threshold() {
        let mut record = None;
        for i in 1..=3u32 {
            record = apply(record.clone(), record_outcome(record.as_ref(), CallOutcome::Failure, false, 100, PARAMS));
            assert_eq!(record.as_ref().map(|r| r.failure_count), Some(i));
        }
        let record = record.unwrap();
        assert_eq!(record.state, CircuitState::Open);
        assert_eq!(record.opened_at_ms, 100);
    }

    #[test]
    fn success_while_closed_keeps_count() {
        let record = CircuitRecord {
            state: CircuitState::Closed,
            failure_count: 2,
            opened_at_ms: 0,
            trial_started_at_ms: None,
        };
        let update = record_outcome(Some(&record), CallOutcome::Success, false, 0, PARAMS);
        assert_eq!(update, RecordUpdate::Unchanged);
    }

    #[test]
    fn open_rejects_until_recovery() {
        let record = opened(3, 1_000);
        assert_eq!(admit(Some(&record), 1_400, PARAMS), (Admission::Reject { retry_after_ms: 600 }, None));
        assert_eq!(effective_state(Some(&record), 1_999, PARAMS), CircuitState::Open);
        assert_eq!(effective_state(Some(&record), 2_000, PARAMS), CircuitState::HalfOpen);
    }

    #[test]
    fn first_caller_after_recovery_claims_the_trial() {
        let record = opened(3, 1_000);
        let (admission, claimed) = admit(Some(&record), 2_000, PARAMS);
        assert_eq!(admission, Admission::Admit { trial: true });
        let claimed = claimed.unwrap();
        assert_eq!(claimed.state, CircuitState::HalfOpen);
        assert_eq!(claimed.trial_started_at_ms, Some(2_000));

        // Second caller while the trial runs is rejected.
        let (admission, _) = admit(Some(&claimed), 2_100, PARAMS);
        assert!(matches!(admission, Admission::Reject { .. }));
    }

    #[test]
    fn abandoned_trial_is_reclaimed() {
        let mut record = opened(3, 0);
        record.state = CircuitState::HalfOpen;
        record.trial_started_at_ms = Some(5_000);
        let (admission, claimed) = admit(Some(&record), 6_000, PARAMS);
        assert_eq!(admission, Admission::Admit { trial: true });
        assert_eq!(claimed.unwrap().trial_started_at_ms, Some(6_000));
    }

    #[test]
    fn trial_success_closes() {
        let (_, claimed) = admit(Some(&opened(3, 0)), 1_000, PARAMS);
        let update = record_outcome(claimed.as_ref(), CallOutcome::Success, true, 1_010, PARAMS);
        assert_eq!(update, RecordUpdate::Close);
    }

    #[test]
    fn trial_failure_rearms_open() {
        let (_, claimed) = admit(Some(&opened(3, 0)), 1_000, PARAMS);
        match record_outcome(claimed.as_ref(), CallOutcome::Failure, true, 1_010, PARAMS) {
            RecordUpdate::Store(r) => {
                assert_eq!(r.state, CircuitState::Open);
                assert_eq!(r.opened_at_ms, 1_010);
            }
            other => panic!("expected re-open, got {other:?}"),
        }
    }

    #[test]
    fn late_failure_does_not_rearm() {
        let record = opened(3, 1_000);
        let update = record_outcome(Some(&record), CallOutcome::Failure, false, 1_500, PARAMS);
        assert_eq!(update, RecordUpdate::Unchanged);
    }
}
