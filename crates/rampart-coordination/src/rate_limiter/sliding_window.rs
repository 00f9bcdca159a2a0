//! Distributed sliding window log.

use std::sync::Arc;

use rampart_constants::api::MAX_TTL_MS;
use rampart_constants::coordination::MAX_WINDOW_LIMIT;
use rampart_constants::coordination::WINDOW_TTL_GRACE_MS;
use rampart_core::KeyValueStore;
use rampart_core::WriteRequest;
use rampart_time::TimeProvider;
use tracing::debug;

use super::limiter_key;
use super::validate_limits;
use super::DecisionSource;
use super::RateDecision;
use crate::error::CoordinationError;
use crate::pure::admit_to_window;
use crate::pure::prune_window;
use crate::pure::WindowAdmission;
use crate::script::AtomicScript;
use crate::script::ScriptRunner;
use crate::script::ScriptStep;
use crate::types::WindowState;

struct AdmitToWindow {
    key: String,
    limit: u64,
    window_ms: u64,
}

impl AtomicScript for AdmitToWindow {
    type Output = RateDecision;

    fn name(&self) -> &'static str {
        "sliding_window"
    }

    fn execute(&self, current: Option<&str>, now_ms: u64) -> Result<ScriptStep<RateDecision>, CoordinationError> {
        let mut state: WindowState = match current {
            None => WindowState::default(),
            Some(json) => serde_json::from_str(json).map_err(|_| CoordinationError::CorruptedData {
                key: self.key.clone(),
                reason: "invalid window state JSON".to_string(),
            })?,
        };

        prune_window(&mut state.timestamps_ms, now_ms, self.window_ms);
        match admit_to_window(&mut state.timestamps_ms, now_ms, self.window_ms, self.limit) {
            WindowAdmission::Admitted {
                remaining,
                reset_after_ms,
            } => {
                let ttl_ms = self.window_ms.saturating_add(WINDOW_TTL_GRACE_MS).min(MAX_TTL_MS);
                let decision = RateDecision {
                    allowed: true,
                    limit: self.limit,
                    remaining,
                    reset_after_ms,
                    retry_after_ms: 0,
                    source: DecisionSource::Store,
                };
                Ok(ScriptStep::put(serde_json::to_string(&state)?, Some(ttl_ms), decision))
            }
            WindowAdmission::Rejected {
                retry_after_ms,
                reset_after_ms,
            } => Ok(ScriptStep::keep(RateDecision {
                allowed: false,
                limit: self.limit,
                remaining: 0,
                reset_after_ms,
                retry_after_ms,
                source: DecisionSource::Store,
            })),
        }
    }
}

/// Longest window whose record the store can keep for the whole window.
pub(crate) const MAX_WINDOW_MS: u64 = MAX_TTL_MS - WINDOW_TTL_GRACE_MS;

/// Window length that admits `capacity` requests at `refill_rate` per second.
pub(crate) fn window_for(capacity: u64, refill_rate: f64) -> u64 {
    ((capacity as f64 / refill_rate) * 1000.0).ceil().max(1.0) as u64
}

/// Sliding window rate limiter.
///
/// Keeps the admission timestamps of the last window per identity under
/// `ratelimit:{scope}:{identity}`; a request is admitted while fewer than
/// `limit` timestamps fall inside the window. The record expires one second
/// after the window.
pub struct SlidingWindowLimiter<S: KeyValueStore + ?Sized> {
    runner: ScriptRunner<S>,
    scope: String,
}

impl<S: KeyValueStore + ?Sized> SlidingWindowLimiter<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn TimeProvider>, scope: impl Into<String>) -> Self {
        Self {
            runner: ScriptRunner::new(store, clock),
            scope: scope.into(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Admit one request if fewer than `limit` were admitted in the last
    /// `window_ms`.
    pub async fn check_window(
        &self,
        identity: &str,
        limit: u64,
        window_ms: u64,
    ) -> Result<RateDecision, CoordinationError> {
        if limit == 0 || limit > MAX_WINDOW_LIMIT {
            return Err(CoordinationError::InvalidConfig {
                reason: format!("window limit {limit} outside 1..={MAX_WINDOW_LIMIT}"),
            });
        }
        if window_ms == 0 || window_ms > MAX_WINDOW_MS {
            return Err(CoordinationError::InvalidConfig {
                reason: format!("window {window_ms}ms outside 1..={MAX_WINDOW_MS}ms"),
            });
        }

        let key = limiter_key(&self.scope, identity);
        let script = AdmitToWindow {
            key: key.clone(),
            limit,
            window_ms,
        };
        let decision = self.runner.run(&key, &script).await?;
        debug!(
            key = %key,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "sliding window checked"
        );
        Ok(decision)
    }

    /// Admit one request with `limit = capacity` over a window of
    /// `capacity / refill_rate` seconds.
    pub async fn check(
        &self,
        identity: &str,
        capacity: u64,
        refill_rate: f64,
    ) -> Result<RateDecision, CoordinationError> {
        validate_limits(capacity, refill_rate)?;
        self.check_window(identity, capacity, window_for(capacity, refill_rate)).await
    }

    /// Forget `identity`'s window.
    pub async fn reset(&self, identity: &str) -> Result<(), CoordinationError> {
        let key = limiter_key(&self.scope, identity);
        self.runner.store().write(WriteRequest::delete(key)).await?;
        Ok(())
    }
}
