//! Circuit breaker backed by the coordination store.
//!
//! States:
//! - Closed: calls proceed, failures are counted
//! - Open: calls fail fast until the recovery timeout elapses
//! - HalfOpen: one trial call decides between Closed and Open
//!
//! The record lives under `circuit:{service}` so every process calling the
//! same dependency shares one breaker. If the store is unreachable the
//! breaker behaves as closed: the operation always runs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use rampart_constants::coordination::CIRCUIT_RECORD_TTL_MS;
use rampart_constants::coordination::DEFAULT_FAILURE_THRESHOLD;
use rampart_constants::coordination::DEFAULT_RECOVERY_TIMEOUT_MS;
use rampart_core::KeyValueStore;
use rampart_core::WriteRequest;
use rampart_time::TimeProvider;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::error::BreakerError;
use crate::error::CoordinationError;
use crate::pure::circuit;
use crate::pure::escape_key_segment;
use crate::pure::Admission;
use crate::pure::CallOutcome;
use crate::pure::CircuitParams;
use crate::pure::RecordUpdate;
use crate::script::AtomicScript;
use crate::script::ScriptRunner;
use crate::script::ScriptStep;
use crate::types::CircuitRecord;
use crate::types::CircuitSnapshot;
use crate::types::CircuitState;

/// Breaker thresholds for one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures since the last close that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit fails fast.
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout_ms: DEFAULT_RECOVERY_TIMEOUT_MS,
        }
    }
}

impl CircuitBreakerConfig {
    fn params(&self) -> CircuitParams {
        CircuitParams {
            failure_threshold: self.failure_threshold.max(1),
            recovery_timeout_ms: self.recovery_timeout_ms,
        }
    }
}

fn parse_record(key: &str, current: Option<&str>) -> Result<Option<CircuitRecord>, CoordinationError> {
    current
        .map(|json| {
            serde_json::from_str(json).map_err(|_| CoordinationError::CorruptedData {
                key: key.to_string(),
                reason: "invalid circuit record JSON".to_string(),
            })
        })
        .transpose()
}

fn store_record(record: &CircuitRecord) -> Result<(String, Option<u64>), CoordinationError> {
    Ok((serde_json::to_string(record)?, Some(CIRCUIT_RECORD_TTL_MS)))
}

struct AdmitCall<'a> {
    key: &'a str,
    params: CircuitParams,
}

impl AtomicScript for AdmitCall<'_> {
    type Output = Admission;

    fn name(&self) -> &'static str {
        "circuit_admit"
    }

    fn execute(&self, current: Option<&str>, now_ms: u64) -> Result<ScriptStep<Admission>, CoordinationError> {
        let record = parse_record(self.key, current)?;
        match circuit::admit(record.as_ref(), now_ms, self.params) {
            (admission, Some(claimed)) => {
                let (value, ttl_ms) = store_record(&claimed)?;
                Ok(ScriptStep::put(value, ttl_ms, admission))
            }
            (admission, None) => Ok(ScriptStep::keep(admission)),
        }
    }
}

/// State before and after folding an outcome.
type Transition = (CircuitState, CircuitState);

struct RecordOutcome<'a> {
    key: &'a str,
    params: CircuitParams,
    outcome: CallOutcome,
    trial: bool,
}

impl AtomicScript for RecordOutcome<'_> {
    type Output = Transition;

    fn name(&self) -> &'static str {
        "circuit_record"
    }

    fn execute(&self, current: Option<&str>, now_ms: u64) -> Result<ScriptStep<Transition>, CoordinationError> {
        let record = parse_record(self.key, current)?;
        let before = record.as_ref().map_or(CircuitState::Closed, |r| r.state);
        match circuit::record_outcome(record.as_ref(), self.outcome, self.trial, now_ms, self.params) {
            RecordUpdate::Unchanged => Ok(ScriptStep::keep((before, before))),
            RecordUpdate::Close => Ok(ScriptStep::delete((before, CircuitState::Closed))),
            RecordUpdate::Store(next) => {
                let after = next.state;
                let (value, ttl_ms) = store_record(&next)?;
                Ok(ScriptStep::put(value, ttl_ms, (before, after)))
            }
        }
    }
}

/// Three-state health gate for one named dependency.
pub struct CircuitBreaker<S: KeyValueStore + ?Sized> {
    service: String,
    key: String,
    config: CircuitBreakerConfig,
    runner: ScriptRunner<S>,
}

impl<S: KeyValueStore + ?Sized> CircuitBreaker<S> {
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn TimeProvider>,
        service: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Self {
        let service = service.into();
        Self {
            key: format!("circuit:{}", escape_key_segment(&service)),
            service,
            config,
            runner: ScriptRunner::new(store, clock),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Effective record at this instant.
    pub async fn snapshot(&self) -> Result<CircuitSnapshot, CoordinationError> {
        let record = parse_record(&self.key, self.runner.read(&self.key).await?.as_deref())?;
        let now_ms = self.runner.now_ms();
        let params = self.config.params();
        Ok(CircuitSnapshot {
            service: self.service.clone(),
            state: circuit::effective_state(record.as_ref(), now_ms, params),
            failure_count: record.as_ref().map_or(0, |r| r.failure_count),
            opened_at_ms: record.as_ref().map(|r| r.opened_at_ms).filter(|&at| at > 0),
            retry_after_ms: circuit::retry_after_ms(record.as_ref(), now_ms, params),
        })
    }

    /// Effective state; CLOSED when the store cannot be read.
    pub async fn state(&self) -> CircuitState {
        match self.snapshot().await {
            Ok(snapshot) => snapshot.state,
            Err(e) => {
                warn!(service = %self.service, error = %e, "circuit store unavailable, reporting closed");
                CircuitState::Closed
            }
        }
    }

    /// Force the circuit closed and clear its failure count.
    pub async fn reset(&self) -> Result<(), CoordinationError> {
        self.runner.store().write(WriteRequest::delete(&self.key)).await?;
        tracing::info!(service = %self.service, "circuit reset");
        Ok(())
    }

    /// Run `operation` through the breaker. Every `Err` counts as a failure.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_with(operation, |_| true).await
    }

    /// Run `operation` through the breaker, counting only errors for which
    /// `is_failure` returns true. Other errors count as successful calls.
    pub async fn call_with<F, Fut, T, E, C>(&self, operation: F, is_failure: C) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
    {
        let params = self.config.params();
        let admit = AdmitCall { key: &self.key, params };

        let trial = match self.runner.run(&self.key, &admit).await {
            Ok(Admission::Admit { trial }) => Some(trial),
            Ok(Admission::Reject { retry_after_ms }) => {
                debug!(service = %self.service, retry_after_ms, "circuit open, failing fast");
                return Err(BreakerError::Open {
                    service: self.service.clone(),
                    retry_after_ms,
                });
            }
            Err(e) => {
                warn!(service = %self.service, error = %e, "circuit store unavailable, treating as closed");
                None
            }
        };

        let result = operation().await;

        // Degraded calls are not recorded.
        if let Some(trial) = trial {
            let outcome = match &result {
                Err(e) if is_failure(e) => CallOutcome::Failure,
                _ => CallOutcome::Success,
            };
            self.record(outcome, trial).await;
        }

        result.map_err(BreakerError::Inner)
    }

    async fn record(&self, outcome: CallOutcome, trial: bool) {
        let script = RecordOutcome {
            key: &self.key,
            params: self.config.params(),
            outcome,
            trial,
        };
        match self.runner.run(&self.key, &script).await {
            Ok((before, after)) if before != after => {
                tracing::info!(service = %self.service, from = %before, to = %after, "circuit state changed");
            }
            Ok(_) => {}
            Err(e) => warn!(service = %self.service, error = %e, "failed to record call outcome"),
        }
    }
}

/// Breakers keyed by dependency name, with per-service overrides.
pub struct CircuitBreakerRegistry<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn TimeProvider>,
    defaults: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker<S>>>,
}

impl<S: KeyValueStore + ?Sized> CircuitBreakerRegistry<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn TimeProvider>, defaults: CircuitBreakerConfig) -> Self {
        Self {
            store,
            clock,
            defaults,
            overrides: HashMap::new(),
            breakers: DashMap::new(),
        }
    }

    /// Use `config` instead of the defaults for `service`.
    pub fn with_override(mut self, service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        self.overrides.insert(service.into(), config);
        self
    }

    pub fn config_for(&self, service: &str) -> CircuitBreakerConfig {
        self.overrides.get(service).copied().unwrap_or(self.defaults)
    }

    /// The breaker for `service`, created on first use.
    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker<S>> {
        if let Some(existing) = self.breakers.get(service) {
            return existing.clone();
        }
        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    self.store.clone(),
                    self.clock.clone(),
                    service,
                    self.config_for(service),
                ))
            })
            .clone()
    }

    /// Run `operation` through `service`'s breaker.
    pub async fn guarded<F, Fut, T, E>(&self, service: &str, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.breaker(service).call(operation).await
    }
}
