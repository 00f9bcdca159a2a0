//! Process-local fixed window counter.

use std::sync::Arc;

use dashmap::DashMap;
use rampart_constants::coordination::MAX_FALLBACK_IDENTITIES;
use rampart_time::TimeProvider;
use tracing::debug;

use super::DecisionSource;
use super::RateDecision;

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at_ms: u64,
    count: u64,
}

/// Fixed window counter used while the coordination store is unreachable.
///
/// Counts are private to this process, so a fleet of N processes admits up
/// to N times the configured limit during an outage.
pub struct LocalWindowLimiter {
    window_ms: u64,
    windows: DashMap<String, Window>,
    clock: Arc<dyn TimeProvider>,
}

impl LocalWindowLimiter {
    pub fn new(window_ms: u64, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            window_ms: window_ms.max(1),
            windows: DashMap::new(),
            clock,
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Number of identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    /// Admit one request for `key` if fewer than `limit` were admitted in the
    /// current window.
    pub fn check(&self, key: &str, limit: u64) -> RateDecision {
        let now_ms = self.clock.now_unix_ms();

        if !self.windows.contains_key(key) && self.windows.len() >= MAX_FALLBACK_IDENTITIES {
            self.evict_expired(now_ms);
            if self.windows.len() >= MAX_FALLBACK_IDENTITIES {
                debug!(key, "fallback table full, admitting untracked");
                return self.decision(true, limit, limit, self.window_ms);
            }
        }

        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            started_at_ms: now_ms,
            count: 0,
        });
        let window = entry.value_mut();
        if now_ms.saturating_sub(window.started_at_ms) >= self.window_ms {
            *window = Window {
                started_at_ms: now_ms,
                count: 0,
            };
        }

        let reset_after_ms = window.started_at_ms.saturating_add(self.window_ms).saturating_sub(now_ms);
        if window.count < limit {
            window.count += 1;
            let remaining = limit - window.count;
            self.decision(true, limit, remaining, reset_after_ms)
        } else {
            self.decision(false, limit, 0, reset_after_ms)
        }
    }

    fn decision(&self, allowed: bool, limit: u64, remaining: u64, reset_after_ms: u64) -> RateDecision {
        RateDecision {
            allowed,
            limit,
            remaining,
            reset_after_ms,
            retry_after_ms: if allowed { 0 } else { reset_after_ms.max(1) },
            source: DecisionSource::LocalFallback,
        }
    }

    fn evict_expired(&self, now_ms: u64) {
        self.windows.retain(|_, w| now_ms.saturating_sub(w.started_at_ms) < self.window_ms);
    }
}
