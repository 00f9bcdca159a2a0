use crate::error::RateLimited;

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    /// The shared coordination store.
    Store,
    /// The process-local fallback counter.
    LocalFallback,
    /// An exempt caller; nothing was counted.
    Exempt,
}

/// Outcome of one admission check.
///
/// A denial is a normal value, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Burst capacity or window limit that applied.
    pub limit: u64,
    /// Requests still admissible right now.
    pub remaining: u64,
    /// Time until the limiter is back to full capacity.
    pub reset_after_ms: u64,
    /// Time until the next request could be admitted; 0 when allowed.
    pub retry_after_ms: u64,
    pub source: DecisionSource,
}

impl RateDecision {
    pub(crate) fn exempt() -> Self {
        Self {
            allowed: true,
            limit: u64::MAX,
            remaining: u64::MAX,
            reset_after_ms: 0,
            retry_after_ms: 0,
            source: DecisionSource::Exempt,
        }
    }

    /// Denial for a check the store could not carry out for reasons other
    /// than an outage.
    pub(crate) fn refused(limit: u64, retry_after_ms: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_after_ms: retry_after_ms,
            retry_after_ms,
            source: DecisionSource::Store,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.source == DecisionSource::LocalFallback
    }

    /// HTTP response headers describing this decision.
    ///
    /// Reset and `Retry-After` are whole seconds, rounded up. Exempt callers
    /// get no headers.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        if self.source == DecisionSource::Exempt {
            return Vec::new();
        }
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", ceil_secs(self.reset_after_ms).to_string()),
        ];
        if !self.allowed {
            headers.push(("Retry-After", ceil_secs(self.retry_after_ms).max(1).to_string()));
        }
        headers
    }

    /// `Err` for a denial, for callers that want to use `?`.
    pub fn into_result(self) -> Result<RateDecision, RateLimited> {
        if self.allowed {
            return Ok(self);
        }
        Err(RateLimited {
            limit: self.limit,
            retry_after_ms: self.retry_after_ms,
        })
    }
}

fn ceil_secs(ms: u64) -> u64 {
    ms.div_ceil(1000)
}
