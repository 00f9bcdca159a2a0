//! Wall-clock time for coordination records.
//!
//! Every record the primitives write (bucket refill times, lock acquisition,
//! circuit `opened_at`, revocation expiry) is stamped with Unix milliseconds.
//! Time is read through [`TimeProvider`] so that refill, window rollover and
//! recovery timeouts can be driven explicitly in tests.
//!
//! # Tiger Style
//!
//! - No `.expect()` or `.unwrap()`: a clock before the epoch reads as 0
//! - Time is an explicit `u64` of milliseconds everywhere

#[cfg(feature = "simulation")]
use std::sync::atomic::AtomicU64;
#[cfg(feature = "simulation")]
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Current Unix timestamp in milliseconds, or 0 if the clock is before the epoch.
#[inline]
pub fn current_time_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Source of Unix time in milliseconds.
///
/// Shared across tasks as `Arc<dyn TimeProvider>`.
pub trait TimeProvider: Send + Sync {
    /// Current Unix timestamp in milliseconds.
    fn now_unix_ms(&self) -> u64;
}

impl<T: TimeProvider + ?Sized> TimeProvider for Arc<T> {
    #[inline]
    fn now_unix_ms(&self) -> u64 {
        (**self).now_unix_ms()
    }
}

/// Production clock backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    #[inline]
    fn now_unix_ms(&self) -> u64 {
        current_time_ms()
    }
}

/// Shared handle to the system clock.
pub fn system_time() -> Arc<dyn TimeProvider> {
    Arc::new(SystemTimeProvider)
}

/// Manually driven clock for deterministic tests.
///
/// Clones share the same instant, so a clock handed to a store and to the
/// primitives using it stays consistent.
///
/// ```ignore
/// let clock = SimulatedTimeProvider::new(1_000);
/// clock.advance_ms(500);
/// assert_eq!(clock.now_unix_ms(), 1_500);
/// ```
#[cfg(feature = "simulation")]
#[derive(Debug, Clone)]
pub struct SimulatedTimeProvider {
    now_ms: Arc<AtomicU64>,
}

#[cfg(feature = "simulation")]
impl SimulatedTimeProvider {
    /// Start the clock at `initial_ms`.
    pub fn new(initial_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(initial_ms)),
        }
    }

    /// Start the clock at the current system time.
    pub fn from_system_time() -> Self {
        Self::new(current_time_ms())
    }

    /// Move the clock forward.
    pub fn advance_ms(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Move the clock forward by whole seconds.
    pub fn advance_secs(&self, delta_secs: u64) {
        self.advance_ms(delta_secs.saturating_mul(1000));
    }

    /// Jump to an absolute instant.
    pub fn set_ms(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    /// This clock as a shared trait object.
    pub fn shared(&self) -> Arc<dyn TimeProvider> {
        Arc::new(self.clone())
    }
}

#[cfg(feature = "simulation")]
impl Default for SimulatedTimeProvider {
    fn default() -> Self {
        Self::from_system_time()
    }
}

#[cfg(feature = "simulation")]
impl TimeProvider for SimulatedTimeProvider {
    #[inline]
    fn now_unix_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_time_is_after_2020() {
        let year_2020_ms = 1_577_836_800_000u64;
        assert!(current_time_ms() > year_2020_ms);
    }

    #[test]
    fn system_provider_tracks_system_clock() {
        let before = current_time_ms();
        let now = SystemTimeProvider.now_unix_ms();
        let after = current_time_ms();
        assert!(before <= now && now <= after);
    }

    #[test]
    fn arc_provider_delegates() {
        let shared = system_time();
        assert!(shared.now_unix_ms() > 0);
    }

    #[cfg(feature = "simulation")]
    #[test]
    fn simulated_clock_is_shared_between_clones() {
        let clock = SimulatedTimeProvider::new(10_000);
        let other = clock.clone();
        let shared = clock.shared();

        clock.advance_ms(250);
        assert_eq!(other.now_unix_ms(), 10_250);
        assert_eq!(shared.now_unix_ms(), 10_250);

        other.advance_secs(2);
        assert_eq!(clock.now_unix_ms(), 12_250);

        clock.set_ms(5);
        assert_eq!(shared.now_unix_ms(), 5);
    }
}
