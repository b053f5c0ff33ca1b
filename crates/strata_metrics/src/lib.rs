//! Strata Metrics - bookkeeping for commit cycles
//!
//! Counters and timers the allocator feeds while it compacts columns.
//! Everything here compiles down to zero-sized no-ops unless the
//! `metrics` feature is enabled, so the allocator can call into it
//! unconditionally.
//!
//! # Feature Flags
//!
//! - `metrics` - Enable metrics collection (default: disabled)
//!
//! # Usage
//!
//! ```ignore
//! use strata_metrics::{CommitTimer, Counter};
//!
//! let mut timer = CommitTimer::new(32); // keep the last 32 commits
//! let mut counter = Counter::new();
//! timer.begin();
//! // ... compact ...
//! timer.end();
//! counter.increment("commits", 1);
//! ```

#[cfg(feature = "metrics")]
mod commit_timer;
#[cfg(feature = "metrics")]
mod counter;
#[cfg(feature = "metrics")]
mod phase_profiler;
#[cfg(feature = "metrics")]
mod ring_buffer;

#[cfg(feature = "metrics")]
pub use commit_timer::CommitTimer;
#[cfg(feature = "metrics")]
pub use counter::Counter;
#[cfg(feature = "metrics")]
pub use phase_profiler::PhaseProfiler;
#[cfg(feature = "metrics")]
pub use ring_buffer::RingBuffer;

/// Whether this build records anything at all.
pub const ENABLED: bool = cfg!(feature = "metrics");

// ============================================================================
// Macros
// ============================================================================

/// Time a commit phase (zero-cost when metrics disabled)
#[macro_export]
macro_rules! time_phase {
    ($profiler:expr, $name:expr, $body:block) => {
        $profiler.time_phase($name, || $body)
    };
}

// ============================================================================
// No-op stubs when metrics disabled
// ============================================================================

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct CommitTimer;

#[cfg(not(feature = "metrics"))]
impl CommitTimer {
    pub fn new(_capacity: usize) -> Self { Self }
    pub fn begin(&mut self) {}
    pub fn end(&mut self) {}
    pub fn samples(&self) -> usize { 0 }
    pub fn average_ms(&self) -> f64 { 0.0 }
    pub fn range_ms(&self) -> (f64, f64) { (0.0, 0.0) }
}

#[cfg(not(feature = "metrics"))]
#[derive(Debug)]
pub struct RingBuffer<T>(std::marker::PhantomData<T>);

#[cfg(not(feature = "metrics"))]
impl<T> RingBuffer<T> {
    pub fn new(_capacity: usize) -> Self { Self(std::marker::PhantomData) }
    pub fn push(&mut self, _value: T) {}
    pub fn len(&self) -> usize { 0 }
    pub fn is_empty(&self) -> bool { true }
}

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct Counter;

#[cfg(not(feature = "metrics"))]
impl Counter {
    pub fn new() -> Self { Self }
    pub fn increment(&mut self, _name: &'static str, _value: usize) {}
    pub fn get(&self, _name: &str) -> usize { 0 }
    pub fn reset_all(&mut self) {}
    pub fn snapshot(&self) -> Vec<(&'static str, usize)> { Vec::new() }
}

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct PhaseProfiler;

#[cfg(not(feature = "metrics"))]
impl PhaseProfiler {
    pub fn new() -> Self { Self }
    pub fn time_phase<F, R>(&mut self, _name: &'static str, f: F) -> R where F: FnOnce() -> R { f() }
    pub fn total(&self, _name: &str) -> std::time::Duration { std::time::Duration::ZERO }
    pub fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_api_is_callable_in_every_build() {
        let mut timer = super::CommitTimer::new(8);
        timer.begin();
        timer.end();

        let mut counter = super::Counter::new();
        counter.increment("commits", 1);

        let mut profiler = super::PhaseProfiler::new();
        let value = time_phase!(profiler, "plan", { 2 + 2 });
        assert_eq!(value, 4);

        let mut buffer = super::RingBuffer::<std::time::Duration>::new(4);
        buffer.push(std::time::Duration::from_millis(1));

        if super::ENABLED {
            assert_eq!(counter.get("commits"), 1);
            assert_eq!(timer.samples(), 1);
        } else {
            assert_eq!(counter.get("commits"), 0);
            assert!(buffer.is_empty());
        }
    }
}
