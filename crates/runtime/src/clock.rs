//! Monotonic clock abstraction
//!
//! Wait blocks, glides and the stuck detector all read a monotonic
//! clock in seconds. The runtime takes the clock as a handle so tests
//! can drive time by hand and runs stay deterministic.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Monotonic time source, in seconds since an arbitrary origin.
pub trait Clock {
    fn now(&self) -> f64;
}

/// Wall clock, anchored at construction.
pub struct RealClock {
    start: Instant,
}

impl RealClock {
    pub fn new() -> Self {
        RealClock {
            start: Instant::now(),
        }
    }
}

impl Default for RealClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RealClock {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock for tests. Clone the `Rc` to keep a handle for
/// advancing time while the runtime owns the other.
pub struct MockClock {
    now: Cell<f64>,
}

impl MockClock {
    pub fn new() -> Rc<MockClock> {
        Rc::new(MockClock { now: Cell::new(0.0) })
    }

    pub fn advance(&self, secs: f64) {
        self.now.set(self.now.get() + secs);
    }

    pub fn set(&self, secs: f64) {
        self.now.set(secs);
    }
}

impl Clock for MockClock {
    fn now(&self) -> f64 {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_clock_monotonic() {
        let c = RealClock::new();
        let a = c.now();
        let b = c.now();
        assert!(b >= a);
    }

    #[test]
    fn test_mock_clock_advance() {
        let c = MockClock::new();
        assert_eq!(c.now(), 0.0);
        c.advance(1.5);
        assert_eq!(c.now(), 1.5);
        c.set(10.0);
        assert_eq!(c.now(), 10.0);
    }
}
