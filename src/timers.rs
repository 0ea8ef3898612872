//! Phase timing for resolution metrics.

use std::time::{Duration, Instant};

/// Adds the time between construction and drop to `slot`.
///
/// Dropping on every exit path, early `?` returns included, keeps partial phases
/// accounted for.
pub(crate) struct PhaseTimer<'a> {
    start: Instant,
    slot: &'a mut Duration,
}

impl<'a> PhaseTimer<'a> {
    pub(crate) fn new(slot: &'a mut Duration) -> Self {
        Self {
            start: Instant::now(),
            slot,
        }
    }
}

impl Drop for PhaseTimer<'_> {
    fn drop(&mut self) {
        *self.slot += self.start.elapsed();
    }
}

pub(crate) fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_phase_timer_accumulates_into_slot() {
        let mut slot = Duration::ZERO;
        for _ in 0..2 {
            let _timer = PhaseTimer::new(&mut slot);
            thread::sleep(Duration::from_millis(5));
        }
        assert!(slot >= Duration::from_millis(10));
    }

    #[test]
    fn test_as_millis_f64() {
        assert_eq!(as_millis_f64(Duration::from_micros(1_500)), 1.5);
    }
}
