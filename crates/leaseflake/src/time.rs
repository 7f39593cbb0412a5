use std::{
    sync::Arc,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

/// A source of millisecond timestamps.
///
/// The origin is implementation defined: generators only use differences
/// between readings and anchor them to the store clock when a lease is
/// acquired (`offset = lease.effective_time - current_millis()`).
///
/// # Example
///
/// ```
/// use leaseflake::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1234
///     }
/// }
///
/// assert_eq!(FixedTime.current_millis(), 1234);
/// ```
pub trait TimeSource {
    /// Returns the current reading in milliseconds.
    fn current_millis(&self) -> u64;
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn current_millis(&self) -> u64 {
        (**self).current_millis()
    }
}

/// A monotonic time source counting milliseconds since its construction.
///
/// Immune to wall-clock adjustments (NTP steps, manual changes), so the
/// monotonic-lease generator never observes time going backward. Clones share
/// the same origin.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    fn current_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Wall-clock milliseconds since the UNIX epoch.
///
/// May jump backward when the system clock is adjusted; the wall-clock
/// generator detects this and switches to fallback issuance.
#[derive(Clone, Copy, Debug, Default)]
pub struct WallClock;

impl TimeSource for WallClock {
    fn current_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn monotonic_clock_never_goes_backward() {
        let clock = MonotonicClock::new();
        let mut last = clock.current_millis();
        for _ in 0..1000 {
            let now = clock.current_millis();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn monotonic_clock_advances_with_sleep() {
        let clock = MonotonicClock::new();
        let before = clock.current_millis();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.current_millis() >= before + 5);
    }

    #[test]
    fn wall_clock_is_near_system_time() {
        let expected = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let now = WallClock.current_millis();
        assert!(now.abs_diff(expected) < 1_000);
    }
}
