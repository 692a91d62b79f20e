//! Monotonic timestamps and the elapsed-time accumulator.
//!
//! Nothing here reads a hardware clock. Callers sample their own monotonic
//! source (Embassy's `Instant` on the MCU, `std::time::Instant` on the host)
//! and pass the result in as a [`Timestamp`], which keeps every timing rule
//! deterministic under test.

use core::{ops::Add, time::Duration};

/// Millisecond timestamp on the caller's monotonic clock.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Clock origin.
    pub const ZERO: Self = Self(0);

    /// Builds a timestamp from milliseconds since the clock origin.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the clock origin.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Returns the time from `earlier` to `self`, clamped at zero.
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let millis = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }
}

/// Converts a duration to whole seconds, truncating any fraction.
#[must_use]
pub fn whole_seconds(duration: Duration) -> u32 {
    u32::try_from(duration.as_secs()).unwrap_or(u32::MAX)
}

/// Start/pause/reset stopwatch for one timed quantity.
///
/// The accumulated value only grows while the stopwatch runs and is frozen
/// while paused. `start` and `pause` are idempotent, so a second `start`
/// cannot move the interval origin and inflate the reading.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TimerAccumulator {
    accumulated: Duration,
    started_at: Timestamp,
    running: bool,
}

impl TimerAccumulator {
    /// Creates a stopped accumulator reading zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            accumulated: Duration::ZERO,
            started_at: Timestamp::ZERO,
            running: false,
        }
    }

    /// Begins a running interval. No-op while already running.
    pub fn start(&mut self, now: Timestamp) {
        if !self.running {
            self.started_at = now;
            self.running = true;
        }
    }

    /// Folds the running interval into the accumulated value. No-op while paused.
    pub fn pause(&mut self, now: Timestamp) {
        if self.running {
            self.accumulated += now.saturating_duration_since(self.started_at);
            self.running = false;
        }
    }

    /// Stops the accumulator and clears the accumulated value.
    pub fn reset(&mut self) {
        self.running = false;
        self.accumulated = Duration::ZERO;
    }

    /// Returns `true` while an interval is being timed.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Total time accrued, including the running interval.
    #[must_use]
    pub fn elapsed(&self, now: Timestamp) -> Duration {
        if self.running {
            self.accumulated + now.saturating_duration_since(self.started_at)
        } else {
            self.accumulated
        }
    }

    /// Whole seconds accrued; fractions are truncated.
    #[must_use]
    pub fn elapsed_seconds(&self, now: Timestamp) -> u32 {
        whole_seconds(self.elapsed(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: u64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    #[test]
    fn accumulates_across_pause_and_resume() {
        let mut timer = TimerAccumulator::new();

        timer.start(at(1_000));
        timer.pause(at(2_400));
        timer.start(at(10_000));
        timer.pause(at(11_700));

        // 1_400 ms + 1_700 ms
        assert_eq!(timer.elapsed(at(50_000)), Duration::from_millis(3_100));
        assert_eq!(timer.elapsed_seconds(at(50_000)), 3);
    }

    #[test]
    fn double_start_keeps_original_origin() {
        let mut timer = TimerAccumulator::new();

        timer.start(at(500));
        timer.start(at(4_000));

        assert_eq!(timer.elapsed(at(5_500)), Duration::from_millis(5_000));
    }

    #[test]
    fn double_pause_does_not_add_time() {
        let mut timer = TimerAccumulator::new();

        timer.start(at(0));
        timer.pause(at(2_000));
        timer.pause(at(9_000));

        assert_eq!(timer.elapsed(at(9_000)), Duration::from_millis(2_000));
        assert!(!timer.is_running());
    }

    #[test]
    fn elapsed_is_frozen_while_paused() {
        let mut timer = TimerAccumulator::new();

        timer.start(at(100));
        timer.pause(at(1_100));

        assert_eq!(timer.elapsed(at(1_100)), timer.elapsed(at(99_000)));
    }

    #[test]
    fn seconds_truncate_instead_of_rounding() {
        let mut timer = TimerAccumulator::new();

        timer.start(at(0));
        assert_eq!(timer.elapsed_seconds(at(1_999)), 1);
        assert_eq!(timer.elapsed_seconds(at(999)), 0);
    }

    #[test]
    fn reset_restarts_from_zero() {
        let mut timer = TimerAccumulator::new();

        timer.start(at(0));
        timer.reset();
        assert_eq!(timer.elapsed_seconds(at(8_000)), 0);
        assert!(!timer.is_running());

        timer.start(at(8_000));
        assert_eq!(timer.elapsed(at(9_250)), Duration::from_millis(1_250));
    }

    #[test]
    fn reset_while_paused_clears_accumulated_value() {
        let mut timer = TimerAccumulator::new();

        timer.start(at(0));
        timer.pause(at(3_000));
        timer.reset();

        assert_eq!(timer.elapsed(at(3_000)), Duration::ZERO);
    }

    #[test]
    fn timestamp_addition_saturates() {
        let late = Timestamp::from_millis(u64::MAX - 1);
        assert_eq!(late + Duration::from_millis(10), Timestamp::from_millis(u64::MAX));
        assert_eq!(
            Timestamp::from_millis(10).saturating_duration_since(Timestamp::from_millis(20)),
            Duration::ZERO
        );
    }
}
