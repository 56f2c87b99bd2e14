//! Fixed-interval scheduler.
//!
//! Ticks fall on `start + k * interval`. Runs are strictly sequential: a tick
//! that passes while a run is still in progress is skipped, never replayed.
//! A failed run is logged by the caller and the loop carries on.

use crate::config::{ConfigError, ScheduleConfig, MAX_INTERVAL_SECS};
use chrono::{DateTime, Duration as TimeDelta, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Longest single sleep, so a stop request is noticed while waiting.
const MAX_SLEEP: Duration = Duration::from_secs(1);

/// Time source for the scheduler loop.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Tick grid anchored at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    start: DateTime<Utc>,
    interval_ms: i64,
}

impl Schedule {
    pub fn new(start: DateTime<Utc>, interval: Duration) -> Result<Self, ConfigError> {
        if interval.as_secs() > MAX_INTERVAL_SECS {
            return Err(ConfigError::IntervalTooLarge(interval.as_secs()));
        }
        // Bounded above; fits in an i64.
        let interval_ms = interval.as_millis() as i64;
        if interval_ms <= 0 {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(Self { start, interval_ms })
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self, ConfigError> {
        Self::new(config.start, Duration::from_secs(config.interval_secs))
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms as u64)
    }

    /// First tick at or after `at`.
    pub fn next_at_or_after(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        if at <= self.start {
            return self.start;
        }
        let elapsed = (at - self.start).num_milliseconds();
        self.tick(self.steps_ceil(elapsed))
    }

    /// First tick strictly after `at`.
    pub fn next_after(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        if at < self.start {
            return self.start;
        }
        let elapsed = (at - self.start).num_milliseconds();
        self.tick((elapsed / self.interval_ms).saturating_add(1))
    }

    /// Number of ticks strictly between `after` and `before`.
    pub fn ticks_between(&self, after: DateTime<Utc>, before: DateTime<Utc>) -> u64 {
        let first = self.next_after(after);
        if first >= before {
            return 0;
        }
        let span = (before - first).num_milliseconds();
        self.steps_ceil(span) as u64
    }

    /// Whole intervals needed to cover `elapsed_ms` (non-negative), rounded up.
    fn steps_ceil(&self, elapsed_ms: i64) -> i64 {
        elapsed_ms / self.interval_ms + i64::from(elapsed_ms % self.interval_ms != 0)
    }

    /// `start + steps * interval`, clamped to the latest representable instant.
    fn tick(&self, steps: i64) -> DateTime<Utc> {
        steps
            .checked_mul(self.interval_ms)
            .and_then(TimeDelta::try_milliseconds)
            .and_then(|offset| self.start.checked_add_signed(offset))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Loop controls.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerOptions {
    /// Run at once if `start` has already passed, instead of waiting for the next tick.
    pub run_on_start: bool,
    /// Stop after this many runs.
    pub max_runs: Option<u64>,
}

/// What the loop did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub runs: u64,
    pub failures: u64,
    pub skipped_ticks: u64,
}

/// Drive `run` on every tick until `stop` is set or `max_runs` is reached.
///
/// `run` receives the 1-based run number and reports whether it succeeded.
pub fn run_scheduled<C, F>(
    schedule: &Schedule,
    options: SchedulerOptions,
    clock: &C,
    stop: &AtomicBool,
    mut run: F,
) -> SchedulerSummary
where
    C: Clock,
    F: FnMut(u64) -> bool,
{
    let mut summary = SchedulerSummary::default();

    let now = clock.now();
    let mut next = if options.run_on_start && now >= schedule.start() {
        now
    } else {
        schedule.next_at_or_after(now)
    };
    info!(first_run = %next, interval_secs = schedule.interval().as_secs(), "scheduler started");

    loop {
        if options.max_runs.is_some_and(|max| summary.runs >= max) {
            break;
        }
        if !wait_until(clock, next, stop) {
            break;
        }

        summary.runs += 1;
        if !run(summary.runs) {
            summary.failures += 1;
        }

        let finished = clock.now();
        let upcoming = schedule
            .next_after(next)
            .max(schedule.next_at_or_after(finished));
        let missed = schedule.ticks_between(next, upcoming);
        if missed > 0 {
            warn!(missed, "skipped ticks that passed while a run was in progress");
            summary.skipped_ticks += missed;
        }
        next = upcoming;
    }

    info!(
        runs = summary.runs,
        failures = summary.failures,
        skipped = summary.skipped_ticks,
        "scheduler stopped"
    );
    summary
}

/// Sleep until `deadline`. Returns false if `stop` was set first.
fn wait_until<C: Clock>(clock: &C, deadline: DateTime<Utc>, stop: &AtomicBool) -> bool {
    loop {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let now = clock.now();
        if now >= deadline {
            return true;
        }
        let remaining = (deadline - now).to_std().unwrap_or(Duration::ZERO);
        clock.sleep(remaining.min(MAX_SLEEP));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FakeClock {
        now: Cell<DateTime<Utc>>,
    }

    impl FakeClock {
        fn at(now: DateTime<Utc>) -> Self {
            Self { now: Cell::new(now) }
        }

        fn advance(&self, by: Duration) {
            self.now.set(self.now.get() + TimeDelta::from_std(by).unwrap());
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            self.now.get()
        }

        fn sleep(&self, duration: Duration) {
            self.advance(duration);
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_737_763_200 + secs, 0).unwrap()
    }

    fn minutely() -> Schedule {
        Schedule::new(t(0), Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert_eq!(
            Schedule::new(t(0), Duration::ZERO),
            Err(ConfigError::ZeroInterval)
        );
    }

    #[test]
    fn oversized_interval_is_rejected() {
        let config = ScheduleConfig {
            interval_secs: u64::MAX,
            ..ScheduleConfig::default()
        };
        assert_eq!(
            Schedule::from_config(&config),
            Err(ConfigError::IntervalTooLarge(u64::MAX))
        );
    }

    #[test]
    fn longest_interval_and_far_instants_do_not_overflow() {
        let s = Schedule::new(t(0), Duration::from_secs(MAX_INTERVAL_SECS)).unwrap();
        let year = MAX_INTERVAL_SECS as i64;
        assert_eq!(s.next_at_or_after(t(1)), t(year));
        assert_eq!(s.next_after(t(year)), t(2 * year));
        assert_eq!(s.ticks_between(t(0), t(3 * year)), 2);

        let far = DateTime::<Utc>::MAX_UTC - TimeDelta::seconds(1);
        assert!(s.next_at_or_after(far) >= far);
        assert!(s.next_after(far) > far);
    }

    #[test]
    fn next_tick_arithmetic() {
        let s = minutely();
        assert_eq!(s.next_at_or_after(t(-500)), t(0));
        assert_eq!(s.next_at_or_after(t(0)), t(0));
        assert_eq!(s.next_at_or_after(t(1)), t(60));
        assert_eq!(s.next_at_or_after(t(120)), t(120));
        assert_eq!(s.next_after(t(120)), t(180));
        assert_eq!(s.next_after(t(-10)), t(0));
    }

    #[test]
    fn ticks_between_is_exclusive() {
        let s = minutely();
        assert_eq!(s.ticks_between(t(0), t(60)), 0);
        assert_eq!(s.ticks_between(t(0), t(240)), 3);
        assert_eq!(s.ticks_between(t(30), t(240)), 3);
    }

    #[test]
    fn waits_for_first_tick_when_not_running_on_start() {
        let clock = FakeClock::at(t(30));
        let stop = AtomicBool::new(false);
        let mut started_at = Vec::new();

        let summary = run_scheduled(
            &minutely(),
            SchedulerOptions {
                run_on_start: false,
                max_runs: Some(2),
            },
            &clock,
            &stop,
            |_| {
                started_at.push(clock.now());
                true
            },
        );

        assert_eq!(summary.runs, 2);
        assert_eq!(started_at, vec![t(60), t(120)]);
    }

    #[test]
    fn run_on_start_fires_immediately_then_follows_the_grid() {
        let clock = FakeClock::at(t(30));
        let stop = AtomicBool::new(false);
        let mut started_at = Vec::new();

        run_scheduled(
            &minutely(),
            SchedulerOptions {
                run_on_start: true,
                max_runs: Some(2),
            },
            &clock,
            &stop,
            |_| {
                started_at.push(clock.now());
                true
            },
        );

        assert_eq!(started_at, vec![t(30), t(60)]);
    }

    #[test]
    fn slow_runs_skip_missed_ticks() {
        let clock = FakeClock::at(t(0));
        let stop = AtomicBool::new(false);
        let mut started_at = Vec::new();

        let summary = run_scheduled(
            &minutely(),
            SchedulerOptions {
                run_on_start: true,
                max_runs: Some(2),
            },
            &clock,
            &stop,
            |n| {
                started_at.push(clock.now());
                if n == 1 {
                    // Overruns the ticks at 60, 120 and 180.
                    clock.advance(Duration::from_secs(200));
                }
                true
            },
        );

        assert_eq!(started_at, vec![t(0), t(240)]);
        assert_eq!(summary.skipped_ticks, 3);
    }

    #[test]
    fn failures_do_not_stop_the_loop() {
        let clock = FakeClock::at(t(0));
        let stop = AtomicBool::new(false);

        let summary = run_scheduled(
            &minutely(),
            SchedulerOptions {
                run_on_start: true,
                max_runs: Some(3),
            },
            &clock,
            &stop,
            |n| n != 2,
        );

        assert_eq!(summary.runs, 3);
        assert_eq!(summary.failures, 1);
    }

    #[test]
    fn stop_flag_ends_the_loop_between_runs() {
        let clock = FakeClock::at(t(0));
        let stop = AtomicBool::new(false);

        let summary = run_scheduled(
            &minutely(),
            SchedulerOptions {
                run_on_start: true,
                max_runs: None,
            },
            &clock,
            &stop,
            |n| {
                if n == 2 {
                    stop.store(true, Ordering::SeqCst);
                }
                true
            },
        );

        assert_eq!(summary.runs, 2);
    }

    /// Clock whose sleeps raise the stop flag, as an interrupt arriving mid-wait would.
    struct InterruptingClock<'a> {
        inner: FakeClock,
        stop: &'a AtomicBool,
    }

    impl Clock for InterruptingClock<'_> {
        fn now(&self) -> DateTime<Utc> {
            self.inner.now()
        }

        fn sleep(&self, duration: Duration) {
            self.inner.sleep(duration);
            self.stop.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn stop_during_a_wait_ends_the_loop_without_running() {
        let stop = AtomicBool::new(false);
        let clock = InterruptingClock {
            inner: FakeClock::at(t(30)),
            stop: &stop,
        };

        let summary = run_scheduled(
            &minutely(),
            SchedulerOptions {
                run_on_start: false,
                max_runs: None,
            },
            &clock,
            &stop,
            |_| true,
        );

        assert_eq!(summary, SchedulerSummary::default());
        // Woke once, saw the flag, never reached the tick at 60.
        assert_eq!(clock.now(), t(31));
    }
}
