//! Debounced, single-flight triggering of recognition runs
//!
//! The scheduler never sleeps or spawns anything itself. Callers ask it what
//! to do at a given moment (`poll`) and when the next deadline is
//! (`next_deadline`); time is read through a [`Clock`] so tests can drive it
//! with a manual clock.

use std::time::{Duration, Instant};
use tracing::debug;

/// Default quiet period before a triggered run fires
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(450);

/// Source of the current time
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Clock backed by tokio's timer, which can be paused and advanced in tests
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Permission to start one recognition call, stamped with its generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub generation: u64,
}

/// Answer to a manual "run now" request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunNow {
    Dispatch(Dispatch),
    /// A call is already in flight; the request is dropped, not queued
    Busy,
}

/// Whether a completed call still reflects the latest inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Fresh,
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    generation: u64,
    due: Instant,
}

pub struct AutoRunScheduler<C> {
    clock: C,
    quiet_period: Duration,
    generation: u64,
    pending: Option<Pending>,
    in_flight: Option<u64>,
    /// Generation of a timer that fired while busy
    deferred: Option<u64>,
}

impl<C: Clock> AutoRunScheduler<C> {
    pub fn new(clock: C, quiet_period: Duration) -> Self {
        Self {
            clock,
            quiet_period,
            generation: 0,
            pending: None,
            in_flight: None,
            deferred: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// New inputs (selection or parameters): bump the generation and
    /// (re)start the quiet period. Any earlier pending run is replaced.
    pub fn trigger(&mut self) -> u64 {
        self.generation += 1;
        let due = self.clock.now() + self.quiet_period;
        self.pending = Some(Pending {
            generation: self.generation,
            due,
        });
        debug!(generation = self.generation, "scheduled");
        self.generation
    }

    /// Inputs were withdrawn (selection restarted or cancelled): bump the
    /// generation so in-flight results go stale, and drop any pending run.
    pub fn invalidate(&mut self) -> u64 {
        self.generation += 1;
        self.pending = None;
        self.deferred = None;
        debug!(generation = self.generation, "invalidated pending work");
        self.generation
    }

    /// Run immediately unless a call is already in flight
    pub fn run_now(&mut self) -> RunNow {
        if let Some(busy) = self.in_flight {
            debug!("run requested while generation {} in flight, ignored", busy);
            return RunNow::Busy;
        }
        self.pending = None;
        self.deferred = None;
        RunNow::Dispatch(self.start(self.generation))
    }

    /// Fire the pending run if its quiet period has elapsed.
    ///
    /// A run that comes due while another call is in flight is not started;
    /// it is remembered and re-armed when that call completes, provided no
    /// newer inputs arrived in the meantime.
    pub fn poll(&mut self) -> Option<Dispatch> {
        let pending = self.pending?;
        if self.clock.now() < pending.due {
            return None;
        }
        self.pending = None;

        if let Some(busy) = self.in_flight {
            debug!(generation = pending.generation, "came due while {} in flight, deferred", busy);
            self.deferred = Some(pending.generation);
            return None;
        }
        Some(self.start(pending.generation))
    }

    /// When the pending run will come due
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.map(|p| p.due)
    }

    /// Record the end of the in-flight call (success or failure alike) and
    /// report whether its result is still current.
    pub fn complete(&mut self, generation: u64) -> Completion {
        if self.in_flight == Some(generation) {
            self.in_flight = None;
        }

        if let Some(deferred) = self.deferred.take() {
            if deferred == self.generation && self.pending.is_none() {
                debug!(generation = deferred, "re-arming deferred run");
                self.pending = Some(Pending {
                    generation: deferred,
                    due: self.clock.now(),
                });
            }
        }

        if generation == self.generation {
            Completion::Fresh
        } else {
            debug!(generation, "completed after {} was issued, discarded", self.generation);
            Completion::Stale
        }
    }

    fn start(&mut self, generation: u64) -> Dispatch {
        self.in_flight = Some(generation);
        debug!(generation, "dispatching");
        Dispatch { generation }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Manually advanced clock shared between a test and the scheduler
    #[derive(Clone)]
    pub(crate) struct ManualClock(Rc<Cell<Instant>>);

    impl ManualClock {
        pub(crate) fn new() -> Self {
            Self(Rc::new(Cell::new(Instant::now())))
        }

        pub(crate) fn advance(&self, by: Duration) {
            self.0.set(self.0.get() + by);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.0.get()
        }
    }

    fn scheduler() -> (ManualClock, AutoRunScheduler<ManualClock>) {
        let clock = ManualClock::new();
        (clock.clone(), AutoRunScheduler::new(clock, DEFAULT_QUIET_PERIOD))
    }

    #[test]
    fn test_rapid_triggers_coalesce_into_one_dispatch() {
        let (clock, mut s) = scheduler();

        let mut last = 0;
        for _ in 0..5 {
            last = s.trigger();
            clock.advance(Duration::from_millis(100));
            assert_eq!(s.poll(), None);
        }

        clock.advance(Duration::from_millis(349));
        assert_eq!(s.poll(), None);
        clock.advance(Duration::from_millis(1));
        assert_eq!(s.poll(), Some(Dispatch { generation: last }));
        assert_eq!(s.poll(), None);
        assert_eq!(last, 5);
    }

    #[test]
    fn test_run_now_while_busy_is_ignored() {
        let (_clock, mut s) = scheduler();
        s.trigger();
        let RunNow::Dispatch(first) = s.run_now() else {
            panic!("expected dispatch");
        };
        assert!(!s.has_pending());
        assert_eq!(s.run_now(), RunNow::Busy);

        assert_eq!(s.complete(first.generation), Completion::Fresh);
        assert!(!s.is_busy());
        assert!(matches!(s.run_now(), RunNow::Dispatch(_)));
    }

    #[test]
    fn test_stale_completion_detected() {
        let (clock, mut s) = scheduler();
        s.trigger();
        clock.advance(DEFAULT_QUIET_PERIOD);
        let dispatch = s.poll().unwrap();

        s.trigger();
        assert_eq!(s.complete(dispatch.generation), Completion::Stale);
        assert!(!s.is_busy());
    }

    #[test]
    fn test_due_while_busy_is_rearmed_after_completion() {
        let (clock, mut s) = scheduler();
        s.trigger();
        clock.advance(DEFAULT_QUIET_PERIOD);
        let first = s.poll().unwrap();

        let second = s.trigger();
        clock.advance(DEFAULT_QUIET_PERIOD);
        assert_eq!(s.poll(), None);
        assert!(!s.has_pending());

        assert_eq!(s.complete(first.generation), Completion::Stale);
        assert_eq!(s.next_deadline(), Some(clock.now()));
        assert_eq!(s.poll(), Some(Dispatch { generation: second }));
    }

    #[test]
    fn test_deferred_dropped_when_superseded() {
        let (clock, mut s) = scheduler();
        s.trigger();
        clock.advance(DEFAULT_QUIET_PERIOD);
        let first = s.poll().unwrap();

        s.trigger();
        clock.advance(DEFAULT_QUIET_PERIOD);
        assert_eq!(s.poll(), None);

        s.invalidate();
        s.complete(first.generation);
        assert!(!s.has_pending());
        assert_eq!(s.poll(), None);
    }

    #[test]
    fn test_invalidate_cancels_pending() {
        let (clock, mut s) = scheduler();
        s.trigger();
        s.invalidate();
        clock.advance(DEFAULT_QUIET_PERIOD * 2);
        assert_eq!(s.poll(), None);
        assert_eq!(s.next_deadline(), None);
        assert_eq!(s.generation(), 2);
    }
}
