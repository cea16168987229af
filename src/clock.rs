//! Monotonic tick sources.
//!
//! The registry never reads time on its own initiative; it asks its
//! [`Clock`] at registration, on [`restart`](crate::TimerRegistry::restart)
//! and once per [`poll`](crate::TimerRegistry::poll).
use std::{cell::Cell, rc::Rc, time::Instant};

/// Clock time unit. Periods are expressed in the same unit.
pub type Tick = u64;

/// Monotonic tick source.
///
/// `now` must never go backwards. Narrow hardware counters that roll over
/// should be read through [`WrappingClock`], which widens them to 64 bits.
pub trait Clock {
    fn now(&self) -> Tick;
}

impl<C: Clock + ?Sized> Clock for &C {
    #[inline(always)]
    fn now(&self) -> Tick {
        (**self).now()
    }
}

impl<C: Clock + ?Sized> Clock for Rc<C> {
    #[inline(always)]
    fn now(&self) -> Tick {
        (**self).now()
    }
}

/// Milliseconds elapsed since construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::with_epoch(Instant::now())
    }

    pub fn with_epoch(epoch: Instant) -> Self {
        Self { epoch }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline(always)]
    fn now(&self) -> Tick {
        Instant::now()
            .saturating_duration_since(self.epoch)
            .as_millis() as Tick
    }
}

/// Hand-driven clock for tests and simulation.
///
/// Clones share the same counter, so a test can keep one handle and give
/// another to the registry.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    ticks: Rc<Cell<Tick>>,
}

impl ManualClock {
    pub fn new(start: Tick) -> Self {
        Self {
            ticks: Rc::new(Cell::new(start)),
        }
    }

    pub fn set(&self, now: Tick) {
        self.ticks.set(now);
    }

    /// Move time forward by `ticks`, saturating at `Tick::MAX`.
    pub fn advance(&self, ticks: Tick) {
        self.ticks.set(self.ticks.get().saturating_add(ticks));
    }
}

impl Clock for ManualClock {
    #[inline(always)]
    fn now(&self) -> Tick {
        self.ticks.get()
    }
}

/// Adapts a plain function that already yields a monotonic 64-bit tick.
/// Use [`WrappingClock`] for 32-bit counters.
#[derive(Debug, Clone, Copy)]
pub struct FnClock<F>(pub F);

impl<F: Fn() -> Tick> Clock for FnClock<F> {
    #[inline(always)]
    fn now(&self) -> Tick {
        (self.0)()
    }
}

/// Widens a free-running 32-bit counter, e.g. an MCU millisecond count,
/// into a monotonic 64-bit tick by counting rollovers.
///
/// A rollover is detected when a reading is lower than the previous one,
/// so the counter must be read at least once per wrap period (about 49.7
/// days for milliseconds). Polling the registry does that.
pub struct WrappingClock<F> {
    read: F,
    last: Cell<u32>,
    rollovers: Cell<u32>,
}

impl<F: Fn() -> u32> WrappingClock<F> {
    pub fn new(read: F) -> Self {
        let last = read();
        Self {
            read,
            last: Cell::new(last),
            rollovers: Cell::new(0),
        }
    }
}

impl<F: Fn() -> u32> Clock for WrappingClock<F> {
    fn now(&self) -> Tick {
        let raw = (self.read)();
        if raw < self.last.get() {
            self.rollovers.set(self.rollovers.get().wrapping_add(1));
        }
        self.last.set(raw);
        ((self.rollovers.get() as Tick) << 32) | raw as Tick
    }
}

impl<F> std::fmt::Debug for WrappingClock<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappingClock")
            .field("last", &self.last.get())
            .field("rollovers", &self.rollovers.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new(5);
        let handle = clock.clone();

        handle.advance(10);
        assert_eq!(clock.now(), 15);

        clock.set(100);
        assert_eq!(handle.now(), 100);
    }

    #[test]
    fn test_manual_clock_advance_saturates() {
        let clock = ManualClock::new(Tick::MAX - 1);
        clock.advance(3);
        assert_eq!(clock.now(), Tick::MAX);
    }

    #[test]
    fn test_wrapping_clock_widens_across_rollover() {
        let raw = Rc::new(Cell::new(u32::MAX - 1));
        let source = Rc::clone(&raw);
        let clock = WrappingClock::new(move || source.get());

        assert_eq!(clock.now(), (u32::MAX - 1) as Tick);

        raw.set(u32::MAX);
        assert_eq!(clock.now(), u32::MAX as Tick);

        raw.set(3);
        assert_eq!(clock.now(), (1 << 32) + 3);

        raw.set(10);
        assert_eq!(clock.now(), (1 << 32) + 10);

        raw.set(1);
        assert_eq!(clock.now(), (2 << 32) + 1);
    }

    #[test]
    fn test_fn_clock() {
        let source = Cell::new(42);
        let clock = FnClock(|| source.get());
        assert_eq!(clock.now(), 42);

        source.set(43);
        assert_eq!(clock.now(), 43);
    }

    #[test]
    fn test_clock_through_references() {
        let clock = ManualClock::new(7);
        let shared = Rc::new(clock.clone());

        assert_eq!((&clock).now(), 7);
        assert_eq!(shared.now(), 7);
    }

    #[test]
    fn test_monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
