use std::cell::{Cell, RefCell};

use crate::{
    DEFAULT_MAX_TIMERS, RegisterError,
    clock::{Clock, Tick},
    slot::{Full, SlotTable},
    timer::{Callback, PendingAction, RunLimit, TimerId, TimerRecord},
};

/// Cooperative timer registry and dispatcher.
///
/// Holds up to `MAX_TIMERS` timers and fires them from [`poll`](Self::poll),
/// which the host calls from its main loop. Scheduling granularity is
/// exactly the cadence of those calls.
///
/// # Single-threaded
///
/// All operations take `&self` and the registry is neither `Send` nor
/// `Sync`. Callbacks run with no internal borrow held, so a callback that
/// reaches the registry (e.g. through a `Weak`) may register, remove or
/// reconfigure timers. Such changes apply from the next poll on: the due
/// decisions for the current poll are already made, and timers added while
/// firing are not fired in the same pass.
///
/// `poll` is not reentrant. Calling it from inside a callback does nothing
/// and returns 0.
pub struct TimerRegistry<C, const MAX_TIMERS: usize = DEFAULT_MAX_TIMERS> {
    slots: RefCell<SlotTable<TimerRecord>>,
    clock: C,
    dispatching: Cell<bool>,
    /// Bumped by `clear`, which discards slot generations.
    epoch: Cell<u64>,
}

impl<C: Clock, const MAX_TIMERS: usize> TimerRegistry<C, MAX_TIMERS> {
    pub fn new(clock: C) -> Self {
        const {
            assert!(MAX_TIMERS > 0, "must allow at least one timer");
        }

        Self {
            slots: RefCell::new(SlotTable::with_limit(MAX_TIMERS)),
            clock,
            dispatching: Cell::new(false),
            epoch: Cell::new(0),
        }
    }

    /// Like [`new`](Self::new), but reserves storage for `MAX_TIMERS` timers
    /// so registration never allocates.
    pub fn with_preallocated(clock: C) -> Self {
        const {
            assert!(MAX_TIMERS > 0, "must allow at least one timer");
        }

        Self {
            slots: RefCell::new(SlotTable::preallocated(MAX_TIMERS)),
            clock,
            dispatching: Cell::new(false),
            epoch: Cell::new(0),
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Call `callback` every `period` ticks until `limit` is reached.
    ///
    /// The first fire is due `period` ticks from now. Reuses the lowest free
    /// slot before growing the table.
    pub fn register<F>(
        &self,
        period: Tick,
        limit: RunLimit,
        callback: F,
    ) -> Result<TimerId, RegisterError>
    where
        F: FnMut() + 'static,
    {
        self.insert(period, limit, Box::new(callback))
    }

    /// Register an already boxed, possibly absent, callback.
    ///
    /// # Errors
    /// [`RegisterError::InvalidCallback`] if `callback` is `None`,
    /// [`RegisterError::CapacityExceeded`] if no slot is free and the table
    /// cannot grow.
    pub fn register_boxed(
        &self,
        period: Tick,
        limit: RunLimit,
        callback: Option<Callback>,
    ) -> Result<TimerId, RegisterError> {
        let Some(callback) = callback else {
            tracing::warn!(period, "rejected timer without callback");
            return Err(RegisterError::InvalidCallback);
        };
        self.insert(period, limit, callback)
    }

    /// Call `callback` every `period` ticks until removed.
    pub fn set_interval<F>(&self, period: Tick, callback: F) -> Result<TimerId, RegisterError>
    where
        F: FnMut() + 'static,
    {
        self.register(period, RunLimit::Forever, callback)
    }

    /// Call `callback` once, `period` ticks from now.
    pub fn set_timeout<F>(&self, period: Tick, callback: F) -> Result<TimerId, RegisterError>
    where
        F: FnMut() + 'static,
    {
        self.register(period, RunLimit::ONCE, callback)
    }

    fn insert(
        &self,
        period: Tick,
        limit: RunLimit,
        callback: Callback,
    ) -> Result<TimerId, RegisterError> {
        let record = TimerRecord::new(period, limit, callback, self.clock.now());

        let inserted = self.slots.borrow_mut().insert(record);
        match inserted {
            Ok(index) => {
                tracing::debug!(timer = index, period, ?limit, "timer registered");
                Ok(TimerId(index))
            }
            Err(Full(_rejected)) => {
                tracing::debug!(limit = MAX_TIMERS, period, "timer capacity exceeded");
                Err(RegisterError::CapacityExceeded)
            }
        }
    }

    /// Fire every due timer, reading the current time from the clock.
    ///
    /// Returns the number of callbacks invoked.
    pub fn poll(&self) -> usize {
        self.poll_at(self.clock.now())
    }

    /// Fire every timer due at `now`.
    ///
    /// Runs a full due-scan over all slots before the first callback is
    /// invoked, then fires marked timers in ascending id order. Each due
    /// timer fires at most once per call.
    ///
    /// `now` is on the clock's time line and should not go backwards
    /// between calls. A timer whose last fire point (or registration time)
    /// is later than `now`, e.g. because `now` was read before the timer
    /// was registered, is not due.
    ///
    /// If a callback panics, the panic propagates out of this call. The
    /// panicking timer is removed and timers that were due but had not yet
    /// fired are skipped for this call.
    pub fn poll_at(&self, now: Tick) -> usize {
        if self.dispatching.replace(true) {
            tracing::warn!("poll called from a timer callback; ignored");
            return 0;
        }
        let _guard = DispatchGuard {
            dispatching: &self.dispatching,
            slots: &self.slots,
        };

        let bound = self.mark_due(now);
        let fired = (0..bound).filter(|&index| self.fire(index)).count();

        if fired > 0 {
            tracing::trace!(now, fired, "poll complete");
        }
        fired
    }

    /// Phase 1. Returns the slot bound for phase 2.
    fn mark_due(&self, now: Tick) -> usize {
        let mut slots = self.slots.borrow_mut();
        for (_, record) in slots.iter_mut() {
            record.mark_due(now);
        }
        slots.slot_count()
    }

    /// Phase 2 for one slot. Returns whether a callback ran.
    fn fire(&self, index: usize) -> bool {
        let epoch = self.epoch.get();
        let (generation, action, mut callback) = {
            let mut slots = self.slots.borrow_mut();
            let Some(generation) = slots.generation(index) else {
                return false;
            };
            let Some(record) = slots.get_mut(index) else {
                return false;
            };
            let action = record.take_pending();
            if action == PendingAction::None {
                return false;
            }
            let Some(callback) = record.callback.take() else {
                return false;
            };
            (generation, action, callback)
        };

        tracing::trace!(timer = index, ?action, "timer fired");
        callback();

        // The callback may have removed its own timer, possibly reusing the
        // slot. Only hand the callback back to the timer it was taken from.
        let mut slots = self.slots.borrow_mut();
        if self.epoch.get() != epoch || slots.generation(index) != Some(generation) {
            return true;
        }

        if action == PendingAction::FireAndRemove {
            let finished = slots.remove(index);
            drop(slots);
            drop(finished);
            tracing::debug!(timer = index, "timer completed");
        } else if let Some(record) = slots.get_mut(index) {
            record.callback = Some(callback);
        }
        true
    }

    /// Remove a timer, freeing its slot for reuse.
    ///
    /// Returns `false` if the id is out of range or already free.
    pub fn remove(&self, id: TimerId) -> bool {
        let removed = self.slots.borrow_mut().remove(id.0);
        let found = removed.is_some();
        if found {
            tracing::debug!(timer = id.0, "timer removed");
        }
        // Dropped outside the borrow: captured state may reach back in.
        drop(removed);
        found
    }

    /// Rebase the timer's period grid on the current time.
    ///
    /// Run count and enabled state are unchanged.
    pub fn restart(&self, id: TimerId) {
        let now = self.clock.now();
        self.with_record(id, |record| record.last_fired = now);
    }

    pub fn enable(&self, id: TimerId) {
        self.with_record(id, |record| record.enabled = true);
    }

    /// Suspend firing. Elapsed time is not saved up: on re-enable the timer
    /// is due against its old grid and fires at most once per poll.
    pub fn disable(&self, id: TimerId) {
        self.with_record(id, |record| record.enabled = false);
    }

    pub fn toggle(&self, id: TimerId) {
        self.with_record(id, |record| record.enabled = !record.enabled);
    }

    /// `false` for free and out-of-range ids.
    pub fn is_enabled(&self, id: TimerId) -> bool {
        self.slots.borrow().get(id.0).is_some_and(|record| record.enabled)
    }

    /// Whether `id` currently holds a timer.
    pub fn is_active(&self, id: TimerId) -> bool {
        self.slots.borrow().get(id.0).is_some()
    }

    /// Fires counted so far. Interval timers always report 0.
    pub fn run_count(&self, id: TimerId) -> Option<u32> {
        self.slots.borrow().get(id.0).map(|record| record.run_count)
    }

    pub fn period(&self, id: TimerId) -> Option<Tick> {
        self.slots.borrow().get(id.0).map(|record| record.period)
    }

    pub fn run_limit(&self, id: TimerId) -> Option<RunLimit> {
        self.slots.borrow().get(id.0).map(|record| record.limit)
    }

    /// Ticks until the earliest enabled timer is due.
    ///
    /// `Some(0)` if one is due now, `None` if no timer is enabled.
    pub fn ticks_until_next(&self) -> Option<Tick> {
        let now = self.clock.now();
        self.slots
            .borrow()
            .iter()
            .filter_map(|(_, record)| record.ticks_until_due(now))
            .min()
    }

    /// Drop every timer and release the backing storage.
    ///
    /// Previously returned ids become stale.
    pub fn clear(&self) {
        let mut old = SlotTable::with_limit(MAX_TIMERS);
        std::mem::swap(&mut old, &mut *self.slots.borrow_mut());
        self.epoch.set(self.epoch.get().wrapping_add(1));

        tracing::debug!(removed = old.len(), "timers cleared");
        old.clear();
    }

    /// Live timers.
    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }

    /// Timers that can still be registered.
    pub fn available(&self) -> usize {
        let slots = self.slots.borrow();
        slots.limit() - slots.len()
    }

    /// Allocated slots, live or free.
    pub fn slot_count(&self) -> usize {
        self.slots.borrow().slot_count()
    }

    pub const fn capacity(&self) -> usize {
        MAX_TIMERS
    }

    #[inline(always)]
    fn with_record(&self, id: TimerId, f: impl FnOnce(&mut TimerRecord)) {
        if let Some(record) = self.slots.borrow_mut().get_mut(id.0) {
            f(record);
        }
    }
}

impl<C: Clock + Default, const MAX_TIMERS: usize> Default for TimerRegistry<C, MAX_TIMERS> {
    fn default() -> Self {
        Self::new(C::default())
    }
}

impl<C, const MAX_TIMERS: usize> std::fmt::Debug for TimerRegistry<C, MAX_TIMERS> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.try_borrow();
        let mut s = f.debug_struct("TimerRegistry");
        s.field("capacity", &MAX_TIMERS);
        if let Ok(slots) = slots {
            s.field("len", &slots.len())
                .field("slot_count", &slots.slot_count());
        }
        s.field("dispatching", &self.dispatching.get())
            .finish_non_exhaustive()
    }
}

/// Clears the dispatch flag on exit.
///
/// On an unwind out of a callback it also drops the timer whose callback
/// was checked out and clears the marks of timers that did not get to fire,
/// so no record outlives the poll half-dispatched.
struct DispatchGuard<'a> {
    dispatching: &'a Cell<bool>,
    slots: &'a RefCell<SlotTable<TimerRecord>>,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            if let Ok(mut slots) = self.slots.try_borrow_mut() {
                for key in 0..slots.slot_count() {
                    if slots.get(key).is_some_and(|record| record.callback.is_none()) {
                        slots.remove(key);
                        tracing::debug!(timer = key, "discarded timer with unwound callback");
                    }
                }
                for (_, record) in slots.iter_mut() {
                    record.pending = PendingAction::None;
                }
            }
        }
        self.dispatching.set(false);
    }
}


#[cfg(test)]
mod latency_tests {
    use super::*;
    use crate::clock::ManualClock;
    use hdrhistogram::Histogram;
    use std::time::Instant;

    const WARMUP: u64 = 10_000;
    const ITERATIONS: u64 = 100_000;

    type BenchRegistry = TimerRegistry<ManualClock, 64>;

    fn print_histogram(name: &str, hist: &Histogram<u64>) {
        println!("\n=== {} ===", name);
        println!("  count:  {}", hist.len());
        println!("  min:    {} ns", hist.min());
        println!("  max:    {} ns", hist.max());
        println!("  mean:   {:.1} ns", hist.mean());
        println!("  p50:    {} ns", hist.value_at_quantile(0.50));
        println!("  p99:    {} ns", hist.value_at_quantile(0.99));
        println!("  p99.9:  {} ns", hist.value_at_quantile(0.999));
    }

    // ==================== Register Latency ====================

    #[test]
    #[ignore]
    fn hdr_register_remove_latency() {
        let reg = BenchRegistry::new(ManualClock::new(0));
        let mut hist = Histogram::<u64>::new(3).unwrap();

        for _ in 0..32 {
            reg.set_interval(1_000, || {}).unwrap();
        }

        for _ in 0..WARMUP {
            let id = reg.set_timeout(10, || {}).unwrap();
            reg.remove(id);
        }

        for _ in 0..ITERATIONS {
            let start = Instant::now();
            let id = reg.set_timeout(10, || {}).unwrap();
            hist.record(start.elapsed().as_nanos() as u64).unwrap();
            reg.remove(id);
        }

        print_histogram("register (32 live)", &hist);
    }

    // ==================== Poll Latency ====================

    #[test]
    #[ignore]
    fn hdr_poll_latency() {
        let clock = ManualClock::new(0);
        let reg = BenchRegistry::new(clock.clone());
        let mut hist = Histogram::<u64>::new(3).unwrap();

        for i in 0..64u64 {
            reg.set_interval(i % 8 + 1, || {}).unwrap();
        }

        for _ in 0..WARMUP {
            clock.advance(1);
            reg.poll();
        }

        for _ in 0..ITERATIONS {
            clock.advance(1);
            let start = Instant::now();
            reg.poll();
            hist.record(start.elapsed().as_nanos() as u64).unwrap();
        }

        print_histogram("poll (64 intervals)", &hist);
    }
}
