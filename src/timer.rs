use std::{fmt, num::NonZeroU32};

use crate::clock::Tick;

/// Boxed timer callback. Captured state is the callback's context.
pub type Callback = Box<dyn FnMut()>;

/// Stable index of a timer slot.
///
/// Ids are reused once their timer is removed, so a retained id may later
/// address a different timer. Operations on a free or out-of-range id are
/// no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub(crate) usize);

impl TimerId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl From<usize> for TimerId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// How many times a timer fires before it is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunLimit {
    Forever,
    Times(NonZeroU32),
}

impl RunLimit {
    pub const ONCE: Self = Self::Times(NonZeroU32::MIN);

    /// `0` means forever, any other value is a finite count.
    pub const fn from_count(count: u32) -> Self {
        match NonZeroU32::new(count) {
            Some(n) => Self::Times(n),
            None => Self::Forever,
        }
    }
}

/// Work deferred from the due-scan to the fire pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum PendingAction {
    #[default]
    None,
    Fire,
    FireAndRemove,
}

pub(crate) struct TimerRecord {
    pub(crate) enabled: bool,
    /// `None` only while checked out for a call during dispatch.
    pub(crate) callback: Option<Callback>,
    pub(crate) last_fired: Tick,
    pub(crate) period: Tick,
    pub(crate) run_count: u32,
    pub(crate) limit: RunLimit,
    pub(crate) pending: PendingAction,
}

impl TimerRecord {
    pub(crate) fn new(period: Tick, limit: RunLimit, callback: Callback, now: Tick) -> Self {
        Self {
            enabled: true,
            callback: Some(callback),
            last_fired: now,
            period,
            run_count: 0,
            limit,
            pending: PendingAction::None,
        }
    }

    /// Due-scan step. Decides this poll's action and advances the record.
    ///
    /// `last_fired` moves by exactly one period, so fires stay on the
    /// registration grid and a late poll never yields more than one fire.
    /// A `now` earlier than `last_fired` is never due.
    pub(crate) fn mark_due(&mut self, now: Tick) -> PendingAction {
        self.pending = PendingAction::None;

        if !self.enabled || !self.is_due(now) {
            return PendingAction::None;
        }

        self.last_fired = self.last_fired.saturating_add(self.period);

        self.pending = match self.limit {
            RunLimit::Forever => PendingAction::Fire,
            RunLimit::Times(max) if self.run_count < max.get() => {
                self.run_count += 1;
                if self.run_count >= max.get() {
                    PendingAction::FireAndRemove
                } else {
                    PendingAction::Fire
                }
            }
            RunLimit::Times(_) => PendingAction::None,
        };
        self.pending
    }

    #[inline(always)]
    fn is_due(&self, now: Tick) -> bool {
        now.checked_sub(self.last_fired)
            .is_some_and(|elapsed| elapsed >= self.period)
    }

    #[inline(always)]
    pub(crate) fn take_pending(&mut self) -> PendingAction {
        std::mem::take(&mut self.pending)
    }

    /// Ticks until due, `0` if due now. `None` while disabled.
    pub(crate) fn ticks_until_due(&self, now: Tick) -> Option<Tick> {
        if !self.enabled {
            return None;
        }
        let remaining = match now.checked_sub(self.last_fired) {
            Some(elapsed) => self.period.saturating_sub(elapsed),
            None => self.period.saturating_add(self.last_fired - now),
        };
        Some(remaining)
    }
}

impl fmt::Debug for TimerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerRecord")
            .field("enabled", &self.enabled)
            .field("last_fired", &self.last_fired)
            .field("period", &self.period)
            .field("run_count", &self.run_count)
            .field("limit", &self.limit)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}
