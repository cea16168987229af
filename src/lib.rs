//! Cooperative software timers for poll-driven main loops.
//!
//! A [`TimerRegistry`] holds a bounded number of callbacks, each scheduled
//! to run after a delay, every interval, or a fixed number of times. Nothing
//! runs in the background: the host calls [`TimerRegistry::poll`] from its
//! loop, and due callbacks run synchronously inside that call.
//!
//! ```
//! use std::{cell::Cell, rc::Rc};
//! use tickslot::{ManualClock, TimerRegistry};
//!
//! let clock = ManualClock::new(0);
//! let timers: TimerRegistry<_> = TimerRegistry::new(clock.clone());
//!
//! let blinks = Rc::new(Cell::new(0));
//! let counter = Rc::clone(&blinks);
//! timers.set_interval(500, move || counter.set(counter.get() + 1)).unwrap();
//!
//! clock.advance(1_000);
//! timers.poll();
//! timers.poll();
//! assert_eq!(blinks.get(), 2);
//! ```
//!
//! Ids are plain slot indices. They are reused after a timer is removed,
//! and every operation on a free or out-of-range id is a no-op.

mod clock;
mod registry;
mod slot;
mod timer;

pub use clock::{Clock, FnClock, ManualClock, MonotonicClock, Tick, WrappingClock};
pub use registry::TimerRegistry;
pub use timer::{Callback, RunLimit, TimerId};

/// Capacity used when none is given.
pub const DEFAULT_MAX_TIMERS: usize = 10;

pub type TimerRegistry4<C> = TimerRegistry<C, 4>;
pub type TimerRegistry8<C> = TimerRegistry<C, 8>;
pub type TimerRegistry16<C> = TimerRegistry<C, 16>;
pub type TimerRegistry32<C> = TimerRegistry<C, 32>;
pub type TimerRegistry64<C> = TimerRegistry<C, 64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("timer callback is missing")]
    InvalidCallback,
    #[error("timer capacity exceeded")]
    CapacityExceeded,
}
