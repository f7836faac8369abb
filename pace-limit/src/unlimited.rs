use quanta::Instant;

use crate::Clock;
use crate::Limiter;

/// A limiter that never waits.
///
/// Stands in for a [`Pacer`](crate::Pacer) when pacing is switched off, so call
/// sites keep calling [`Limiter::take`] unchanged.
#[derive(Debug, Clone)]
pub struct Unlimited<C = quanta::Clock> {
    clock: C,
}

impl Unlimited {
    /// A no-op limiter reporting time from the real clock.
    pub fn new() -> Self {
        Self::with_clock(quanta::Clock::new())
    }
}

impl Default for Unlimited {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Unlimited<C> {
    /// A no-op limiter reporting time from `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> Limiter for Unlimited<C> {
    #[inline]
    fn take(&self) -> Instant {
        self.clock.now()
    }
}
