use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use quanta::Instant;
use quanta::Mock;

/// A source of time that can also suspend the calling thread.
///
/// `quanta::Clock` is the production implementation. [`MockClock`] is a
/// deterministic stand-in for tests.
pub trait Clock: Debug + Send + Sync {
    /// The current instant.
    fn now(&self) -> Instant;

    /// Suspends the calling thread for `duration`.
    ///
    /// A zero duration must return immediately.
    fn sleep(&self, duration: Duration);
}

impl Clock for quanta::Clock {
    #[inline]
    fn now(&self) -> Instant {
        quanta::Clock::now(self)
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// A manually driven clock.
///
/// Time only moves when [`MockClock::advance`] is called or, unless the clock
/// is [frozen](MockClock::frozen), when a caller sleeps. Every sleep is
/// recorded so tests can assert on how long callers were held.
///
/// Clones share the same time and the same sleep record.
#[derive(Clone)]
pub struct MockClock {
    clock: quanta::Clock,
    mock: Arc<Mock>,
    advance_on_sleep: bool,
    slept_ns: Arc<AtomicU64>,
    sleeps: Arc<AtomicU64>,
}

impl MockClock {
    /// A mock clock where sleeping advances time by the slept duration.
    pub fn new() -> Self {
        Self::with_sleep_behaviour(true)
    }

    /// A mock clock where sleeping is recorded but time stands still.
    ///
    /// Useful for checking the exact sequence of deadlines handed out to
    /// concurrent callers.
    pub fn frozen() -> Self {
        Self::with_sleep_behaviour(false)
    }

    fn with_sleep_behaviour(advance_on_sleep: bool) -> Self {
        let (clock, mock) = quanta::Clock::mock();
        Self {
            clock,
            mock,
            advance_on_sleep,
            slept_ns: Arc::new(AtomicU64::new(0)),
            sleeps: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Moves time forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.mock.increment(duration);
    }

    /// The sum of all non-zero sleeps requested so far.
    pub fn total_slept(&self) -> Duration {
        Duration::from_nanos(self.slept_ns.load(Ordering::Acquire))
    }

    /// The number of non-zero sleeps requested so far.
    pub fn sleep_count(&self) -> u64 {
        self.sleeps.load(Ordering::Acquire)
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for MockClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockClock")
            .field("now_ns", &self.mock.value())
            .field("advance_on_sleep", &self.advance_on_sleep)
            .field("total_slept", &self.total_slept())
            .field("sleep_count", &self.sleep_count())
            .finish()
    }
}

impl Clock for MockClock {
    #[inline]
    fn now(&self) -> Instant {
        self.clock.now()
    }

    fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        self.sleeps.fetch_add(1, Ordering::AcqRel);
        self.slept_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::AcqRel);
        if self.advance_on_sleep {
            self.mock.increment(duration);
        }
    }
}
