use std::num::NonZeroUsize;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use quanta::Instant;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::Clock;
use crate::Error;
use crate::Limiter;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_SLACK: usize = 10;

/// Nothing has been paced yet.
const UNSET: i64 = i64::MIN;

/// The pacing state, alone on its cache line so that contended CAS traffic
/// does not invalidate the read-only configuration next to it.
#[derive(Debug)]
#[repr(align(64))]
struct PaddedState(AtomicI64);

/// An immutable pacing state, in nanoseconds from the pacer's anchor.
///
/// Only the deadline is stored, so a snapshot is replaced as one word and can
/// never be observed half written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Snapshot {
    /// When the caller that produced this snapshot may proceed.
    deadline: i64,
    /// What the caller owed, clamped at the slack. Positive debt is slept off;
    /// negative debt is transient and never reaches the next call.
    sleep_debt: i64,
}

impl Snapshot {
    fn published(&self) -> i64 {
        self.deadline
    }

    fn sleep(&self) -> Duration {
        Duration::from_nanos(self.sleep_debt.max(0) as u64)
    }
}

#[derive(Clone, Debug)]
struct PacerMetrics {
    takes: Counter<u64>,
    throttled: Counter<u64>,
    cas_retries: Counter<u64>,
}

impl PacerMetrics {
    fn new() -> Self {
        let meter = global::meter("pace_limit");
        Self {
            takes: meter.u64_counter("pace_limit.takes").build(),
            throttled: meter.u64_counter("pace_limit.throttled").build(),
            cas_retries: meter.u64_counter("pace_limit.cas_retries").build(),
        }
    }
}

/// A lock-free pacer.
///
/// Every call to [`Limiter::take`] computes a candidate [`Snapshot`] from the
/// current one and tries to publish it with a single compare-and-swap. Losers
/// re-read the state and try again, so each successful call is linearized
/// against exactly one predecessor and no update is ever lost.
///
/// The recurrence is driven purely by elapsed time: a caller owes
/// `per_request - (now - previous deadline)`. Positive debt pushes the new
/// deadline into the future and is slept off, so the carry between calls lives
/// in how far the deadline moved. Negative debt is clamped at the slack and
/// then dropped; the next caller measures its gap from `now`.
#[derive(Debug)]
pub struct Pacer<C = quanta::Clock> {
    state: PaddedState,
    per_request: i64,
    max_slack: i64,
    clock: C,
    /// A fixed point in time to calculate offsets from.
    anchor: Instant,
    instruments: PacerMetrics,
}

impl Pacer {
    /// Creates a pacer allowing `rate` calls per second with the default slack of 10.
    pub fn new(rate: NonZeroUsize) -> Self {
        Self::builder(rate).build()
    }

    /// Creates a pacer from an untyped rate, rejecting non-positive values.
    pub fn try_new(rate: i64) -> Result<Self, Error> {
        Ok(PacerBuilder::try_new(rate)?.build())
    }

    /// Starts configuring a pacer for `rate` calls per interval.
    pub fn builder(rate: NonZeroUsize) -> PacerBuilder {
        PacerBuilder::new(rate)
    }
}

impl<C: Clock> Pacer<C> {
    /// The budget of a single call: interval / rate.
    pub fn per_request(&self) -> Duration {
        Duration::from_nanos(self.per_request as u64)
    }

    /// The floor applied to negative debt.
    pub fn max_slack(&self) -> Duration {
        Duration::from_nanos(self.max_slack.unsigned_abs())
    }

    fn elapsed_ns(&self) -> i64 {
        let elapsed = self.clock.now().saturating_duration_since(self.anchor);
        i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX)
    }

    fn instant_at(&self, offset: i64) -> Instant {
        self.anchor + Duration::from_nanos(offset.max(0) as u64)
    }

    /// Computes the snapshot that follows `previous` for a caller arriving at `now`.
    fn advance(&self, previous: i64, now: i64) -> Snapshot {
        if previous == UNSET {
            return Snapshot {
                deadline: now,
                sleep_debt: 0,
            };
        }

        let debt = self
            .per_request
            .saturating_sub(now.saturating_sub(previous))
            .max(self.max_slack);

        Snapshot {
            deadline: now.saturating_add(debt.max(0)),
            sleep_debt: debt,
        }
    }
}

impl<C: Clock> Limiter for Pacer<C> {
    fn take(&self) -> Instant {
        let mut retries = 0;
        let next = loop {
            let now = self.elapsed_ns();
            let previous = self.state.0.load(Ordering::Acquire);
            let next = self.advance(previous, now);

            if self
                .state
                .0
                .compare_exchange_weak(
                    previous,
                    next.published(),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break next;
            }
            retries += 1;
        };

        self.instruments.takes.add(1, &[]);
        if retries > 0 {
            trace!(retries, "pacer state contended");
            self.instruments.cas_retries.add(retries, &[]);
        }

        let wait = next.sleep();
        if !wait.is_zero() {
            trace!(?wait, "pacing caller");
            self.instruments.throttled.add(1, &[]);
            // If this sleep is cut short the deadline stands: it is already
            // published and later callers pace against it.
            self.clock.sleep(wait);
        }

        self.instant_at(next.deadline)
    }
}

/// Configures a [`Pacer`].
///
/// All options are independent and may be applied in any order.
#[derive(Debug)]
pub struct PacerBuilder<C = quanta::Clock> {
    rate: NonZeroUsize,
    interval: Duration,
    slack: usize,
    without_slack: bool,
    clock: C,
}

impl PacerBuilder {
    /// Starts from the defaults: one second interval, slack of 10, real clock.
    pub fn new(rate: NonZeroUsize) -> Self {
        Self {
            rate,
            interval: DEFAULT_INTERVAL,
            slack: DEFAULT_SLACK,
            without_slack: false,
            clock: quanta::Clock::new(),
        }
    }

    /// Like [`PacerBuilder::new`], for a rate that has not been validated yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRate`] if `rate` is zero or negative.
    pub fn try_new(rate: i64) -> Result<Self, Error> {
        usize::try_from(rate)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(Self::new)
            .ok_or(Error::InvalidRate(rate))
    }
}

impl<C: Clock> PacerBuilder<C> {
    /// Sets the interval the rate applies to.
    ///
    /// `Pacer::builder(2).per(Duration::from_secs(60))` paces to two calls a
    /// minute. A zero interval keeps the one second default.
    pub fn per(mut self, interval: Duration) -> Self {
        self.interval = if interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            interval
        };
        self
    }

    /// Sets the floor on negative debt, in request budgets.
    pub fn slack(mut self, slack: usize) -> Self {
        self.slack = slack;
        self
    }

    /// Disables bursting entirely, whatever [`PacerBuilder::slack`] says.
    pub fn without_slack(mut self) -> Self {
        self.without_slack = true;
        self
    }

    /// Uses `clock` to read time and to sleep.
    pub fn clock<K: Clock>(self, clock: K) -> PacerBuilder<K> {
        PacerBuilder {
            rate: self.rate,
            interval: self.interval,
            slack: self.slack,
            without_slack: self.without_slack,
            clock,
        }
    }

    /// Builds the pacer. Nothing has been paced until the first `take`.
    pub fn build(self) -> Pacer<C> {
        let slack = if self.without_slack { 0 } else { self.slack };
        let rate = self.rate.get() as u128;
        let interval_ns = self.interval.as_nanos();

        let per_request = i64::try_from(interval_ns / rate).unwrap_or(i64::MAX);
        // Scale before dividing so the slack doesn't accumulate rounding error.
        let max_slack = i64::try_from(interval_ns.saturating_mul(slack as u128) / rate)
            .map(|slack| -slack)
            .unwrap_or(i64::MIN + 1);

        if per_request == 0 {
            warn!(
                rate = self.rate.get(),
                interval = ?self.interval,
                "per-request budget rounds to zero, pacer will never sleep"
            );
        }
        debug!(
            rate = self.rate.get(),
            interval = ?self.interval,
            per_request = ?Duration::from_nanos(per_request as u64),
            slack,
            "built pacer"
        );

        let anchor = self.clock.now();
        Pacer {
            state: PaddedState(AtomicI64::new(UNSET)),
            per_request,
            max_slack,
            clock: self.clock,
            anchor,
            instruments: PacerMetrics::new(),
        }
    }
}
