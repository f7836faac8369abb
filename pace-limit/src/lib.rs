//! # pace-limit
//!
//! `pace-limit` provides a lock-free, blocking rate pacer for threads.
//!
//! ## Core Philosophy
//!
//! Call [`Limiter::take`] before each unit of work. The pacer sleeps the calling
//! thread just long enough that, averaged over time, work proceeds at the configured
//! rate. Most pacers protect their "next slot" with a `Mutex`, which serialises every
//! caller. `pace-limit` keeps its whole state in a single atomic word and publishes
//! each transition with a Compare-And-Swap (CAS) loop, so concurrent callers never
//! lose an update and never wait on each other, only on the clock.
//!
//! ## Key Concepts
//!
//! * **Lock-Free**: No `Mutex` or `RwLock` in the hot path.
//! * **Elapsed-Time Pacing**: Each caller owes one budget minus the time since the
//!   last deadline. Arriving late costs nothing and earns nothing: the negative
//!   debt is clamped at the slack and then forgotten.
//! * **Pluggable Clock**: Time is read and slept through the [`Clock`] trait, so
//!   tests can drive the pacer with a deterministic [`MockClock`].
//! * **Limiter Trait**: [`Pacer`] and the no-op [`Unlimited`] share one interface, so
//!   pacing can be switched off without touching call sites.
//!
//! ## Example
//!
//! ```rust
//! use pace_limit::Limiter;
//! use pace_limit::Pacer;
//! use std::num::NonZeroUsize;
//! use std::time::Duration;
//!
//! let rate = NonZeroUsize::new(100).unwrap();
//! let pacer = Pacer::builder(rate)
//!     .per(Duration::from_secs(1))
//!     .slack(5)
//!     .build();
//!
//! for _ in 0..3 {
//!     let _deadline = pacer.take();
//!     // Do paced work
//! }
//! ```

use std::fmt::Debug;

use quanta::Instant;

mod clock;
mod error;
mod pacer;
mod unlimited;

pub use clock::Clock;
pub use clock::MockClock;
pub use error::Error;
pub use pacer::Pacer;
pub use pacer::PacerBuilder;
pub use unlimited::Unlimited;

/// The contract shared by every limiter.
///
/// Limiters must be `Send` and `Sync` to be shared across threads via `Arc`;
/// both implementations in this crate are.
pub trait Limiter: Debug {
    /// Blocks until the caller may proceed.
    ///
    /// Returns the instant the caller was paced to. This may be slightly in the
    /// past by the time the caller observes it, or in the future if the sleep
    /// was cut short. A short sleep is not an error: the deadline has already
    /// been committed and later callers still pace against it.
    fn take(&self) -> Instant;
}
