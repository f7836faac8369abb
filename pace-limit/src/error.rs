/// Errors produced while configuring a limiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The rate was zero or negative.
    ///
    /// A pacer needs a positive number of operations per interval, otherwise the
    /// per-request budget would be infinite or undefined.
    #[error("rate must be positive, got {0}")]
    InvalidRate(i64),
}
