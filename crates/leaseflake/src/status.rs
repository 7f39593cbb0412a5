use core::time::Duration;

/// Represents the result of a single generation attempt.
///
/// - [`IdGenStatus::Ready`] indicates a new ID was generated.
/// - [`IdGenStatus::Pending`] means the sequence of the current time unit is
///   used up and the caller should back off for `yield_for` before retrying.
///
/// This allows non-blocking generation loops and caller-chosen backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdGenStatus {
    /// A unique ID was generated and is ready to use.
    Ready {
        /// The generated ID.
        id: u64,
    },
    /// No ID could be generated in the current time unit.
    Pending {
        /// How long to wait before trying again, as chosen by the configured
        /// exhaustion strategy.
        yield_for: Duration,
    },
}

#[cfg(test)]
impl IdGenStatus {
    pub(crate) fn unwrap_ready(self) -> u64 {
        match self {
            Self::Ready { id } => id,
            Self::Pending { yield_for } => panic!("expected ready, pending for {yield_for:?}"),
        }
    }

    pub(crate) fn unwrap_pending(self) -> Duration {
        match self {
            Self::Ready { id } => panic!("expected pending, got id {id}"),
            Self::Pending { yield_for } => yield_for,
        }
    }
}
