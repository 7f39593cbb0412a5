//! Error types for lease allocation and ID generation.
//!
//! ## Error Cases
//! - `AllocationFailed`: the store has no free lease-id.
//! - `RenewalRejected`: the store no longer attributes the lease-id to us.
//! - `Unreachable`: the store could not be reached or timed out.
//! - `LeaseExpired`: a generation call observed a lease past its expiry.
//! - `InvalidLayout` / `InvalidConfig`: startup-time configuration errors.
//! - `MalformedReply`: the store answered something outside the wire contract.

use core::fmt;

/// A result type defaulting to this crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors `leaseflake` can produce.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The store reported that every lease-id is currently held.
    #[error("no free lease-id available: {reason}")]
    AllocationFailed { reason: String },

    /// The store refused to extend a lease we no longer own.
    #[error("renewal of lease {lease_id} rejected by the store")]
    RenewalRejected { lease_id: u64 },

    /// Transport failure or timeout talking to the store.
    #[error("coordination store unreachable: {context}")]
    Unreachable { context: String },

    /// The held lease was found expired on the generation path.
    ///
    /// Callers should retry after a short delay; the renewal loop re-acquires
    /// a lease in the background.
    #[error("lease {lease_id} expired at {expiry_time} (now {now})")]
    LeaseExpired {
        lease_id: u64,
        expiry_time: u64,
        now: u64,
    },

    /// The bit layout does not describe a valid 63-bit payload.
    #[error("invalid bit layout: {reason}")]
    InvalidLayout { reason: String },

    /// A configuration value is outside its accepted range.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The store reply does not follow the allocation wire contract.
    #[error("malformed store reply: {reason}")]
    MalformedReply { reason: String },

    /// A component does not fit in its bit field.
    #[error("{field} value {value} exceeds maximum {max}")]
    FieldOverflow {
        field: Field,
        value: u64,
        max: u64,
    },

    /// The generator was shut down.
    #[error("generator is shut down")]
    Shutdown,

    /// The operation failed because the state lock was **poisoned**.
    ///
    /// Only reachable with the std mutex; `parking_lot` mutexes do not poison.
    #[cfg(not(feature = "parking-lot"))]
    #[error("generator state lock poisoned")]
    LockPoisoned,
}

/// Names an ID bit field in [`Error::FieldOverflow`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    TimeUnit,
    LeaseId,
    Sequence,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TimeUnit => "time unit",
            Self::LeaseId => "lease-id",
            Self::Sequence => "sequence",
        })
    }
}

impl Error {
    /// Whether retrying the same operation later may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AllocationFailed { .. }
                | Self::RenewalRejected { .. }
                | Self::Unreachable { .. }
                | Self::LeaseExpired { .. }
        )
    }
}

#[cfg(not(feature = "parking-lot"))]
use crate::generator::{MutexGuard, PoisonError};
#[cfg(not(feature = "parking-lot"))]
impl<T> From<PoisonError<MutexGuard<'_, T>>> for Error {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        Self::LockPoisoned
    }
}
