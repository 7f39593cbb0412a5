//! Leases and the allocation wire contract.
//!
//! The coordination store executes one atomic script per grant or renewal and
//! answers with an ordered list of integers:
//!
//! ```text
//! (status, lease_id, effective_time_ms, expiry_time_ms)
//! ```
//!
//! `status == 0` means the request was refused (no free lease-id, or the
//! renewal fence did not match); only `status` is meaningful in that case.
//! Any other status carries a full lease. Times are milliseconds on the
//! store's clock.

use core::fmt;

use crate::{Error, Result};

/// A time-bounded, exclusive grant of one lease-id.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Lease {
    /// The lease-id embedded into every generated ID.
    pub lease_id: u64,
    /// Start of the validity window (store clock, ms).
    pub effective_time: u64,
    /// End of the validity window, exclusive (store clock, ms).
    pub expiry_time: u64,
}

impl Lease {
    /// Length of the validity window in milliseconds.
    pub const fn lifetime_millis(&self) -> u64 {
        self.expiry_time.saturating_sub(self.effective_time)
    }

    /// Whether the lease is no longer valid at store time `now`.
    pub const fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expiry_time
    }

    /// Milliseconds left before expiry at store time `now`.
    pub const fn remaining_at(&self, now: u64) -> u64 {
        self.expiry_time.saturating_sub(now)
    }
}

impl fmt::Display for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lease {} [{}, {})",
            self.lease_id, self.effective_time, self.expiry_time
        )
    }
}

/// Arguments of a grant execution: `(ttl_millis, owner_label)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrantRequest {
    pub ttl_millis: u64,
    /// Diagnostic label recorded by the store; not an identity.
    pub owner_label: String,
}

/// Arguments of a renewal execution.
///
/// `expiry_time` is the end of the window the caller believes it holds. The
/// store only renews when its own record for `lease_id` still carries that
/// expiry and has not lapsed, which fences out callers whose lease was
/// reassigned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenewRequest {
    pub ttl_millis: u64,
    pub owner_label: String,
    pub lease_id: u64,
    pub expiry_time: u64,
}

/// A decoded store reply.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocationReply {
    /// `status == 0`.
    Refused,
    /// Any non-zero status.
    Granted(Lease),
}

impl AllocationReply {
    /// Status value the store uses for a refusal.
    pub const REFUSED: i64 = 0;
    /// Status value the store uses for success.
    pub const GRANTED: i64 = 1;

    /// Decodes the raw integer list returned by the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedReply`] if the list is empty, a success reply
    /// does not carry exactly four values, any value is negative, or the
    /// validity window is empty.
    pub fn from_values(values: &[i64]) -> Result<Self> {
        let Some(&status) = values.first() else {
            return Err(malformed("empty reply".to_string()));
        };
        if status == Self::REFUSED {
            return Ok(Self::Refused);
        }

        let &[_, lease_id, effective_time, expiry_time] = values else {
            return Err(malformed(format!(
                "expected 4 values, got {}: {values:?}",
                values.len()
            )));
        };
        let to_u64 = |v: i64| {
            u64::try_from(v).map_err(|_| malformed(format!("negative value in {values:?}")))
        };
        let lease = Lease {
            lease_id: to_u64(lease_id)?,
            effective_time: to_u64(effective_time)?,
            expiry_time: to_u64(expiry_time)?,
        };
        if lease.effective_time >= lease.expiry_time {
            return Err(malformed(format!("empty validity window in {values:?}")));
        }
        Ok(Self::Granted(lease))
    }

    /// Encodes the reply into the store's integer list.
    pub fn to_values(&self) -> Vec<i64> {
        match self {
            Self::Refused => vec![Self::REFUSED],
            Self::Granted(lease) => vec![
                Self::GRANTED,
                lease.lease_id as i64,
                lease.effective_time as i64,
                lease.expiry_time as i64,
            ],
        }
    }
}

fn malformed(reason: String) -> Error {
    Error::MalformedReply { reason }
}
