use std::collections::HashMap;

#[cfg(not(feature = "parking-lot"))]
use crate::generator::PoisonError;
use tracing::{debug, instrument};

use crate::{
    Result,
    generator::{Mutex, lock},
    layout::BitLayout,
    lease::{AllocationReply, GrantRequest, Lease, RenewRequest},
    store::LeaseStore,
    time::{TimeSource, WallClock},
};

#[derive(Clone, Debug)]
struct Holder {
    owner_label: String,
    expiry_time: u64,
}

#[derive(Debug, Default)]
struct Table {
    holders: HashMap<u64, Holder>,
    cursor: u64,
}

/// A live lease as recorded by a [`MemoryStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HolderInfo {
    pub lease_id: u64,
    pub owner_label: String,
    pub expiry_time: u64,
}

/// An in-process coordination store.
///
/// Implements the allocation script with the same guarantees a shared store
/// provides: every grant and renewal runs under one lock, so no two callers
/// can hold the same lease-id with overlapping validity windows. Lease-ids
/// are handed out round-robin starting after the last grant, which delays the
/// reuse of recently expired ids.
///
/// Useful for tests, benchmarks and deployments where all generators live in
/// one process.
#[derive(Debug)]
pub struct MemoryStore<T = WallClock> {
    capacity: u64,
    clock: T,
    table: Mutex<Table>,
}

impl MemoryStore<WallClock> {
    /// Creates a store with one slot per lease-id of `layout`.
    pub fn new(layout: &BitLayout) -> Self {
        Self::with_clock(layout.max_lease_id() + 1, WallClock)
    }
}

impl<T: TimeSource> MemoryStore<T> {
    /// Creates a store with `capacity` lease-ids, timed by `clock`.
    pub fn with_clock(capacity: u64, clock: T) -> Self {
        Self {
            capacity,
            clock,
            table: Mutex::new(Table::default()),
        }
    }

    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the leases that are live at the store's current time, ordered
    /// by lease-id.
    pub fn holders(&self) -> Vec<HolderInfo> {
        let now = self.clock.current_millis();
        let table = self.table_lock();
        let mut live: Vec<_> = table
            .holders
            .iter()
            .filter(|(_, h)| h.expiry_time > now)
            .map(|(&lease_id, h)| HolderInfo {
                lease_id,
                owner_label: h.owner_label.clone(),
                expiry_time: h.expiry_time,
            })
            .collect();
        live.sort_by_key(|h| h.lease_id);
        live
    }

    /// Runs the grant script.
    ///
    /// # Errors
    ///
    /// Only fails if the table lock was poisoned (std mutex builds).
    #[instrument(level = "trace", skip(self))]
    pub fn execute_grant(&self, request: &GrantRequest) -> Result<Vec<i64>> {
        let now = self.clock.current_millis();
        let mut table = lock(&self.table)?;

        if request.ttl_millis == 0 || self.capacity == 0 {
            return Ok(AllocationReply::Refused.to_values());
        }

        let free = (0..self.capacity)
            .map(|i| (table.cursor + i) % self.capacity)
            .find(|id| table.holders.get(id).is_none_or(|h| h.expiry_time <= now));

        let Some(lease_id) = free else {
            debug!(owner = %request.owner_label, "all {} lease-ids held", self.capacity);
            return Ok(AllocationReply::Refused.to_values());
        };

        let lease = Lease {
            lease_id,
            effective_time: now,
            expiry_time: now + request.ttl_millis,
        };
        table.cursor = (lease_id + 1) % self.capacity;
        table.holders.insert(
            lease_id,
            Holder {
                owner_label: request.owner_label.clone(),
                expiry_time: lease.expiry_time,
            },
        );
        Ok(AllocationReply::Granted(lease).to_values())
    }

    /// Runs the renewal script.
    ///
    /// Renews only when the recorded expiry of `lease_id` equals the
    /// caller's `expiry_time` and has not lapsed.
    ///
    /// # Errors
    ///
    /// Only fails if the table lock was poisoned (std mutex builds).
    #[instrument(level = "trace", skip(self))]
    pub fn execute_renew(&self, request: &RenewRequest) -> Result<Vec<i64>> {
        let now = self.clock.current_millis();
        let mut table = lock(&self.table)?;

        let Some(holder) = table.holders.get_mut(&request.lease_id) else {
            return Ok(AllocationReply::Refused.to_values());
        };
        if holder.expiry_time != request.expiry_time
            || holder.expiry_time <= now
            || request.ttl_millis == 0
        {
            return Ok(AllocationReply::Refused.to_values());
        }

        let lease = Lease {
            lease_id: request.lease_id,
            effective_time: now,
            expiry_time: now + request.ttl_millis,
        };
        holder.expiry_time = lease.expiry_time;
        holder.owner_label.clone_from(&request.owner_label);
        Ok(AllocationReply::Granted(lease).to_values())
    }

    #[cfg(feature = "parking-lot")]
    fn table_lock(&self) -> crate::generator::MutexGuard<'_, Table> {
        self.table.lock()
    }

    #[cfg(not(feature = "parking-lot"))]
    fn table_lock(&self) -> crate::generator::MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> LeaseStore for MemoryStore<T>
where
    T: TimeSource + Send + Sync + 'static,
{
    async fn grant(&self, request: &GrantRequest) -> Result<Vec<i64>> {
        self.execute_grant(request)
    }

    async fn renew(&self, request: &RenewRequest) -> Result<Vec<i64>> {
        self.execute_renew(request)
    }
}
