use core::{future::Future, ops::RangeInclusive, time::Duration};

use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::{
    Error, Result,
    config::GeneratorConfig,
    layout::BitLayout,
    lease::{AllocationReply, GrantRequest, Lease, RenewRequest},
    store::LeaseStore,
};

/// Client side of the lease allocation contract.
///
/// Turns raw store replies into [`Lease`]s or typed errors, bounds every
/// store call with a timeout, and keeps requested TTLs within the configured
/// range. It holds no knowledge of other leases: the store is the sole
/// arbiter of lease-id uniqueness.
#[derive(Debug)]
pub struct Allocator<S> {
    store: S,
    layout: BitLayout,
    owner_label: String,
    ttl_bounds: RangeInclusive<Duration>,
    store_timeout: Duration,
}

impl<S: LeaseStore> Allocator<S> {
    /// Creates an allocator sending `config.owner_label` with every request.
    pub fn new(store: S, config: &GeneratorConfig) -> Self {
        Self {
            store,
            layout: config.layout,
            owner_label: config.owner_label.clone(),
            ttl_bounds: config.ttl_bounds.clone(),
            store_timeout: config.store_timeout,
        }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    pub fn owner_label(&self) -> &str {
        &self.owner_label
    }

    /// Requests a new lease valid for `ttl` from the store's current time.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if `ttl` is outside the configured bounds.
    /// - [`Error::AllocationFailed`] if every lease-id is held.
    /// - [`Error::Unreachable`] on transport failure or timeout.
    /// - [`Error::MalformedReply`] if the reply breaks the wire contract.
    #[instrument(level = "debug", skip(self), fields(owner = %self.owner_label))]
    pub async fn grant(&self, ttl: Duration) -> Result<Lease> {
        let request = GrantRequest {
            ttl_millis: self.ttl_millis(ttl)?,
            owner_label: self.owner_label.clone(),
        };
        let values = self.call("grant", self.store.grant(&request)).await?;

        match AllocationReply::from_values(&values)? {
            AllocationReply::Refused => {
                warn!("store has no free lease-id");
                Err(Error::AllocationFailed {
                    reason: format!(
                        "all {} lease-ids are held",
                        self.layout.max_lease_id() + 1
                    ),
                })
            }
            AllocationReply::Granted(lease) => {
                self.check_lease_id(&lease)?;
                info!(%lease, "lease granted");
                Ok(lease)
            }
        }
    }

    /// Extends `lease` by `ttl` from the store's current time.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if `ttl` is outside the configured bounds.
    /// - [`Error::RenewalRejected`] if the store no longer attributes the
    ///   lease-id to this holder.
    /// - [`Error::Unreachable`] on transport failure or timeout.
    /// - [`Error::MalformedReply`] if the reply breaks the wire contract.
    #[instrument(level = "debug", skip(self), fields(lease_id = lease.lease_id))]
    pub async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease> {
        let request = RenewRequest {
            ttl_millis: self.ttl_millis(ttl)?,
            owner_label: self.owner_label.clone(),
            lease_id: lease.lease_id,
            expiry_time: lease.expiry_time,
        };
        let values = self.call("renew", self.store.renew(&request)).await?;

        match AllocationReply::from_values(&values)? {
            AllocationReply::Refused => Err(Error::RenewalRejected {
                lease_id: lease.lease_id,
            }),
            AllocationReply::Granted(renewed) if renewed.lease_id != lease.lease_id => {
                Err(Error::MalformedReply {
                    reason: format!(
                        "renewal of lease {} answered for lease {}",
                        lease.lease_id, renewed.lease_id
                    ),
                })
            }
            AllocationReply::Granted(renewed) => {
                debug!(lease = %renewed, "lease renewed");
                Ok(renewed)
            }
        }
    }

    async fn call<F>(&self, op: &str, call: F) -> Result<Vec<i64>>
    where
        F: Future<Output = Result<Vec<i64>>>,
    {
        match timeout(self.store_timeout, call).await {
            Ok(reply) => reply,
            Err(_) => Err(Error::Unreachable {
                context: format!("{op} timed out after {:?}", self.store_timeout),
            }),
        }
    }

    fn ttl_millis(&self, ttl: Duration) -> Result<u64> {
        if !self.ttl_bounds.contains(&ttl) {
            return Err(Error::InvalidConfig {
                reason: format!(
                    "lease ttl {ttl:?} outside {:?}..={:?}",
                    self.ttl_bounds.start(),
                    self.ttl_bounds.end()
                ),
            });
        }
        Ok(ttl.as_millis() as u64)
    }

    fn check_lease_id(&self, lease: &Lease) -> Result<()> {
        if lease.lease_id > self.layout.max_lease_id() {
            return Err(Error::MalformedReply {
                reason: format!(
                    "lease-id {} does not fit in {} bits",
                    lease.lease_id,
                    self.layout.lease_id_bits()
                ),
            });
        }
        Ok(())
    }
}
