use std::sync::Arc;

#[cfg(not(feature = "parking-lot"))]
use crate::generator::PoisonError;
use tracing::{error, warn};

use crate::{
    Error, Result,
    allocator::Allocator,
    config::GeneratorConfig,
    generator::RwLock,
    lease::Lease,
    store::LeaseStore,
    time::TimeSource,
};

/// A lease together with the local clock anchoring needed to use it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Tenure {
    pub lease: Lease,
    /// `store_time - local_time`, measured once per acquisition.
    pub clock_offset: i64,
    /// Increments on every grant; renewals keep it.
    pub acquisition: u64,
}

impl Tenure {
    /// Anchors a freshly granted lease.
    ///
    /// `local_before` must be read before the grant request was sent. The
    /// resulting estimate of store time is never behind the store's clock,
    /// so expiry is observed early rather than late.
    pub fn acquired(lease: Lease, local_before: u64, acquisition: u64) -> Self {
        Self {
            lease,
            clock_offset: lease.effective_time as i64 - local_before as i64,
            acquisition,
        }
    }

    pub fn renewed(&self, lease: Lease) -> Self {
        Self { lease, ..*self }
    }

    /// Estimated store time for a local clock reading.
    pub fn store_time(&self, local: u64) -> u64 {
        local.saturating_add_signed(self.clock_offset)
    }
}

/// The current tenure, replaced wholesale by whoever (re)acquires or renews.
#[derive(Debug)]
pub(crate) struct LeaseCell(RwLock<Arc<Tenure>>);

impl LeaseCell {
    pub fn new(tenure: Tenure) -> Self {
        Self(RwLock::new(Arc::new(tenure)))
    }

    #[cfg(feature = "parking-lot")]
    pub fn load(&self) -> Arc<Tenure> {
        Arc::clone(&self.0.read())
    }

    #[cfg(not(feature = "parking-lot"))]
    pub fn load(&self) -> Arc<Tenure> {
        Arc::clone(&self.0.read().unwrap_or_else(PoisonError::into_inner))
    }

    #[cfg(feature = "parking-lot")]
    pub fn store(&self, tenure: Tenure) {
        *self.0.write() = Arc::new(tenure);
    }

    #[cfg(not(feature = "parking-lot"))]
    pub fn store(&self, tenure: Tenure) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(tenure);
    }
}

/// Requests a new lease, retrying transient failures up to `attempts` times
/// with `config.grant_backoff` in between.
///
/// A lease starting before the layout epoch is refused with
/// [`Error::InvalidConfig`] and not retried.
pub(crate) async fn acquire_tenure<S, T>(
    allocator: &Allocator<S>,
    clock: &T,
    config: &GeneratorConfig,
    acquisition: u64,
    attempts: u32,
) -> Result<Tenure>
where
    S: LeaseStore,
    T: TimeSource,
{
    let mut attempt = 1;
    loop {
        let local_before = clock.current_millis();
        match allocator.grant(config.lease_ttl).await {
            Ok(lease) if lease.effective_time < config.layout.epoch_ms() => {
                // Every unit before the epoch collapses onto unit 0.
                let e = Error::InvalidConfig {
                    reason: format!(
                        "layout epoch {} ms is later than store time {} ms",
                        config.layout.epoch_ms(),
                        lease.effective_time
                    ),
                };
                error!(error = %e, %lease, "lease starts before the layout epoch");
                return Err(e);
            }
            Ok(lease) => return Ok(Tenure::acquired(lease, local_before, acquisition)),
            Err(e) if attempt < attempts && e.is_transient() => {
                warn!(error = %e, attempt, attempts, "lease grant failed, retrying");
                tokio::time::sleep(config.grant_backoff).await;
                attempt += 1;
            }
            Err(e) => {
                error!(error = %e, attempt, "lease grant failed");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Lease = Lease {
        lease_id: 7,
        effective_time: 50_000,
        expiry_time: 60_000,
    };

    #[test]
    fn offset_maps_local_readings_onto_store_time() {
        let tenure = Tenure::acquired(LEASE, 1_000, 1);
        assert_eq!(tenure.clock_offset, 49_000);
        assert_eq!(tenure.store_time(1_000), 50_000);
        assert_eq!(tenure.store_time(1_250), 50_250);

        let behind = Tenure::acquired(LEASE, 80_000, 1);
        assert_eq!(behind.store_time(80_100), 50_100);
        assert_eq!(behind.store_time(0), 0);
    }

    #[test]
    fn renewal_keeps_anchoring() {
        let tenure = Tenure::acquired(LEASE, 1_000, 3);
        let renewed = tenure.renewed(Lease {
            effective_time: 55_000,
            expiry_time: 65_000,
            ..LEASE
        });
        assert_eq!(renewed.acquisition, 3);
        assert_eq!(renewed.clock_offset, tenure.clock_offset);
        assert_eq!(renewed.lease.expiry_time, 65_000);
    }

    #[test]
    fn cell_swaps_whole_tenure() {
        let cell = LeaseCell::new(Tenure::acquired(LEASE, 0, 1));
        let before = cell.load();
        cell.store(Tenure::acquired(LEASE, 10, 2));
        assert_eq!(before.acquisition, 1);
        assert_eq!(cell.load().acquisition, 2);
    }
}
