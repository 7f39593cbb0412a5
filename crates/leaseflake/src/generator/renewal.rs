//! Background task keeping the lease of a [`LeaseGenerator`] alive.
//!
//! [`LeaseGenerator`]: crate::LeaseGenerator

use core::time::Duration;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::{
    Error, Result,
    generator::{Shared, Tenure, acquire_tenure},
    lease::Lease,
    store::LeaseStore,
    time::TimeSource,
};

/// Renews at half the lease lifetime until cancelled.
///
/// Sleeps are interrupted by cancellation and by the generation path's
/// recovery signal. A store call already in flight runs to completion; it is
/// bounded by the store timeout.
pub(crate) async fn run<S, T>(shared: Arc<Shared<S, T>>)
where
    S: LeaseStore,
    T: TimeSource + Send + Sync + 'static,
{
    let mut delay = half_life(&shared.tenure.load().lease);
    loop {
        tokio::select! {
            biased;
            () = shared.cancel.cancelled() => break,
            () = shared.recover.notified() => debug!("woken for lease recovery"),
            () = tokio::time::sleep(delay) => {}
        }
        delay = refresh(&shared).await;
    }
    debug!("renewal task stopped");
}

/// Renews or replaces the lease and returns the delay until the next attempt.
async fn refresh<S, T>(shared: &Shared<S, T>) -> Duration
where
    S: LeaseStore,
    T: TimeSource,
{
    let tenure = shared.tenure.load();
    let now = tenure.store_time(shared.clock.current_millis());

    let result = if tenure.lease.is_expired_at(now) {
        error!(lease = %tenure.lease, now, "lease expired before renewal, acquiring a new one");
        reacquire(shared, &tenure).await
    } else {
        match shared
            .allocator
            .renew(&tenure.lease, shared.config.lease_ttl)
            .await
        {
            Ok(lease) => {
                shared.tenure.store(tenure.renewed(lease));
                Ok(lease)
            }
            Err(Error::RenewalRejected { lease_id }) => {
                warn!(lease_id, "renewal rejected, acquiring a new lease");
                reacquire(shared, &tenure).await
            }
            Err(e) => Err(e),
        }
    };

    match result {
        Ok(lease) => half_life(&lease),
        Err(e) => {
            let retry = shared.config.renew_retry_delay;
            let now = tenure.store_time(shared.clock.current_millis());
            let remaining = tenure.lease.remaining_at(now);
            warn!(error = %e, ?retry, remaining, "lease refresh failed");
            if remaining == 0 {
                retry
            } else {
                retry.min(Duration::from_millis(remaining))
            }
        }
    }
}

async fn reacquire<S, T>(shared: &Shared<S, T>, previous: &Tenure) -> Result<Lease>
where
    S: LeaseStore,
    T: TimeSource,
{
    let tenure = acquire_tenure(
        &shared.allocator,
        &shared.clock,
        &shared.config,
        previous.acquisition + 1,
        1,
    )
    .await?;
    shared.tenure.store(tenure);
    Ok(tenure.lease)
}

fn half_life(lease: &Lease) -> Duration {
    Duration::from_millis((lease.lifetime_millis() / 2).max(1))
}
