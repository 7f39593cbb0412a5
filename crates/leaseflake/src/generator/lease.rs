use std::sync::Arc;

use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{info, instrument, warn};

use crate::{
    Error, IdGenStatus, Result,
    allocator::Allocator,
    config::GeneratorConfig,
    generator::{
        GenerationState, LeaseCell, Mutex, acquire_tenure, lock, renewal, wait_async,
        wait_blocking,
    },
    layout::{BitLayout, IdParts},
    lease::Lease,
    store::LeaseStore,
    time::{MonotonicClock, TimeSource},
};

#[derive(Debug)]
pub(crate) struct LeaseState {
    pub gen_state: GenerationState,
    /// Set when a call observed the lease expired; cleared on recovery.
    pub needs_lease: bool,
}

/// Everything the generation path and the renewal task share.
#[derive(Debug)]
pub(crate) struct Shared<S, T> {
    pub config: GeneratorConfig,
    pub allocator: Allocator<S>,
    pub clock: T,
    pub tenure: LeaseCell,
    pub state: Mutex<LeaseState>,
    /// Wakes the renewal task as soon as the lease is found expired.
    pub recover: Notify,
    pub cancel: CancellationToken,
}

impl<S, T> Shared<S, T>
where
    S: LeaseStore,
    T: TimeSource,
{
    /// One generation step. Never blocks and never calls the store.
    fn poll(&self, state: &mut LeaseState) -> Result<IdGenStatus> {
        if self.cancel.is_cancelled() {
            return Err(Error::Shutdown);
        }

        let layout = &self.config.layout;
        let tenure = self.tenure.load();
        if tenure.acquisition != state.gen_state.acquisition {
            state.gen_state.rebase(layout, &tenure);
        }

        let now = tenure.store_time(self.clock.current_millis());
        let lease = tenure.lease;
        if lease.is_expired_at(now) {
            if !state.needs_lease {
                state.needs_lease = true;
                warn!(%lease, now, "lease expired, waiting for a new one");
                self.recover.notify_one();
            }
            return Err(Error::LeaseExpired {
                lease_id: lease.lease_id,
                expiry_time: lease.expiry_time,
                now,
            });
        }
        if state.needs_lease {
            state.needs_lease = false;
            info!(%lease, "generation resumed");
        }

        let gen_state = &mut state.gen_state;
        match gen_state.advance(layout, layout.unit_of(now)) {
            Some(sequence) => Ok(IdGenStatus::Ready {
                id: layout.try_encode(gen_state.last_unit, lease.lease_id, sequence)?,
            }),
            None => Ok(IdGenStatus::Pending {
                yield_for: gen_state.backoff(layout, self.config.exhaustion, now),
            }),
        }
    }
}

/// A generator whose time base is a monotonic clock anchored to the store
/// clock at each lease acquisition.
///
/// The lease is kept alive by a background Tokio task spawned in
/// [`LeaseGenerator::start`]; the generation path itself never talks to the
/// store. If renewal keeps failing until the lease expires, generation calls
/// fail with [`Error::LeaseExpired`] until the task acquires a new lease.
///
/// Dropping the generator cancels the renewal task; [`Self::shutdown`]
/// cancels it and waits for it to finish.
///
/// # Example
/// ```
/// use leaseflake::{GeneratorConfig, LeaseGenerator, MemoryStore, MonotonicClock};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let config = GeneratorConfig::default();
/// let store = MemoryStore::new(&config.layout);
/// let generator = LeaseGenerator::start(config, store, MonotonicClock::new())
///     .await
///     .unwrap();
///
/// let a = generator.next_id_async().await.unwrap();
/// let b = generator.next_id_async().await.unwrap();
/// assert!(a < b);
/// assert_eq!(generator.decode(a).lease_id, generator.lease().lease_id);
/// generator.shutdown().await.unwrap();
/// # });
/// ```
#[derive(Debug)]
pub struct LeaseGenerator<S, T = MonotonicClock>
where
    S: LeaseStore,
    T: TimeSource + Send + Sync + 'static,
{
    shared: Arc<Shared<S, T>>,
    renewal: Mutex<Option<JoinHandle<()>>>,
    _cancel_on_drop: DropGuard,
}

impl<S, T> LeaseGenerator<S, T>
where
    S: LeaseStore,
    T: TimeSource + Send + Sync + 'static,
{
    /// Validates `config`, acquires the initial lease and spawns the renewal
    /// task.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidLayout`] / [`Error::InvalidConfig`] for a bad config.
    /// - The last grant error once `config.grant_attempts` are used up.
    #[instrument(level = "debug", skip_all, fields(owner = %config.owner_label))]
    pub async fn start(config: GeneratorConfig, store: S, clock: T) -> Result<Self> {
        config.validate()?;
        let allocator = Allocator::new(store, &config);
        let tenure =
            acquire_tenure(&allocator, &clock, &config, 1, config.grant_attempts).await?;

        let cancel = CancellationToken::new();
        let shared = Arc::new(Shared {
            state: Mutex::new(LeaseState {
                gen_state: GenerationState::new(&config.layout, &tenure),
                needs_lease: false,
            }),
            tenure: LeaseCell::new(tenure),
            config,
            allocator,
            clock,
            recover: Notify::new(),
            cancel: cancel.clone(),
        });
        let handle = tokio::spawn(renewal::run(Arc::clone(&shared)));
        info!(lease = %tenure.lease, "generator started");

        Ok(Self {
            shared,
            renewal: Mutex::new(Some(handle)),
            _cancel_on_drop: cancel.drop_guard(),
        })
    }

    /// Makes a single generation attempt.
    ///
    /// # Errors
    ///
    /// - [`Error::LeaseExpired`] if the lease lapsed; retry after a short
    ///   delay.
    /// - [`Error::FieldOverflow`] once the layout's time range is exhausted.
    /// - [`Error::Shutdown`] after [`Self::shutdown`].
    #[instrument(level = "trace", skip(self))]
    pub fn try_poll_id(&self) -> Result<IdGenStatus> {
        let mut state = lock(&self.shared.state)?;
        self.shared.poll(&mut state)
    }

    /// Returns the next ID, waiting out sequence exhaustion while holding the
    /// state lock.
    ///
    /// Blocks the calling thread while waiting; prefer
    /// [`Self::next_id_async`] on async tasks.
    ///
    /// # Errors
    ///
    /// Same as [`Self::try_poll_id`].
    #[instrument(level = "trace", skip(self))]
    pub fn next_id(&self) -> Result<u64> {
        let mut state = lock(&self.shared.state)?;
        loop {
            match self.shared.poll(&mut state)? {
                IdGenStatus::Ready { id } => return Ok(id),
                IdGenStatus::Pending { yield_for } => {
                    wait_blocking(self.shared.config.exhaustion, yield_for);
                }
            }
        }
    }

    /// Returns the next ID, releasing the state lock between attempts.
    ///
    /// # Errors
    ///
    /// Same as [`Self::try_poll_id`].
    pub async fn next_id_async(&self) -> Result<u64> {
        loop {
            match self.try_poll_id()? {
                IdGenStatus::Ready { id } => return Ok(id),
                IdGenStatus::Pending { yield_for } => {
                    wait_async(self.shared.config.exhaustion, yield_for).await;
                }
            }
        }
    }

    /// The lease currently held.
    pub fn lease(&self) -> Lease {
        self.shared.tenure.load().lease
    }

    pub fn layout(&self) -> &BitLayout {
        &self.shared.config.layout
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.shared.config
    }

    pub fn allocator(&self) -> &Allocator<S> {
        &self.shared.allocator
    }

    pub fn decode(&self, id: u64) -> IdParts {
        self.shared.config.layout.decode(id)
    }

    /// Stops the renewal task and waits for it to finish. Later generation
    /// calls fail with [`Error::Shutdown`].
    ///
    /// # Errors
    ///
    /// Only fails if the std mutex was poisoned.
    pub async fn shutdown(&self) -> Result<()> {
        self.shared.cancel.cancel();
        let handle = lock(&self.renewal)?.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "renewal task ended abnormally");
            }
        }
        info!(lease = %self.lease(), "generator shut down");
        Ok(())
    }
}
