use std::time::Instant;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    Error, IdGenStatus, Result,
    allocator::Allocator,
    config::GeneratorConfig,
    generator::{GenerationState, LeaseCell, Tenure, acquire_tenure, wait_async},
    layout::{BitLayout, IdParts},
    lease::Lease,
    store::LeaseStore,
    time::{TimeSource, WallClock},
};

#[derive(Debug)]
struct FallbackState {
    gen_state: GenerationState,
    /// Highest store-time estimate seen outside fallback.
    last_observed: u64,
    /// When the current clock rollback was first seen.
    fallback_since: Option<Instant>,
}

/// A generator driven by the wall clock, with no background task.
///
/// A lease is requested synchronously, under the state lock, when the held
/// one expires. If the clock moves backward the generator keeps issuing
/// sequences in the last unit it used; when that unit runs out, or the
/// rollback lasts longer than `max_fallback`, it requests a fresh lease
/// instead of waiting for the clock to catch up.
#[derive(Debug)]
pub struct FallbackGenerator<S, T = WallClock>
where
    S: LeaseStore,
    T: TimeSource,
{
    config: GeneratorConfig,
    allocator: Allocator<S>,
    clock: T,
    tenure: LeaseCell,
    state: Mutex<FallbackState>,
    closed: CancellationToken,
}

impl<S, T> FallbackGenerator<S, T>
where
    S: LeaseStore,
    T: TimeSource,
{
    /// Validates `config` and acquires the initial lease.
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
        info!(lease = %tenure.lease, "generator started");

        let state = FallbackState {
            gen_state: GenerationState::new(&config.layout, &tenure),
            last_observed: tenure.store_time(clock.current_millis()),
            fallback_since: None,
        };
        Ok(Self {
            state: Mutex::new(state),
            tenure: LeaseCell::new(tenure),
            config,
            allocator,
            clock,
            closed: CancellationToken::new(),
        })
    }

    /// Makes a single generation attempt, requesting a new lease first if
    /// needed.
    ///
    /// # Errors
    ///
    /// - Grant errors ([`Error::AllocationFailed`], [`Error::Unreachable`],
    ///   ...) when a needed lease could not be obtained. The call can be
    ///   retried.
    /// - [`Error::FieldOverflow`] once the layout's time range is exhausted.
    /// - [`Error::Shutdown`] after [`Self::shutdown`].
    pub async fn try_poll_id(&self) -> Result<IdGenStatus> {
        let mut state = self.state.lock().await;
        self.poll(&mut state).await
    }

    /// Returns the next ID, waiting out sequence exhaustion while holding the
    /// state lock.
    ///
    /// # Errors
    ///
    /// Same as [`Self::try_poll_id`].
    #[instrument(level = "trace", skip(self))]
    pub async fn next_id(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        loop {
            match self.poll(&mut state).await? {
                IdGenStatus::Ready { id } => return Ok(id),
                IdGenStatus::Pending { yield_for } => {
                    wait_async(self.config.exhaustion, yield_for).await;
                }
            }
        }
    }

    async fn poll(&self, state: &mut FallbackState) -> Result<IdGenStatus> {
        let layout = &self.config.layout;
        loop {
            if self.closed.is_cancelled() {
                return Err(Error::Shutdown);
            }
            let tenure = self.tenure.load();
            let now = tenure.store_time(self.clock.current_millis());
            let lease_id = tenure.lease.lease_id;

            if now < state.last_observed {
                let since = match state.fallback_since {
                    Some(since) => since,
                    None => {
                        warn!(
                            now,
                            last_observed = state.last_observed,
                            "clock moved backward, entering fallback"
                        );
                        *state.fallback_since.insert(Instant::now())
                    }
                };
                if since.elapsed() >= self.config.max_fallback {
                    warn!(
                        elapsed = ?since.elapsed(),
                        "fallback lasted too long, acquiring a new lease"
                    );
                } else if let Some(sequence) =
                    state.gen_state.advance(layout, state.gen_state.last_unit)
                {
                    let id = layout.try_encode(state.gen_state.last_unit, lease_id, sequence)?;
                    return Ok(IdGenStatus::Ready { id });
                } else {
                    debug!(
                        unit = state.gen_state.last_unit,
                        "sequence exhausted in fallback, acquiring a new lease"
                    );
                }
                self.reacquire(state, &tenure).await?;
                continue;
            }

            if state.fallback_since.take().is_some() {
                info!(now, "clock caught up, leaving fallback");
            }
            state.last_observed = now;

            if tenure.lease.is_expired_at(now) {
                debug!(lease = %tenure.lease, now, "lease expired, acquiring a new one");
                self.reacquire(state, &tenure).await?;
                continue;
            }

            let gen_state = &mut state.gen_state;
            return match gen_state.advance(layout, layout.unit_of(now)) {
                Some(sequence) => Ok(IdGenStatus::Ready {
                    id: layout.try_encode(gen_state.last_unit, lease_id, sequence)?,
                }),
                None => Ok(IdGenStatus::Pending {
                    yield_for: gen_state.backoff(layout, self.config.exhaustion, now),
                }),
            };
        }
    }

    async fn reacquire(&self, state: &mut FallbackState, previous: &Tenure) -> Result<()> {
        let tenure = acquire_tenure(
            &self.allocator,
            &self.clock,
            &self.config,
            previous.acquisition + 1,
            1,
        )
        .await?;
        state.gen_state.rebase(&self.config.layout, &tenure);
        state.last_observed = tenure.store_time(self.clock.current_millis());
        if state.fallback_since.take().is_some() {
            info!(lease = %tenure.lease, "left fallback with a new lease");
        }
        self.tenure.store(tenure);
        Ok(())
    }

    /// The lease currently held.
    pub fn lease(&self) -> Lease {
        self.tenure.load().lease
    }

    pub fn layout(&self) -> &BitLayout {
        &self.config.layout
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn allocator(&self) -> &Allocator<S> {
        &self.allocator
    }

    pub fn decode(&self, id: u64) -> IdParts {
        self.config.layout.decode(id)
    }

    /// Marks the generator closed; later calls fail with [`Error::Shutdown`].
    pub fn shutdown(&self) {
        self.closed.cancel();
        info!(lease = %self.lease(), "generator shut down");
    }
}
