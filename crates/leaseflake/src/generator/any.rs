use crate::{
    Result,
    config::{ClockMode, GeneratorConfig},
    generator::{FallbackGenerator, LeaseGenerator},
    layout::{BitLayout, IdParts},
    lease::Lease,
    store::LeaseStore,
    time::{MonotonicClock, WallClock},
};

/// A generator of either flavor, selected by [`GeneratorConfig::clock_mode`].
///
/// # Example
/// ```
/// use leaseflake::{ClockMode, Generator, GeneratorConfig, MemoryStore};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let config = GeneratorConfig {
///     clock_mode: ClockMode::WallClockFallback,
///     ..GeneratorConfig::default()
/// };
/// let store = MemoryStore::new(&config.layout);
/// let generator = Generator::start(config, store).await.unwrap();
/// assert_eq!(generator.clock_mode(), ClockMode::WallClockFallback);
///
/// let id = generator.next_id().await.unwrap();
/// println!("{:?}", generator.decode(id));
/// generator.shutdown().await.unwrap();
/// # });
/// ```
#[derive(Debug)]
pub enum Generator<S: LeaseStore> {
    MonotonicLease(LeaseGenerator<S, MonotonicClock>),
    WallClockFallback(FallbackGenerator<S, WallClock>),
}

impl<S: LeaseStore> Generator<S> {
    /// Starts the generator flavor named by `config.clock_mode`.
    ///
    /// # Errors
    ///
    /// See [`LeaseGenerator::start`] and [`FallbackGenerator::start`].
    pub async fn start(config: GeneratorConfig, store: S) -> Result<Self> {
        match config.clock_mode {
            ClockMode::MonotonicLease => {
                LeaseGenerator::start(config, store, MonotonicClock::new())
                    .await
                    .map(Self::MonotonicLease)
            }
            ClockMode::WallClockFallback => FallbackGenerator::start(config, store, WallClock)
                .await
                .map(Self::WallClockFallback),
        }
    }

    /// Returns the next ID, waiting out sequence exhaustion.
    ///
    /// # Errors
    ///
    /// See [`LeaseGenerator::try_poll_id`] and
    /// [`FallbackGenerator::try_poll_id`].
    pub async fn next_id(&self) -> Result<u64> {
        match self {
            Self::MonotonicLease(g) => g.next_id_async().await,
            Self::WallClockFallback(g) => g.next_id().await,
        }
    }

    pub const fn clock_mode(&self) -> ClockMode {
        match self {
            Self::MonotonicLease(_) => ClockMode::MonotonicLease,
            Self::WallClockFallback(_) => ClockMode::WallClockFallback,
        }
    }

    pub fn lease(&self) -> Lease {
        match self {
            Self::MonotonicLease(g) => g.lease(),
            Self::WallClockFallback(g) => g.lease(),
        }
    }

    pub fn layout(&self) -> &BitLayout {
        match self {
            Self::MonotonicLease(g) => g.layout(),
            Self::WallClockFallback(g) => g.layout(),
        }
    }

    pub fn decode(&self, id: u64) -> IdParts {
        self.layout().decode(id)
    }

    /// Stops the generator; later calls fail with [`crate::Error::Shutdown`].
    ///
    /// # Errors
    ///
    /// Only fails if the std mutex was poisoned.
    pub async fn shutdown(&self) -> Result<()> {
        match self {
            Self::MonotonicLease(g) => g.shutdown().await,
            Self::WallClockFallback(g) => {
                g.shutdown();
                Ok(())
            }
        }
    }
}
