mod any;
mod fallback;
mod lease;
mod mutex;
mod renewal;
mod state;
mod tenure;

use core::time::Duration;
use std::time::Instant;

pub use any::*;
pub use fallback::*;
pub use lease::LeaseGenerator;
pub(crate) use lease::Shared;
pub use mutex::*;
pub(crate) use state::*;
pub(crate) use tenure::*;

use crate::config::ExhaustionStrategy;

/// Waits out an exhausted unit on the calling thread.
pub(crate) fn wait_blocking(strategy: ExhaustionStrategy, yield_for: Duration) {
    match strategy {
        ExhaustionStrategy::BusyWait { .. } => {
            let start = Instant::now();
            while start.elapsed() < yield_for {
                core::hint::spin_loop();
            }
        }
        ExhaustionStrategy::SleepUntilNextUnit => std::thread::sleep(yield_for),
    }
}

/// Waits out an exhausted unit without blocking the runtime.
pub(crate) async fn wait_async(strategy: ExhaustionStrategy, yield_for: Duration) {
    match strategy {
        ExhaustionStrategy::BusyWait { .. } => tokio::task::yield_now().await,
        ExhaustionStrategy::SleepUntilNextUnit => tokio::time::sleep(yield_for).await,
    }
}
