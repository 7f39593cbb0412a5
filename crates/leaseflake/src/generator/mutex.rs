#[cfg(feature = "parking-lot")]
pub use parking_lot::{Mutex, MutexGuard, RwLock};
#[cfg(not(feature = "parking-lot"))]
pub use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use crate::Result;

/// Locks `mutex`, mapping std poisoning into [`crate::Error::LockPoisoned`].
#[cfg(feature = "parking-lot")]
#[allow(clippy::unnecessary_wraps)]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    Ok(mutex.lock())
}

/// Locks `mutex`, mapping std poisoning into [`crate::Error::LockPoisoned`].
#[cfg(not(feature = "parking-lot"))]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    Ok(mutex.lock()?)
}
