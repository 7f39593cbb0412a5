//! Test doubles shared by the unit tests.

use std::sync::{
    Arc,
    atomic::{AtomicU32, AtomicU64, Ordering},
};

use crate::{
    Error, Result,
    lease::{GrantRequest, RenewRequest},
    store::LeaseStore,
    time::TimeSource,
};

/// A manually driven clock. Clones share the same reading.
#[derive(Clone, Debug, Default)]
pub struct MockClock(Arc<AtomicU64>);

impl MockClock {
    pub fn new(millis: u64) -> Self {
        Self(Arc::new(AtomicU64::new(millis)))
    }

    pub fn set(&self, millis: u64) {
        self.0.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.0.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for MockClock {
    fn current_millis(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Milliseconds on Tokio's clock, so paused-time tests drive it with
/// `tokio::time::advance` and auto-advance.
#[derive(Clone, Copy, Debug)]
pub struct TokioClock {
    start: tokio::time::Instant,
    base: u64,
}

impl TokioClock {
    pub fn new(base: u64) -> Self {
        Self {
            start: tokio::time::Instant::now(),
            base,
        }
    }
}

impl TimeSource for TokioClock {
    fn current_millis(&self) -> u64 {
        self.base + self.start.elapsed().as_millis() as u64
    }
}

/// Wraps a store, failing a configurable number of calls as unreachable and
/// counting every call.
#[derive(Debug)]
pub struct FlakyStore<S> {
    pub inner: S,
    pub grant_failures: AtomicU32,
    pub renew_failures: AtomicU32,
    pub grants: AtomicU32,
    pub renewals: AtomicU32,
}

impl<S> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            grant_failures: AtomicU32::new(0),
            renew_failures: AtomicU32::new(0),
            grants: AtomicU32::new(0),
            renewals: AtomicU32::new(0),
        }
    }

    pub fn fail_grants(&self, n: u32) {
        self.grant_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_renewals(&self, n: u32) {
        self.renew_failures.store(n, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl<S: LeaseStore> LeaseStore for FlakyStore<S> {
    async fn grant(&self, request: &GrantRequest) -> Result<Vec<i64>> {
        self.grants.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.grant_failures) {
            return Err(Error::Unreachable {
                context: "injected grant failure".to_string(),
            });
        }
        self.inner.grant(request).await
    }

    async fn renew(&self, request: &RenewRequest) -> Result<Vec<i64>> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.renew_failures) {
            return Err(Error::Unreachable {
                context: "injected renew failure".to_string(),
            });
        }
        self.inner.renew(request).await
    }
}

/// A store that answers every call with a fixed raw reply.
#[derive(Clone, Debug)]
pub struct FixedReplyStore(pub Vec<i64>);

impl LeaseStore for FixedReplyStore {
    async fn grant(&self, _request: &GrantRequest) -> Result<Vec<i64>> {
        Ok(self.0.clone())
    }

    async fn renew(&self, _request: &RenewRequest) -> Result<Vec<i64>> {
        Ok(self.0.clone())
    }
}

/// A store that never answers.
#[derive(Clone, Copy, Debug)]
pub struct HangingStore;

impl LeaseStore for HangingStore {
    async fn grant(&self, _request: &GrantRequest) -> Result<Vec<i64>> {
        core::future::pending().await
    }

    async fn renew(&self, _request: &RenewRequest) -> Result<Vec<i64>> {
        core::future::pending().await
    }
}
