//! The seam between the allocator and the coordination store.
//!
//! A store executes the allocation script atomically and returns the raw
//! reply described in [`crate::lease`]. Network clients for a concrete backend
//! implement [`LeaseStore`]; [`MemoryStore`] implements the same contract
//! in-process.

mod memory;

use core::future::Future;
use std::sync::Arc;

pub use memory::*;

use crate::{
    Result,
    lease::{GrantRequest, RenewRequest},
};

/// Executes the lease allocation script against a coordination store.
///
/// Implementations must make each call a single atomic execution at the store
/// and report transport failures as [`crate::Error::Unreachable`]. Refusals
/// are not errors here: they are encoded in the reply (`status == 0`) and
/// interpreted by the [`crate::Allocator`].
pub trait LeaseStore: Send + Sync + 'static {
    /// Runs the grant script and returns its raw reply.
    fn grant(&self, request: &GrantRequest) -> impl Future<Output = Result<Vec<i64>>> + Send;

    /// Runs the renewal script and returns its raw reply.
    fn renew(&self, request: &RenewRequest) -> impl Future<Output = Result<Vec<i64>>> + Send;
}

impl<S: LeaseStore> LeaseStore for Arc<S> {
    fn grant(&self, request: &GrantRequest) -> impl Future<Output = Result<Vec<i64>>> + Send {
        (**self).grant(request)
    }

    fn renew(&self, request: &RenewRequest) -> impl Future<Output = Result<Vec<i64>>> + Send {
        (**self).renew(request)
    }
}
