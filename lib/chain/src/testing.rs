//! In-memory subscriber for tests.

use crate::error::ChainError;
use crate::subscriber::{ChainSubscriber, SubscriptionHandle, SubscriptionRequest};
use async_trait::async_trait;
use rootcause::Report;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records subscriptions instead of opening them.
#[derive(Debug, Default)]
pub struct FakeChain {
    next_handle: AtomicU64,
    live: Mutex<BTreeMap<SubscriptionHandle, SubscriptionRequest>>,
    rejected: Mutex<HashSet<SubscriptionRequest>>,
    subscribe_calls: AtomicU64,
}

impl FakeChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subscribing to `request` fail.
    pub fn reject(&self, request: SubscriptionRequest) {
        lock(&self.rejected).insert(request);
    }

    /// Undoes [`FakeChain::reject`].
    pub fn accept(&self, request: &SubscriptionRequest) {
        lock(&self.rejected).remove(request);
    }

    /// Live subscriptions, by handle.
    #[must_use]
    pub fn live(&self) -> BTreeMap<SubscriptionHandle, SubscriptionRequest> {
        lock(&self.live).clone()
    }

    /// Drops every live subscription, as a reconnect would.
    pub fn drop_all(&self) {
        lock(&self.live).clear();
    }

    /// Total subscribe calls, including rejected ones.
    #[must_use]
    pub fn subscribe_calls(&self) -> u64 {
        self.subscribe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainSubscriber for FakeChain {
    async fn subscribe(
        &self,
        request: SubscriptionRequest,
    ) -> Result<SubscriptionHandle, Report<ChainError>> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if lock(&self.rejected).contains(&request) {
            return Err(ChainError::Rpc {
                code: -32602,
                message: "Invalid param: WrongSize".to_string(),
            }
            .into());
        }
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        lock(&self.live).insert(handle, request);
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), Report<ChainError>> {
        lock(&self.live).remove(&handle);
        Ok(())
    }
}
