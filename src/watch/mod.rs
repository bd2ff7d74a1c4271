//! Watch loops that keep a cache entry fresh and report its changes
//!
//! Each watch runs as its own task and owns a `WatchSession`; nothing is
//! shared between watches except the provider. Every suspension point
//! (fetch, delivery, sleep) races against the watch's cancellation token,
//! with cancellation taking priority when both are ready.

pub(crate) mod blocking;
pub(crate) mod polling;

use crate::policy::BackoffPolicy;
use crate::provider::CacheProvider;
use crate::types::{Fetched, ResultMeta, UpdateEvent};
use futures::future::BoxFuture;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Async callback receiving the events of a watch
///
/// The watch awaits each invocation before fetching again, so a slow
/// callback throttles the watch the same way a full channel does.
pub type UpdateCallback<T> = Arc<dyn Fn(UpdateEvent<T>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Where a watch sends its events
pub(crate) enum Destination<T> {
    /// Bounded channel; a full channel blocks the watch (backpressure)
    Channel(mpsc::Sender<UpdateEvent<T>>),
    /// Awaited callback
    Callback(UpdateCallback<T>),
}

/// Outcome of handing one event to a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    Cancelled,
    Closed,
}

/// Why a watch loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchExit {
    /// The watch's token was cancelled
    Cancelled,
    /// The receiving side of the channel was dropped
    Closed,
}

impl<T: Send + 'static> Destination<T> {
    async fn deliver(&self, event: UpdateEvent<T>, token: &CancellationToken) -> Delivery {
        match self {
            Destination::Channel(tx) => tokio::select! {
                biased;
                _ = token.cancelled() => Delivery::Cancelled,
                sent = tx.send(event) => match sent {
                    Ok(()) => Delivery::Delivered,
                    Err(_) => Delivery::Closed,
                },
            },
            Destination::Callback(callback) => tokio::select! {
                biased;
                _ = token.cancelled() => Delivery::Cancelled,
                _ = (callback.as_ref())(event) => Delivery::Delivered,
            },
        }
    }
}

/// Everything a running watch needs, moved into its task
pub(crate) struct Watch<P: CacheProvider> {
    pub(crate) provider: Arc<P>,
    pub(crate) type_id: String,
    pub(crate) request: P::Request,
    pub(crate) correlation_id: String,
    pub(crate) destination: Destination<P::Value>,
    pub(crate) token: CancellationToken,
    pub(crate) backoff: BackoffPolicy,
}

impl<P: CacheProvider> Watch<P> {
    /// Fetch at `min_index`, or `None` if cancelled first
    async fn fetch(&self, min_index: u64) -> Option<Fetched<P::Value>> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            fetched = self.provider.fetch(&self.type_id, &self.request, min_index) => Some(fetched),
        }
    }

    async fn deliver(&self, fetched: Fetched<P::Value>) -> Delivery {
        let index = fetched.meta.index;
        let delivery = self
            .destination
            .deliver(fetched.into_event(&self.correlation_id), &self.token)
            .await;
        if delivery == Delivery::Delivered {
            tracing::debug!(
                type_id = %self.type_id,
                correlation_id = %self.correlation_id,
                index,
                "Update delivered"
            );
        }
        delivery
    }

    /// Sleep for `wait`; returns false if cancelled first
    async fn pause(&self, wait: Duration) -> bool {
        if wait.is_zero() {
            tokio::task::yield_now().await;
            return !self.token.is_cancelled();
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }

    fn log_failure(&self, fetched: &Fetched<P::Value>, failures: u32, wait: Duration) {
        match &fetched.error {
            Some(err) => tracing::warn!(
                type_id = %self.type_id,
                correlation_id = %self.correlation_id,
                failures,
                wait_ms = millis(wait),
                error = %err,
                "Cache fetch failed, backing off"
            ),
            None => tracing::warn!(
                type_id = %self.type_id,
                correlation_id = %self.correlation_id,
                failures,
                wait_ms = millis(wait),
                "Blocking fetch returned index 0, backing off"
            ),
        }
    }
}

/// Whole milliseconds of `duration` for log fields, saturating at `u64::MAX`
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Loop-local state of one watch
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WatchSession<T> {
    /// Last delivered index; 0 asks the provider for its current value
    pub(crate) index: u64,
    /// Consecutive failed fetches
    pub(crate) failures: u32,
    /// Last delivered value (polling only)
    pub(crate) last_value: Option<T>,
}

impl<T: PartialEq> WatchSession<T> {
    pub(crate) fn new() -> Self {
        Self {
            index: 0,
            failures: 0,
            last_value: None,
        }
    }

    /// Blocking watches report only index advances
    pub(crate) fn blocking_changed(&self, meta: &ResultMeta) -> bool {
        meta.index > self.index
    }

    /// Polling watches also report in-place value changes at the same index
    ///
    /// A result whose index went backwards is stale and never reported.
    pub(crate) fn polling_changed(&self, fetched: &Fetched<T>) -> bool {
        match fetched.meta.index.cmp(&self.index) {
            Ordering::Greater => true,
            Ordering::Equal => fetched.value != self.last_value,
            Ordering::Less => false,
        }
    }

    /// A blocking fetch succeeded only if it had no error and a real index
    pub(crate) fn record_blocking(&mut self, fetched: &Fetched<T>) {
        if fetched.error.is_none() && fetched.meta.index > 0 {
            self.failures = 0;
        } else {
            self.failures = self.failures.saturating_add(1);
        }
    }

    pub(crate) fn record_polling(&mut self, fetched: &Fetched<T>) {
        if fetched.error.is_none() {
            self.failures = 0;
        } else {
            self.failures = self.failures.saturating_add(1);
        }
    }

    /// Index 0 is reserved for "give me what you have"; after the first
    /// round every blocking fetch must actually block
    pub(crate) fn ensure_blocking_floor(&mut self) {
        self.index = self.index.max(1);
    }
}
