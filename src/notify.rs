//! Notify dispatcher: registers watches on top of a cache provider
//!
//! `Notifier` looks up what kind of reads a type supports, validates the
//! request, and spawns the matching watch loop as an independent task.
//! Watches are not tracked after they start: each one lives until its
//! cancellation token fires or its receiver is dropped.

use crate::config::NotifyConfig;
use crate::error::{NotifyError, Result};
use crate::policy::{BackoffPolicy, FreshnessPolicy};
use crate::provider::{CacheProvider, CacheRequest};
use crate::types::{TypeCapability, UpdateEvent};
use crate::watch::{blocking, polling, Destination, UpdateCallback, Watch, WatchExit};
use futures::future::BoxFuture;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Loop selected for a watch, resolved once before spawning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchStrategy {
    Blocking,
    Polling { max_age: Duration },
}

/// Registers change notifications for cache entries
///
/// Cheap to clone; clones share the provider.
pub struct Notifier<P: CacheProvider> {
    provider: Arc<P>,
    backoff: BackoffPolicy,
    freshness: FreshnessPolicy,
}

impl<P: CacheProvider> Clone for Notifier<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            backoff: self.backoff,
            freshness: self.freshness,
        }
    }
}

impl<P: CacheProvider> Notifier<P> {
    /// Create a notifier with the default pacing configuration
    pub fn new(provider: P) -> Self {
        let config = NotifyConfig::default();
        Self {
            provider: Arc::new(provider),
            backoff: BackoffPolicy::new(&config.backoff),
            freshness: FreshnessPolicy::new(&config.freshness),
        }
    }

    /// Create a notifier with a validated configuration
    pub fn with_config(provider: P, config: NotifyConfig) -> Result<Self> {
        Self::shared(Arc::new(provider), config)
    }

    /// Create a notifier over a provider that is also used elsewhere
    pub fn shared(provider: Arc<P>, config: NotifyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            provider,
            backoff: BackoffPolicy::new(&config.backoff),
            freshness: FreshnessPolicy::new(&config.freshness),
        })
    }

    /// Get a reference to the underlying provider
    pub fn provider(&self) -> &P {
        self.provider.as_ref()
    }

    /// Get the provider name
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Watch `request` and send every change to `tx`
    ///
    /// Returns once the watch task is spawned, not when the first event
    /// arrives. The watch runs until `token` is cancelled or every receiver
    /// of `tx` is dropped. A consumer that stops draining `tx` stalls the
    /// watch: no further fetches happen until the pending event is taken.
    ///
    /// Fails without spawning anything if the type is unknown, or if it is
    /// polling-only and the request has no positive max age.
    pub fn notify(
        &self,
        token: CancellationToken,
        type_id: &str,
        request: P::Request,
        correlation_id: impl Into<String>,
        tx: mpsc::Sender<UpdateEvent<P::Value>>,
    ) -> Result<()> {
        let strategy = self.strategy(type_id, &request)?;
        self.spawn(
            strategy,
            token,
            type_id,
            request,
            correlation_id.into(),
            Destination::Channel(tx),
        );
        Ok(())
    }

    /// Watch `request` and hand every change to an async callback
    ///
    /// The callback is awaited before the next fetch, so it paces the
    /// watch the same way a full channel does.
    pub fn notify_callback<F, Fut>(
        &self,
        token: CancellationToken,
        type_id: &str,
        request: P::Request,
        correlation_id: impl Into<String>,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(UpdateEvent<P::Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let strategy = self.strategy(type_id, &request)?;
        let callback: UpdateCallback<P::Value> =
            Arc::new(move |event| -> BoxFuture<'static, ()> { Box::pin(callback(event)) });
        self.spawn(
            strategy,
            token,
            type_id,
            request,
            correlation_id.into(),
            Destination::Callback(callback),
        );
        Ok(())
    }

    /// Watch `request` through a handle that owns its channel and token
    ///
    /// Dropping the handle stops the watch. `buffer` is clamped to at
    /// least 1.
    pub fn watch(
        &self,
        type_id: &str,
        request: P::Request,
        buffer: usize,
    ) -> Result<WatchHandle<P::Value>> {
        let correlation_id = format!("watch-{}", uuid::Uuid::new_v4());
        let token = CancellationToken::new();
        let (tx, receiver) = mpsc::channel(buffer.max(1));

        self.notify(token.clone(), type_id, request, correlation_id.clone(), tx)?;

        Ok(WatchHandle {
            correlation_id,
            receiver,
            token: token.clone(),
            _guard: token.drop_guard(),
        })
    }

    fn strategy(&self, type_id: &str, request: &P::Request) -> Result<WatchStrategy> {
        match self.provider.capability(type_id) {
            None => Err(NotifyError::UnknownType(type_id.to_string())),
            Some(TypeCapability::Blocking) => Ok(WatchStrategy::Blocking),
            Some(TypeCapability::Polling) => request
                .cache_info()
                .positive_max_age()
                .map(|max_age| WatchStrategy::Polling { max_age })
                .ok_or_else(|| NotifyError::MissingMaxAge(type_id.to_string())),
        }
    }

    fn spawn(
        &self,
        strategy: WatchStrategy,
        token: CancellationToken,
        type_id: &str,
        request: P::Request,
        correlation_id: String,
        destination: Destination<P::Value>,
    ) {
        tracing::debug!(
            type_id,
            correlation_id = %correlation_id,
            strategy = ?strategy,
            provider = self.provider.name(),
            "Watch started"
        );

        let watch = Watch {
            provider: self.provider.clone(),
            type_id: type_id.to_string(),
            request,
            correlation_id,
            destination,
            token,
            backoff: self.backoff,
        };
        let type_id = watch.type_id.clone();
        let correlation_id = watch.correlation_id.clone();
        let freshness = self.freshness;

        tokio::spawn(async move {
            let exit = match strategy {
                WatchStrategy::Blocking => blocking::run(watch).await,
                WatchStrategy::Polling { max_age } => polling::run(watch, freshness, max_age).await,
            };
            let reason = match exit {
                WatchExit::Cancelled => "cancelled",
                WatchExit::Closed => "receiver dropped",
            };
            tracing::debug!(
                type_id = %type_id,
                correlation_id = %correlation_id,
                reason,
                "Watch stopped"
            );
        });
    }
}

/// A self-contained watch: its own channel, token, and correlation id
///
/// Events are read with `recv` or through the `Stream` impl. Dropping the
/// handle cancels the watch.
pub struct WatchHandle<T> {
    correlation_id: String,
    receiver: mpsc::Receiver<UpdateEvent<T>>,
    token: CancellationToken,
    _guard: DropGuard,
}

impl<T> WatchHandle<T> {
    /// Correlation id stamped on every event of this watch
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Receive the next update, `None` once the watch has stopped
    pub async fn recv(&mut self) -> Option<UpdateEvent<T>> {
        self.receiver.recv().await
    }

    /// Stop the watch
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the watch has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl<T> Stream for WatchHandle<T> {
    type Item = UpdateEvent<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}
