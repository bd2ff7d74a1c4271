//! Fixed-cadence watch loop for polling-only types

use super::{millis, Delivery, Watch, WatchExit, WatchSession};
use crate::policy::FreshnessPolicy;
use crate::provider::CacheProvider;
use std::time::Duration;

/// Run a polling watch until it is cancelled or its channel closes
///
/// Errors retry on the backoff schedule alone. Successful polls sleep until
/// the returned data would exceed `max_age`, plus jitter, so watches that
/// share a cache entry refresh it roughly once per `max_age` between them.
pub(crate) async fn run<P: CacheProvider>(
    watch: Watch<P>,
    freshness: FreshnessPolicy,
    max_age: Duration,
) -> WatchExit {
    let mut session = WatchSession::new();

    loop {
        if watch.token.is_cancelled() {
            return WatchExit::Cancelled;
        }

        let Some(fetched) = watch.fetch(session.index).await else {
            return WatchExit::Cancelled;
        };

        if watch.token.is_cancelled() {
            return WatchExit::Cancelled;
        }

        session.record_polling(&fetched);
        let age = fetched.meta.age;
        let wait = if session.failures > 0 {
            let wait = watch.backoff.wait(session.failures);
            watch.log_failure(&fetched, session.failures, wait);
            wait
        } else {
            let wait = freshness.wait(max_age, age);
            tracing::trace!(
                type_id = %watch.type_id,
                correlation_id = %watch.correlation_id,
                age_ms = millis(age),
                wait_ms = millis(wait),
                "Next poll scheduled"
            );
            wait
        };

        if session.polling_changed(&fetched) {
            let index = fetched.meta.index;
            let value = fetched.value.clone();
            match watch.deliver(fetched).await {
                Delivery::Delivered => {
                    session.index = index;
                    session.last_value = value;
                }
                Delivery::Cancelled => return WatchExit::Cancelled,
                Delivery::Closed => return WatchExit::Closed,
            }
        }

        if !watch.pause(wait).await {
            return WatchExit::Cancelled;
        }
    }
}
