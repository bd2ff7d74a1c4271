//! Long-poll watch loop for blocking-capable types

use super::{Delivery, Watch, WatchExit, WatchSession};
use crate::provider::CacheProvider;

/// Run a blocking watch until it is cancelled or its channel closes
///
/// Starts at index 0 so the currently cached value is delivered first;
/// every later fetch blocks until the provider has something newer.
pub(crate) async fn run<P: CacheProvider>(watch: Watch<P>) -> WatchExit {
    let mut session = WatchSession::new();

    loop {
        if watch.token.is_cancelled() {
            return WatchExit::Cancelled;
        }

        let Some(fetched) = watch.fetch(session.index).await else {
            return WatchExit::Cancelled;
        };

        // The fetch may have blocked for a long time
        if watch.token.is_cancelled() {
            return WatchExit::Cancelled;
        }

        session.record_blocking(&fetched);
        let wait = watch.backoff.wait(session.failures);
        if session.failures > 0 {
            watch.log_failure(&fetched, session.failures, wait);
        }

        if session.blocking_changed(&fetched.meta) {
            let index = fetched.meta.index;
            match watch.deliver(fetched).await {
                Delivery::Delivered => session.index = index,
                Delivery::Cancelled => return WatchExit::Cancelled,
                Delivery::Closed => return WatchExit::Closed,
            }
        }

        if !watch.pause(wait).await {
            return WatchExit::Cancelled;
        }

        session.ensure_blocking_floor();
    }
}
