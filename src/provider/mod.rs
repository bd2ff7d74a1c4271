//! Cache provider trait: the fetch port the watch loops drive
//!
//! A provider wraps a read-through cache that can return one value for a
//! request, optionally blocking until a newer index exists. The watch
//! loops only ever talk to the cache through `CacheProvider`.

use crate::types::{Fetched, RequestInfo, TypeCapability};
use async_trait::async_trait;

pub mod memory;

/// A request the cache can serve
pub trait CacheRequest: Send + Sync + 'static {
    /// Cache-facing view of the request (key, max age, timeout)
    fn cache_info(&self) -> RequestInfo;
}

impl CacheRequest for RequestInfo {
    fn cache_info(&self) -> RequestInfo {
        self.clone()
    }
}

/// Core trait for cache backends
///
/// Implementations must be safe for concurrent calls from many watches.
/// Coalescing simultaneous fetches of the same key, if any, happens here
/// and not in the watch loops.
#[async_trait]
pub trait CacheProvider: Send + Sync + 'static {
    /// Payload type; `PartialEq` is used by polling watches to detect
    /// in-place changes that did not bump the index
    type Value: Clone + PartialEq + Send + Sync + 'static;

    /// Request descriptor
    type Request: CacheRequest;

    /// Fetch the current value of `request`
    ///
    /// For blocking types with `min_index > 0`, wait (up to the provider's
    /// timeout) until the index exceeds `min_index`. `min_index == 0`
    /// always returns whatever is available right now. Polling types
    /// return promptly regardless of `min_index`.
    ///
    /// Errors are reported inside the returned `Fetched` alongside the
    /// best stale data, never by failing the call.
    async fn fetch(
        &self,
        type_id: &str,
        request: &Self::Request,
        min_index: u64,
    ) -> Fetched<Self::Value>;

    /// Registered capability of a type, `None` if the type is unknown
    fn capability(&self, type_id: &str) -> Option<TypeCapability>;

    /// Provider name (e.g., "memory")
    fn name(&self) -> &str;
}
