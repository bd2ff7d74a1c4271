//! Core watch types for the a3s-cache-notify system
//!
//! Serializable types use camelCase JSON for wire compatibility with the
//! rest of the A3S ecosystem.

use crate::error::NotifyError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single observed change to a watched cache entry
///
/// Every event sent for one watch carries either a strictly newer index
/// than the previous event, or (polling watches only) the same index with
/// a value that differs from the last delivered one.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEvent<T = serde_json::Value> {
    /// Opaque identifier chosen by the subscriber
    ///
    /// Passed through unmodified so consumers sharing one channel across
    /// several watches can tell the events apart.
    pub correlation_id: String,

    /// The fetched value, `None` when no value has ever been available
    pub result: Option<T>,

    /// Index/age metadata of the fetched value
    pub meta: ResultMeta,

    /// Fetch error, if the fetch failed
    ///
    /// When set, `result` and `meta` carry the best stale data the
    /// backend still had.
    pub err: Option<NotifyError>,
}

impl<T> UpdateEvent<T> {
    /// Whether this event reports a fetch failure
    pub fn is_err(&self) -> bool {
        self.err.is_some()
    }
}

/// Metadata about a fetched cache result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultMeta {
    /// Version marker of the value (0 means "no data yet")
    pub index: u64,

    /// Time since the value was last refreshed at its source
    pub age: Duration,

    /// Whether the value was served from cache without an upstream fetch
    pub hit: bool,
}

/// One answer from a backend fetch
///
/// A fetch never fails outright: on error the backend returns its best
/// stale value alongside the error so the watch can pass both on.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    /// Current (possibly stale) value
    pub value: Option<T>,

    /// Metadata of `value`
    pub meta: ResultMeta,

    /// Error encountered while fetching
    pub error: Option<NotifyError>,
}

impl<T> Fetched<T> {
    /// A successful fetch
    pub fn ok(value: T, meta: ResultMeta) -> Self {
        Self {
            value: Some(value),
            meta,
            error: None,
        }
    }

    /// Nothing cached yet: no value, index 0, no error
    pub fn missing() -> Self {
        Self {
            value: None,
            meta: ResultMeta::default(),
            error: None,
        }
    }

    /// A failed fetch with no usable data
    pub fn failed(error: NotifyError) -> Self {
        Self {
            value: None,
            meta: ResultMeta::default(),
            error: Some(error),
        }
    }

    /// Attach an error to otherwise stale data
    pub fn with_error(mut self, error: NotifyError) -> Self {
        self.error = Some(error);
        self
    }

    /// Build the event a watch delivers for this result
    pub(crate) fn into_event(self, correlation_id: &str) -> UpdateEvent<T> {
        UpdateEvent {
            correlation_id: correlation_id.to_string(),
            result: self.value,
            meta: self.meta,
            err: self.error,
        }
    }
}

/// What kind of reads a cache type supports
///
/// Resolved once when a watch is registered; the loops never look it up
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TypeCapability {
    /// Fetches can be held open until an index newer than `min_index` exists
    Blocking,
    /// Fetches always return promptly; freshness comes from re-polling
    Polling,
}

/// Cache-facing description of a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    /// Unique key of the cached entity within its type
    pub key: String,

    /// Staleness the subscriber tolerates (required for polling types)
    pub max_age: Option<Duration>,

    /// Force a fetch from the source even if the cached value is fresh
    ///
    /// The polling loop never sets this: doing so would bypass the
    /// backend's request coalescing across watchers of the same key.
    pub must_revalidate: bool,

    /// Upper bound for a single blocking fetch
    pub timeout: Option<Duration>,
}

impl RequestInfo {
    /// Create request info for a key with no freshness constraints
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    /// Set the max age
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Set the blocking fetch timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set must-revalidate
    pub fn with_must_revalidate(mut self, must_revalidate: bool) -> Self {
        self.must_revalidate = must_revalidate;
        self
    }

    /// The max age, if it is set and positive
    pub fn positive_max_age(&self) -> Option<Duration> {
        self.max_age.filter(|d| !d.is_zero())
    }
}
